//! Service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `APP_BASE_URL` - Public URL of this service (webhook callbacks are registered under it)
//! - `SHOPIFY_API_KEY` - Shopify app API key (OAuth client ID)
//! - `SHOPIFY_API_SECRET` - Shopify app API secret (OAuth + webhook HMAC)
//! - `ADMIN_API_TOKEN` - Bearer token for `/admin/*` endpoints (min 32 chars, high entropy)
//! - `DUTCHNED_API_URL` - `DutchNed` API base URL
//! - `DUTCHNED_USERNAME` - `DutchNed` basic auth username
//! - `DUTCHNED_PASSWORD` - `DutchNed` basic auth password
//!
//! ## Optional
//! - `DATABASE_URL` - `PostgreSQL` connection string for the KV table (default: in-memory)
//! - `HOST` - Bind address (default: 127.0.0.1)
//! - `PORT` - Listen port (default: 8787)
//! - `SHOPIFY_API_VERSION` - API version (default: 2025-01)
//! - `METAFIELD_NAMESPACE` - Namespace for order metafields (default: custom)
//! - `RETRY_MAX_ATTEMPTS` - Attempts before dead-lettering (default: 5)
//! - `RETRY_BASE_DELAY_SECS` - First retry delay (default: 30)
//! - `RETRY_MAX_DELAY_SECS` - Retry delay cap (default: 3600)
//! - `RETRY_POLL_INTERVAL_SECS` - Retry sweep interval (default: 30)
//! - `CIRCUIT_FAILURE_THRESHOLD` - Failures that open a shop's circuit (default: 5)
//! - `CIRCUIT_OPEN_SECS` - How long a circuit stays open (default: 60)
//! - `CIRCUIT_HALF_OPEN_SUCCESSES` - Successes that close a half-open circuit (default: 2)
//! - `DELIVERY_CACHE_TTL_SECS` - `DutchNed` response cache TTL (default: 300)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` / `SENTRY_TRACES_SAMPLE_RATE` - Sample rates (default: 1.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_ADMIN_TOKEN_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_API_VERSION: &str = "2025-01";
const DEFAULT_METAFIELD_NAMESPACE: &str = "custom";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// `PostgreSQL` URL for the KV table; `None` selects the in-memory store
    pub database_url: Option<SecretString>,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of this service
    pub base_url: String,
    /// Bearer token guarding `/admin/*`
    pub admin_token: SecretString,
    /// Shopify app configuration
    pub shopify: ShopifyAppConfig,
    /// `DutchNed` API configuration
    pub dutchned: DutchNedConfig,
    /// Retry and circuit breaker tuning
    pub pipeline: PipelineConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Shopify app configuration.
///
/// Implements `Debug` manually to redact the API secret.
#[derive(Clone)]
pub struct ShopifyAppConfig {
    /// App API key (OAuth client ID)
    pub api_key: String,
    /// App API secret (OAuth client secret, signs webhooks)
    pub api_secret: SecretString,
    /// Admin API version (e.g., 2025-01)
    pub api_version: String,
    /// Namespace the order metafields are written to
    pub metafield_namespace: String,
}

impl std::fmt::Debug for ShopifyAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyAppConfig")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .field("metafield_namespace", &self.metafield_namespace)
            .finish()
    }
}

/// `DutchNed` delivery date API configuration.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct DutchNedConfig {
    /// API base URL
    pub api_url: String,
    /// Basic auth username
    pub username: String,
    /// Basic auth password
    pub password: SecretString,
    /// How long delivery date responses are cached
    pub cache_ttl: Duration,
}

impl std::fmt::Debug for DutchNedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DutchNedConfig")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

/// Retry, dead-letter and circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempts before a retryable failure is dead-lettered
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt
    pub base_retry_delay: Duration,
    /// Upper bound for the retry delay
    pub max_retry_delay: Duration,
    /// How often the background worker sweeps due retries
    pub retry_poll_interval: Duration,
    /// Counted failures that open a shop's circuit
    pub circuit_failure_threshold: u32,
    /// How long an open circuit rejects attempts
    pub circuit_open_duration: Duration,
    /// Successes in half-open state that close the circuit
    pub circuit_half_open_successes: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_retry_delay: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(3600),
            retry_poll_interval: Duration::from_secs(30),
            circuit_failure_threshold: 5,
            circuit_open_duration: Duration::from_secs(60),
            circuit_half_open_successes: 2,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_optional_env("DATABASE_URL").map(SecretString::from);
        let host = parse_env_or_default::<IpAddr>("HOST", "127.0.0.1")?;
        let port = parse_env_or_default::<u16>("PORT", "8787")?;
        let base_url = get_required_env("APP_BASE_URL")?;
        url::Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("APP_BASE_URL".to_string(), e.to_string()))?;
        let admin_token = get_validated_secret("ADMIN_API_TOKEN")?;
        validate_admin_token(&admin_token, "ADMIN_API_TOKEN")?;

        let shopify = ShopifyAppConfig::from_env()?;
        let dutchned = DutchNedConfig::from_env()?;
        let pipeline = PipelineConfig::from_env()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);

        Ok(Self {
            database_url,
            host,
            port,
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_token,
            shopify,
            dutchned,
            pipeline,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Returns the URL Shopify should deliver a webhook topic to.
    ///
    /// `orders/create` maps to `{base_url}/api/webhooks/orders/create`.
    #[must_use]
    pub fn webhook_callback_url(&self, topic: &str) -> String {
        format!("{}/api/webhooks/{}", self.base_url, topic)
    }
}

impl ShopifyAppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: get_required_env("SHOPIFY_API_KEY")?,
            api_secret: get_validated_secret("SHOPIFY_API_SECRET")?,
            api_version: get_env_or_default("SHOPIFY_API_VERSION", DEFAULT_API_VERSION),
            metafield_namespace: get_env_or_default(
                "METAFIELD_NAMESPACE",
                DEFAULT_METAFIELD_NAMESPACE,
            ),
        })
    }
}

impl DutchNedConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_url = get_required_env("DUTCHNED_API_URL")?;
        url::Url::parse(&api_url).map_err(|e| {
            ConfigError::InvalidEnvVar("DUTCHNED_API_URL".to_string(), e.to_string())
        })?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            username: get_required_env("DUTCHNED_USERNAME")?,
            password: get_required_secret("DUTCHNED_PASSWORD")?,
            cache_ttl: Duration::from_secs(parse_env_or_default("DELIVERY_CACHE_TTL_SECS", "300")?),
        })
    }
}

impl PipelineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            max_attempts: parse_env_or_default("RETRY_MAX_ATTEMPTS", "5")?,
            base_retry_delay: Duration::from_secs(parse_env_or_default(
                "RETRY_BASE_DELAY_SECS",
                "30",
            )?),
            max_retry_delay: Duration::from_secs(parse_env_or_default(
                "RETRY_MAX_DELAY_SECS",
                "3600",
            )?),
            retry_poll_interval: Duration::from_secs(parse_env_or_default(
                "RETRY_POLL_INTERVAL_SECS",
                "30",
            )?),
            circuit_failure_threshold: parse_env_or_default("CIRCUIT_FAILURE_THRESHOLD", "5")?,
            circuit_open_duration: Duration::from_secs(parse_env_or_default(
                "CIRCUIT_OPEN_SECS",
                "60",
            )?),
            circuit_half_open_successes: parse_env_or_default(
                "CIRCUIT_HALF_OPEN_SUCCESSES",
                "2",
            )?,
        };

        if config.max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "RETRY_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if config.circuit_failure_threshold == 0 || config.circuit_half_open_successes == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CIRCUIT_*".to_string(),
                "thresholds must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to a default.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that the admin token meets minimum length requirements.
fn validate_admin_token(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_ADMIN_TOKEN_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_ADMIN_TOKEN_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Real secrets like API keys have high entropy
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
