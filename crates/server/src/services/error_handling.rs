//! Error classification, per-shop circuit breakers and the error log.
//!
//! # Circuit Breaker
//!
//! ```text
//!            failures >= threshold               open_duration elapsed
//!   Closed ─────────────────────────► Open ─────────────────────────► HalfOpen
//!     ▲                                 ▲                                │
//!     │          any failure            └────────────────────────────────┤
//!     └──────────────────────────────────────────────────────────────────┘
//!                         successes >= half_open_successes
//! ```
//!
//! Breaker records live in KV (`circuit:{shop}`) so every process sees the
//! same state. Validation and not-found failures describe the order, not
//! Shopify's health, and never count toward opening a breaker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use delivery_dates_core::{CircuitState, ErrorCategory, ErrorSeverity, OrderId, ShopDomain};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use super::PipelineError;
use crate::config::PipelineConfig;
use crate::kv::{self, KvError, SharedKv, keys};
use crate::shopify::AdminShopifyError;

/// How long classified errors stay in the log.
pub const ERROR_LOG_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// =============================================================================
// Classification
// =============================================================================

/// An error with its category, severity and retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub message: String,
}

impl ClassifiedError {
    /// Build from a category using the standard severity/retry table.
    #[must_use]
    pub fn from_category(category: ErrorCategory, message: impl Into<String>) -> Self {
        let (severity, retryable) = match category {
            ErrorCategory::RateLimit | ErrorCategory::CircuitOpen => (ErrorSeverity::Medium, true),
            ErrorCategory::Network | ErrorCategory::ShopifyServer | ErrorCategory::Unknown => {
                (ErrorSeverity::High, true)
            }
            ErrorCategory::Authentication | ErrorCategory::Configuration => {
                (ErrorSeverity::Critical, false)
            }
            ErrorCategory::Validation => (ErrorSeverity::Low, false),
            ErrorCategory::NotFound => (ErrorSeverity::Medium, false),
        };

        Self {
            category,
            severity,
            retryable,
            message: message.into(),
        }
    }

    /// Whether this failure says something about the shop's API health.
    #[must_use]
    pub const fn counts_toward_circuit(&self) -> bool {
        !matches!(
            self.category,
            ErrorCategory::Validation | ErrorCategory::NotFound
        )
    }
}

/// Classify a pipeline failure.
#[must_use]
pub fn classify(err: &PipelineError) -> ClassifiedError {
    let category = match err {
        PipelineError::Shopify(e) => shopify_category(e),
        PipelineError::Kv(_) => ErrorCategory::Unknown,
        PipelineError::Webhook(_) | PipelineError::Validation(_) => ErrorCategory::Validation,
        PipelineError::MissingToken(_) => ErrorCategory::Configuration,
        PipelineError::CircuitOpen(_) => ErrorCategory::CircuitOpen,
    };
    ClassifiedError::from_category(category, err.to_string())
}

fn shopify_category(err: &AdminShopifyError) -> ErrorCategory {
    match err {
        AdminShopifyError::Http(_) => ErrorCategory::Network,
        AdminShopifyError::RateLimited(_) => ErrorCategory::RateLimit,
        AdminShopifyError::Unauthorized(_) | AdminShopifyError::OAuth(_) => {
            ErrorCategory::Authentication
        }
        AdminShopifyError::NotFound(_) => ErrorCategory::NotFound,
        AdminShopifyError::Server(_) => ErrorCategory::ShopifyServer,
        AdminShopifyError::UserError(_) => ErrorCategory::Validation,
        AdminShopifyError::UnexpectedStatus(status, _) if (400..500).contains(status) => {
            ErrorCategory::Validation
        }
        AdminShopifyError::GraphQL(errors)
            if errors
                .iter()
                .any(|e| e.code.as_deref() == Some("ACCESS_DENIED")) =>
        {
            ErrorCategory::Authentication
        }
        AdminShopifyError::GraphQL(_)
        | AdminShopifyError::Parse(_)
        | AdminShopifyError::UnexpectedStatus(..) => ErrorCategory::Unknown,
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Counted failures that open a closed breaker.
    pub failure_threshold: u32,
    /// How long a breaker stays open before probing.
    pub open_duration: Duration,
    /// Successes in half-open that close the breaker.
    pub half_open_successes: u32,
}

impl From<&PipelineConfig> for CircuitConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            failure_threshold: config.circuit_failure_threshold,
            open_duration: config.circuit_open_duration,
            half_open_successes: config.circuit_half_open_successes,
        }
    }
}

/// Persisted breaker state for one shop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitDecision {
    pub allowed: bool,
    pub state: CircuitState,
    /// Time until an open breaker starts probing.
    pub retry_after: Option<Duration>,
}

// =============================================================================
// Error log
// =============================================================================

/// A classified error kept for the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: Uuid,
    pub shop: Option<ShopDomain>,
    pub order_id: Option<OrderId>,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Error classification, circuit breakers and the error log.
#[derive(Clone)]
pub struct ErrorHandlingService {
    kv: SharedKv,
    circuit: CircuitConfig,
}

impl std::fmt::Debug for ErrorHandlingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlingService")
            .field("circuit", &self.circuit)
            .finish_non_exhaustive()
    }
}

impl ErrorHandlingService {
    #[must_use]
    pub fn new(kv: SharedKv, circuit: CircuitConfig) -> Self {
        Self { kv, circuit }
    }

    #[must_use]
    pub const fn circuit_config(&self) -> CircuitConfig {
        self.circuit
    }

    /// Current breaker record (closed when none is stored).
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the read fails.
    pub async fn state(&self, shop: &ShopDomain) -> Result<CircuitRecord, KvError> {
        Ok(kv::get_json(self.kv.as_ref(), &keys::circuit(shop))
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, shop: &ShopDomain, record: &CircuitRecord) -> Result<(), KvError> {
        kv::put_json(self.kv.as_ref(), &keys::circuit(shop), record, None).await
    }

    /// Check whether the shop's breaker allows a call now.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the breaker record cannot be read or written.
    pub async fn check(&self, shop: &ShopDomain) -> Result<CircuitDecision, KvError> {
        self.check_at(shop, Utc::now()).await
    }

    /// [`check`](Self::check) at a given instant.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the breaker record cannot be read or written.
    pub async fn check_at(
        &self,
        shop: &ShopDomain,
        now: DateTime<Utc>,
    ) -> Result<CircuitDecision, KvError> {
        let mut record = self.state(shop).await?;

        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(CircuitDecision {
                allowed: true,
                state: record.state,
                retry_after: None,
            }),
            CircuitState::Open => {
                let reopen_at = record
                    .opened_at
                    .unwrap_or(now)
                    .checked_add_signed(to_chrono(self.circuit.open_duration))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                if now >= reopen_at {
                    record.state = CircuitState::HalfOpen;
                    record.success_count = 0;
                    self.save(shop, &record).await?;
                    tracing::info!(shop = %shop, "Circuit half-open");
                    Ok(CircuitDecision {
                        allowed: true,
                        state: CircuitState::HalfOpen,
                        retry_after: None,
                    })
                } else {
                    Ok(CircuitDecision {
                        allowed: false,
                        state: CircuitState::Open,
                        retry_after: (reopen_at - now).to_std().ok(),
                    })
                }
            }
        }
    }

    /// Record a successful call.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the breaker record cannot be read or written.
    #[instrument(skip(self))]
    pub async fn record_success(&self, shop: &ShopDomain) -> Result<CircuitRecord, KvError> {
        let mut record = self.state(shop).await?;

        match record.state {
            CircuitState::HalfOpen => {
                record.success_count += 1;
                if record.success_count >= self.circuit.half_open_successes {
                    record = CircuitRecord::default();
                    tracing::info!("Circuit closed");
                }
                self.save(shop, &record).await?;
            }
            CircuitState::Closed if record.failure_count > 0 => {
                record.failure_count = 0;
                self.save(shop, &record).await?;
            }
            CircuitState::Closed | CircuitState::Open => {}
        }

        Ok(record)
    }

    /// Record a failed call.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the breaker record cannot be read or written.
    pub async fn record_failure(
        &self,
        shop: &ShopDomain,
        err: &ClassifiedError,
    ) -> Result<CircuitRecord, KvError> {
        self.record_failure_at(shop, err, Utc::now()).await
    }

    /// [`record_failure`](Self::record_failure) at a given instant.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the breaker record cannot be read or written.
    #[instrument(skip(self, err, now), fields(category = %err.category))]
    pub async fn record_failure_at(
        &self,
        shop: &ShopDomain,
        err: &ClassifiedError,
        now: DateTime<Utc>,
    ) -> Result<CircuitRecord, KvError> {
        let mut record = self.state(shop).await?;
        if !err.counts_toward_circuit() {
            return Ok(record);
        }

        record.failure_count += 1;
        record.last_failure_at = Some(now);
        record.last_error = Some(err.message.clone());

        let should_open = match record.state {
            CircuitState::Closed => record.failure_count >= self.circuit.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if should_open {
            record.state = CircuitState::Open;
            record.opened_at = Some(now);
            record.success_count = 0;
            tracing::warn!(
                failures = record.failure_count,
                open_secs = self.circuit.open_duration.as_secs(),
                "Circuit opened"
            );
        }

        self.save(shop, &record).await?;
        Ok(record)
    }

    /// Force the breaker closed.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the delete fails.
    #[instrument(skip(self))]
    pub async fn reset(&self, shop: &ShopDomain) -> Result<(), KvError> {
        self.kv.delete(&keys::circuit(shop)).await?;
        tracing::info!("Circuit reset");
        Ok(())
    }

    // =========================================================================
    // Error log
    // =========================================================================

    /// Append a classified error to the log.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the write fails.
    pub async fn log_error(
        &self,
        shop: Option<&ShopDomain>,
        order_id: Option<OrderId>,
        err: &ClassifiedError,
    ) -> Result<ErrorLogEntry, KvError> {
        let entry = ErrorLogEntry {
            id: Uuid::new_v4(),
            shop: shop.cloned(),
            order_id,
            category: err.category,
            severity: err.severity,
            retryable: err.retryable,
            message: err.message.clone(),
            occurred_at: Utc::now(),
        };

        let shop_field = shop.map(ToString::to_string).unwrap_or_default();
        let order_field = order_id.map(|id| id.to_string()).unwrap_or_default();
        match err.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => tracing::error!(
                shop = %shop_field,
                order_id = %order_field,
                category = %err.category,
                severity = %err.severity,
                error = %err.message,
                "Order processing error"
            ),
            ErrorSeverity::Medium => tracing::warn!(
                shop = %shop_field,
                order_id = %order_field,
                category = %err.category,
                error = %err.message,
                "Order processing error"
            ),
            ErrorSeverity::Low => tracing::info!(
                shop = %shop_field,
                order_id = %order_field,
                category = %err.category,
                error = %err.message,
                "Order processing error"
            ),
        }

        kv::put_json(
            self.kv.as_ref(),
            &keys::error_log(entry.occurred_at, entry.id),
            &entry,
            Some(ERROR_LOG_TTL),
        )
        .await?;

        Ok(entry)
    }

    /// Most recent errors, newest first.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if listing or reading fails.
    pub async fn recent_errors(&self, limit: usize) -> Result<Vec<ErrorLogEntry>, KvError> {
        let entries = self.kv.list_desc(keys::ERROR_LOG_PREFIX, limit).await?;

        let mut errors = Vec::with_capacity(entries.len());
        for key in &entries {
            // Entries can expire between list and get
            if let Some(entry) = kv::get_json::<ErrorLogEntry>(self.kv.as_ref(), key).await? {
                errors.push(entry);
            }
        }
        Ok(errors)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
