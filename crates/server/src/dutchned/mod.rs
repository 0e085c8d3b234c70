//! DutchNed delivery-date API client.
//!
//! Proxies availability lookups for the storefront. Responses are cached
//! per normalized query with `moka`; past dates are filtered on every read
//! so a cached response never offers yesterday.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = DutchNedClient::new(&config.dutchned)?;
//! let query = DeliveryQuery::from_params(&params)?;
//! let options = client.delivery_dates(&query).await?;
//! ```

pub mod types;

pub use types::{DeliveryDateParams, DeliveryOption, DeliveryQuery, ShippingOption};

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::instrument;

use crate::config::DutchNedConfig;
use types::WireResponse;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the DutchNed API.
#[derive(Debug, Error)]
pub enum DutchNedError {
    /// HTTP request failed (including timeouts).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// DutchNed answered with a non-success status.
    #[error("DutchNed returned HTTP {0}")]
    Upstream(u16),

    /// Response body was not understood.
    #[error("Unexpected response: {0}")]
    Parse(String),

    /// Request parameters failed validation.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// DutchNed API client.
#[derive(Clone)]
pub struct DutchNedClient {
    inner: Arc<DutchNedClientInner>,
}

struct DutchNedClientInner {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: SecretString,
    cache: Cache<DeliveryQuery, Arc<Vec<DeliveryOption>>>,
}

impl std::fmt::Debug for DutchNedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DutchNedClient")
            .field("endpoint", &self.inner.endpoint)
            .field("username", &self.inner.username)
            .field("password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl DutchNedClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `DutchNedError::Http` if the HTTP client fails to build.
    pub fn new(config: &DutchNedConfig) -> Result<Self, DutchNedError> {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(config.cache_ttl)
            .build();

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            inner: Arc::new(DutchNedClientInner {
                client,
                endpoint: format!("{}/delivery-dates", config.api_url.trim_end_matches('/')),
                username: config.username.clone(),
                password: config.password.clone(),
                cache,
            }),
        })
    }

    /// Available delivery dates for the query, today or later.
    ///
    /// # Errors
    ///
    /// Returns `DutchNedError` if the upstream call fails.
    pub async fn delivery_dates(
        &self,
        query: &DeliveryQuery,
    ) -> Result<Vec<DeliveryOption>, DutchNedError> {
        let options = self
            .inner
            .cache
            .try_get_with(query.clone(), self.fetch(query))
            .await
            .map_err(|e| match Arc::try_unwrap(e) {
                Ok(err) => err,
                Err(shared) => DutchNedError::Parse(shared.to_string()),
            })?;

        Ok(upcoming(&options, Utc::now().date_naive()))
    }

    #[instrument(skip(self), fields(postal_code = %query.postal_code, country = %query.country))]
    async fn fetch(&self, query: &DeliveryQuery) -> Result<Arc<Vec<DeliveryOption>>, DutchNedError> {
        let mut params = vec![
            ("postal_code", query.postal_code.clone()),
            ("country", query.country.clone()),
            ("days", query.days.to_string()),
        ];
        if let Some(from) = query.from {
            params.push(("from", from.format("%Y-%m-%d").to_string()));
        }

        let response = self
            .inner
            .client
            .get(&self.inner.endpoint)
            .basic_auth(&self.inner.username, Some(self.inner.password.expose_secret()))
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "DutchNed returned non-success status");
            return Err(DutchNedError::Upstream(status.as_u16()));
        }

        let text = response.text().await?;
        let wire: WireResponse = serde_json::from_str(&text).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %text.chars().take(500).collect::<String>(),
                "Failed to parse DutchNed response"
            );
            DutchNedError::Parse(e.to_string())
        })?;

        let mut options: Vec<DeliveryOption> = wire
            .into_dates()
            .into_iter()
            .map(|d| DeliveryOption::new(d.date, d.shipping_methods))
            .collect();
        options.sort_by_key(|o| o.date);
        options.dedup_by_key(|o| o.date);

        tracing::debug!(count = options.len(), "Fetched delivery dates");
        Ok(Arc::new(options))
    }
}

fn upcoming(options: &[DeliveryOption], today: NaiveDate) -> Vec<DeliveryOption> {
    options
        .iter()
        .filter(|o| o.date.as_naive() >= today)
        .cloned()
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use delivery_dates_core::DeliveryDate;

    #[test]
    fn test_upcoming_filters_past_dates() {
        let options: Vec<DeliveryOption> = ["2026-01-04", "2026-01-05", "2026-01-06"]
            .iter()
            .map(|d| DeliveryOption::new(DeliveryDate::parse(d).unwrap(), vec![]))
            .collect();
        let today = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();

        let kept = upcoming(&options, today);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].date.to_string(), "2026-01-05");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            DutchNedError::Upstream(503).to_string(),
            "DutchNed returned HTTP 503"
        );
        assert_eq!(
            DutchNedError::InvalidQuery("days".to_string()).to_string(),
            "Invalid query: days"
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let client = DutchNedClient::new(&DutchNedConfig {
            api_url: "https://api.dutchned.test/".to_string(),
            username: "user".to_string(),
            password: SecretString::from("pa55word_value"),
            cache_ttl: Duration::from_secs(60),
        })
        .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("pa55word_value"));
        assert!(debug.contains("https://api.dutchned.test/delivery-dates"));
    }
}
