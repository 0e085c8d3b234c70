//! Idempotent order metafield writes.

use std::future::Future;
use std::time::Duration;

use delivery_dates_core::{OrderId, ShopDomain};
use rand::Rng;
use serde::Serialize;
use tracing::instrument;

use crate::shopify::{AdminClient, AdminShopifyError, MetafieldValue, MetafieldsSetInput};

/// Retry policy for individual Admin API calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles each time.
    pub base_delay: Duration,
    /// Cap on how long a `Retry-After` is honored.
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_rate_limit_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_rate_limit_wait: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32, err: &AdminShopifyError) -> Duration {
        if let AdminShopifyError::RateLimited(secs) = err {
            return Duration::from_secs(*secs).min(self.max_rate_limit_wait);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor);
        delay + jitter(delay)
    }
}

/// Up to half of `delay`, uniformly.
fn jitter(delay: Duration) -> Duration {
    let max_ms = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// Every value already matched; nothing was written.
    Unchanged,
    /// Metafields were written.
    Written { created: usize, updated: usize },
}

/// Writes order metafields in one namespace.
#[derive(Debug, Clone)]
pub struct MetafieldService {
    client: AdminClient,
    namespace: String,
    retry: RetryPolicy,
}

impl MetafieldService {
    #[must_use]
    pub fn new(client: AdminClient, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create or update `metafields` on the order.
    ///
    /// Reads the order's current values first and writes only keys whose
    /// value or type differ, so replays are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the last `AdminShopifyError` once retries are exhausted, or
    /// the first non-transient one.
    #[instrument(skip(self, access_token, metafields), fields(shop = %shop, order_id = %order_id))]
    pub async fn upsert(
        &self,
        shop: &ShopDomain,
        access_token: &str,
        order_id: OrderId,
        metafields: &[MetafieldValue],
    ) -> Result<UpsertOutcome, AdminShopifyError> {
        if metafields.is_empty() {
            return Ok(UpsertOutcome::Unchanged);
        }

        let keys: Vec<&str> = metafields.iter().map(|m| m.key.as_str()).collect();
        let existing = self
            .with_retry("order_metafields", || {
                self.client
                    .order_metafields(shop, access_token, order_id, &self.namespace, &keys)
            })
            .await?;

        let mut created = 0;
        let mut updated = 0;
        let mut inputs = Vec::new();

        for desired in metafields {
            let current = existing
                .iter()
                .find(|m| m.namespace == self.namespace && m.key == desired.key);

            match current {
                Some(m) if m.value == desired.value && m.kind == desired.kind.as_str() => continue,
                Some(_) => updated += 1,
                None => created += 1,
            }

            inputs.push(MetafieldsSetInput {
                owner_id: order_id.to_gid(),
                namespace: self.namespace.clone(),
                key: desired.key.clone(),
                kind: desired.kind.as_str().to_string(),
                value: desired.value.clone(),
            });
        }

        if inputs.is_empty() {
            tracing::debug!("Metafields already up to date");
            return Ok(UpsertOutcome::Unchanged);
        }

        self.with_retry("metafields_set", || {
            self.client.set_metafields(shop, access_token, &inputs)
        })
        .await?;

        tracing::info!(created, updated, "Order metafields written");
        Ok(UpsertOutcome::Written { created, updated })
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, AdminShopifyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdminShopifyError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt, &err);
                    tracing::warn!(
                        op,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying Shopify call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
