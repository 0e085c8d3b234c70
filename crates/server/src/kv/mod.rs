//! Key-value storage for pipeline state.
//!
//! Everything the service persists (shop tokens, order status records, the
//! retry queue, the dead-letter queue, circuit breakers, the error log) is a
//! JSON blob under a string key. Two backends implement [`KvStore`]:
//!
//! - [`PgKvStore`] - `PostgreSQL` table `kv_entries` (production)
//! - [`MemoryKvStore`] - in-process map (local development and tests)
//!
//! # Key Layout
//!
//! ```text
//! token:{shop}                   shop access token
//! webhook:{webhook_id}           duplicate-delivery marker (TTL)
//! order_status:{shop}:{order_id} processing status record
//! retry:{shop}:{order_id}        scheduled retry job
//! dlq:{entry_id}                 dead-letter entry
//! circuit:{shop}                 circuit breaker record
//! error_log:{rfc3339}:{uuid}     classified error (TTL)
//! ```

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub use memory::MemoryKvStore;
pub use postgres::PgKvStore;

/// Shared handle to a KV backend.
pub type SharedKv = Arc<dyn KvStore>;

/// Errors that can occur during KV operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored value could not be (de)serialized.
    #[error("serialization error for key '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A string key-value store with optional per-entry expiry.
///
/// Expired entries are invisible to [`get`](Self::get) and
/// [`list`](Self::list), whether or not the backend has purged them yet.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Store `value` under `key`, replacing any existing value.
    ///
    /// With `ttl`, the entry expires after that duration.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Delete `key`. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// List up to `limit` live keys starting with `prefix`, sorted ascending.
    ///
    /// Keys compare bytewise, so fixed-width timestamp keys sort by time.
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>, KvError>;

    /// List up to `limit` live keys starting with `prefix`, sorted descending.
    ///
    /// For time-ordered keys this returns the newest `limit` entries.
    async fn list_desc(&self, prefix: &str, limit: usize) -> Result<Vec<String>, KvError>;

    /// Check the backend is reachable.
    async fn ping(&self) -> Result<(), KvError> {
        self.get("__ping__").await.map(|_| ())
    }
}

/// Get and deserialize a JSON value.
///
/// # Errors
///
/// Returns `KvError::Serialization` if the stored value is not valid JSON for `T`.
pub async fn get_json<T: DeserializeOwned>(
    kv: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, KvError> {
    let Some(raw) = kv.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| KvError::Serialization {
            key: key.to_string(),
            source,
        })
}

/// Serialize and store a JSON value.
///
/// # Errors
///
/// Returns `KvError::Serialization` if `value` cannot be serialized.
pub async fn put_json<T: Serialize + Sync>(
    kv: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), KvError> {
    let raw = serde_json::to_string(value).map_err(|source| KvError::Serialization {
        key: key.to_string(),
        source,
    })?;
    kv.put(key, raw, ttl).await
}

/// Key builders, kept in one place so the layout above stays true.
pub mod keys {
    use chrono::{DateTime, Utc};
    use delivery_dates_core::{OrderId, ShopDomain};
    use uuid::Uuid;

    pub const TOKEN_PREFIX: &str = "token:";
    pub const WEBHOOK_PREFIX: &str = "webhook:";
    pub const ORDER_STATUS_PREFIX: &str = "order_status:";
    pub const RETRY_PREFIX: &str = "retry:";
    pub const DLQ_PREFIX: &str = "dlq:";
    pub const CIRCUIT_PREFIX: &str = "circuit:";
    pub const ERROR_LOG_PREFIX: &str = "error_log:";

    #[must_use]
    pub fn token(shop: &ShopDomain) -> String {
        format!("{TOKEN_PREFIX}{shop}")
    }

    #[must_use]
    pub fn webhook(webhook_id: &str) -> String {
        format!("{WEBHOOK_PREFIX}{webhook_id}")
    }

    #[must_use]
    pub fn order_status(shop: &ShopDomain, order_id: OrderId) -> String {
        format!("{ORDER_STATUS_PREFIX}{shop}:{order_id}")
    }

    #[must_use]
    pub fn retry(shop: &ShopDomain, order_id: OrderId) -> String {
        format!("{RETRY_PREFIX}{shop}:{order_id}")
    }

    #[must_use]
    pub fn dlq(entry_id: &str) -> String {
        format!("{DLQ_PREFIX}{entry_id}")
    }

    #[must_use]
    pub fn circuit(shop: &ShopDomain) -> String {
        format!("{CIRCUIT_PREFIX}{shop}")
    }

    /// Fixed-width UTC timestamp so keys sort chronologically.
    #[must_use]
    pub fn error_log(at: DateTime<Utc>, id: Uuid) -> String {
        format!(
            "{ERROR_LOG_PREFIX}{}:{}",
            at.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
            id.simple()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use delivery_dates_core::{OrderId, ShopDomain};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_json_helpers_roundtrip() {
        let kv = MemoryKvStore::new();
        let record = Record {
            name: "a".to_string(),
            count: 3,
        };
        put_json(&kv, "rec:1", &record, None).await.unwrap();
        let loaded: Option<Record> = get_json(&kv, "rec:1").await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn test_get_json_missing_key() {
        let kv = MemoryKvStore::new();
        let loaded: Option<Record> = get_json(&kv, "rec:missing").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_get_json_corrupt_value() {
        let kv = MemoryKvStore::new();
        kv.put("rec:bad", "not json".to_string(), None).await.unwrap();
        let result: Result<Option<Record>, _> = get_json(&kv, "rec:bad").await;
        assert!(matches!(result, Err(KvError::Serialization { .. })));
    }

    #[test]
    fn test_key_layout() {
        let shop = ShopDomain::parse("store.myshopify.com").unwrap();
        let order = OrderId::new(42);
        assert_eq!(keys::token(&shop), "token:store.myshopify.com");
        assert_eq!(
            keys::order_status(&shop, order),
            "order_status:store.myshopify.com:42"
        );
        assert_eq!(keys::retry(&shop, order), "retry:store.myshopify.com:42");
        assert_eq!(keys::circuit(&shop), "circuit:store.myshopify.com");
        assert_eq!(keys::dlq("abc"), "dlq:abc");
        assert_eq!(keys::webhook("w-1"), "webhook:w-1");
    }

    #[test]
    fn test_error_log_keys_sort_chronologically() {
        use chrono::TimeZone;

        let early = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        let a = keys::error_log(early, uuid::Uuid::new_v4());
        let b = keys::error_log(late, uuid::Uuid::nil());
        assert!(a.starts_with("error_log:2026-01-02T03:04:05.000000Z:"));
        assert!(a < b);
    }
}
