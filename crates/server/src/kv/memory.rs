//! In-memory KV backend.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KvError, KvStore};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process KV store.
///
/// Entries are kept in a sorted map so prefix listing is a range scan.
/// Expired entries are skipped on read and swept out every
/// [`PURGE_EVERY_WRITES`] writes.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
    writes: AtomicUsize,
}

/// Writes between sweeps of expired entries.
pub const PURGE_EVERY_WRITES: usize = 1024;

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Whether the store has no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    #[cfg(test)]
    async fn stored_len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError> {
        let now = Instant::now();
        self.entries.write().await.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PURGE_EVERY_WRITES == 0 {
            self.purge_expired().await;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let now = Instant::now();
        Ok(self
            .entries
            .write()
            .await
            .remove(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>, KvError> {
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(key, _)| key.clone())
            .take(limit)
            .collect())
    }

    async fn list_desc(&self, prefix: &str, limit: usize) -> Result<Vec<String>, KvError> {
        let now = Instant::now();
        let upper = prefix_end(prefix).map_or(Bound::Unbounded, Bound::Excluded);
        Ok(self
            .entries
            .read()
            .await
            .range((Bound::Included(prefix.to_string()), upper))
            .rev()
            .filter(|(_, e)| e.is_live(now))
            .map(|(key, _)| key.clone())
            .take(limit)
            .collect())
    }
}

/// Smallest key above every key starting with `prefix`.
fn prefix_end(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = char::from_u32(u32::from(last) + 1)
            .or_else(|| (last == '\u{D7FF}').then_some('\u{E000}'));
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let kv = MemoryKvStore::new();
        kv.put("a", "1".to_string(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));

        kv.put("a", "2".to_string(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("2"));

        assert!(kv.delete("a").await.unwrap());
        assert!(!kv.delete("a").await.unwrap());
        assert!(kv.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_prefix_sorted_and_limited() {
        let kv = MemoryKvStore::new();
        for key in ["retry:b", "retry:a", "dlq:x", "retry:c", "retryx"] {
            kv.put(key, "v".to_string(), None).await.unwrap();
        }

        let keys = kv.list("retry:", 10).await.unwrap();
        assert_eq!(keys, vec!["retry:a", "retry:b", "retry:c"]);

        let limited = kv.list("retry:", 2).await.unwrap();
        assert_eq!(limited, vec!["retry:a", "retry:b"]);

        assert!(kv.list("nothing:", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_desc_returns_last_keys() {
        let kv = MemoryKvStore::new();
        for key in ["log:1", "log:3", "log:2", "logz", "dlq:9"] {
            kv.put(key, "v".to_string(), None).await.unwrap();
        }

        assert_eq!(
            kv.list_desc("log:", 10).await.unwrap(),
            vec!["log:3", "log:2", "log:1"]
        );
        assert_eq!(kv.list_desc("log:", 2).await.unwrap(), vec!["log:3", "log:2"]);
        assert!(kv.list_desc("nothing:", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end("log:").as_deref(), Some("log;"));
        assert_eq!(prefix_end("").as_deref(), None);
        assert_eq!(prefix_end("a\u{10FFFF}").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_put_leaves_other_expired_entries_until_sweep() {
        let kv = MemoryKvStore::new();
        kv.put("gone", "v".to_string(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        kv.put("kept", "v".to_string(), None).await.unwrap();
        assert_eq!(kv.stored_len().await, 2);
        assert!(kv.get("gone").await.unwrap().is_none());
        assert_eq!(kv.list_desc("", 10).await.unwrap(), vec!["kept"]);

        assert_eq!(kv.purge_expired().await, 1);
        assert_eq!(kv.stored_len().await, 1);
    }

    #[tokio::test]
    async fn test_periodic_sweep_drops_expired_entries() {
        let kv = MemoryKvStore::new();
        kv.put("gone", "v".to_string(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        for i in 1..PURGE_EVERY_WRITES {
            kv.put(&format!("k:{i:05}"), "v".to_string(), None)
                .await
                .unwrap();
        }
        assert_eq!(kv.stored_len().await, PURGE_EVERY_WRITES - 1);
        assert!(kv.get("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let kv = MemoryKvStore::new();
        kv.put("short", "v".to_string(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        kv.put("long", "v".to_string(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(kv.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(kv.get("short").await.unwrap().is_none());
        assert!(kv.get("long").await.unwrap().is_some());
        assert_eq!(kv.list("", 10).await.unwrap(), vec!["long"]);
        assert_eq!(kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_ping() {
        let kv = MemoryKvStore::new();
        assert!(kv.ping().await.is_ok());
        assert!(kv.is_empty().await);
    }
}
