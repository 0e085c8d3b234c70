//! `PostgreSQL` KV backend.
//!
//! # Table
//!
//! `kv_entries(key TEXT PRIMARY KEY, value TEXT, expires_at TIMESTAMPTZ)`,
//! created by `crates/server/migrations`. Run them via:
//! ```bash
//! cargo run -p delivery-dates-cli -- migrate
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::instrument;

use super::{KvError, KvStore};

// starts_with avoids LIKE wildcard escaping ('_' appears in our prefixes).
// COLLATE "C" keeps byte order regardless of the database locale.
const LIST_ASC: &str = r#"
    SELECT key
    FROM kv_entries
    WHERE starts_with(key, $1)
      AND (expires_at IS NULL OR expires_at > NOW())
    ORDER BY key COLLATE "C"
    LIMIT $2
"#;

const LIST_DESC: &str = r#"
    SELECT key
    FROM kv_entries
    WHERE starts_with(key, $1)
      AND (expires_at IS NULL OR expires_at > NOW())
    ORDER BY key COLLATE "C" DESC
    LIMIT $2
"#;

/// KV store backed by the `kv_entries` table.
#[derive(Debug, Clone)]
pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with sensible pool defaults.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the connection cannot be established.
    pub async fn connect(database_url: &secrecy::SecretString) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url.expose_secret())
            .await?;
        Ok(Self::new(pool))
    }

    /// The underlying pool (for migrations).
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn list_ordered(
        &self,
        prefix: &str,
        limit: usize,
        query: &str,
    ) -> Result<Vec<String>, KvError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let keys = sqlx::query_scalar::<_, String>(query)
            .bind(prefix)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    /// Delete expired rows. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `KvError::Database` if the query fails.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<u64, KvError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let value = sqlx::query_scalar::<_, String>(
            r"
            SELECT value
            FROM kv_entries
            WHERE key = $1
              AND (expires_at IS NULL OR expires_at > NOW())
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), KvError> {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);

        sqlx::query(
            r"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            ",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let result = sqlx::query(
            r"
            DELETE FROM kv_entries
            WHERE key = $1
              AND (expires_at IS NULL OR expires_at > NOW())
            ",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<String>, KvError> {
        self.list_ordered(prefix, limit, LIST_ASC).await
    }

    async fn list_desc(&self, prefix: &str, limit: usize) -> Result<Vec<String>, KvError> {
        self.list_ordered(prefix, limit, LIST_DESC).await
    }

    async fn ping(&self) -> Result<(), KvError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
