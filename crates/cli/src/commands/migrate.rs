//! Database migration commands.
//!
//! # Usage
//!
//! ```bash
//! dd-cli migrate
//! dd-cli kv purge
//! ```
//!
//! # Migration Files
//!
//! `crates/server/migrations/`

use super::CommandError;

/// Run the server's migrations (the `kv_entries` table).
///
/// # Errors
///
/// Returns `CommandError` if the connection or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let store = super::connect().await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("../server/migrations")
        .run(store.pool())
        .await?;

    tracing::info!("Migrations complete!");
    Ok(())
}

/// Delete expired KV rows (duplicate markers, error log entries).
///
/// # Errors
///
/// Returns `CommandError` if the connection or the delete fails.
pub async fn purge_expired() -> Result<(), CommandError> {
    let store = super::connect().await?;
    let removed = store.purge_expired().await?;
    tracing::info!("Purged {} expired entries", removed);
    Ok(())
}
