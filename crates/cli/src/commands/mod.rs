//! Subcommand implementations.

pub mod dlq;
pub mod migrate;
pub mod retries;
pub mod tokens;
pub mod webhooks;

use std::sync::Arc;

use delivery_dates_core::{ShopDomain, ShopDomainError};
use delivery_dates_server::config::{ConfigError, ServiceConfig};
use delivery_dates_server::kv::{KvError, PgKvStore, SharedKv};
use delivery_dates_server::services::PipelineError;
use delivery_dates_server::shopify::AdminShopifyError;
use delivery_dates_server::state::{AppState, StateError};
use secrecy::SecretString;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Server configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Kv(#[from] KvError),

    #[error("Shopify error: {0}")]
    Shopify(#[from] AdminShopifyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Startup error: {0}")]
    State(#[from] StateError),

    #[error("Invalid shop: {0}")]
    InvalidShop(#[from] ShopDomainError),

    #[error("Not found: {0}")]
    NotFound(String),
}

fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL")
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("DATABASE_URL"))
}

/// Connect to the KV table named by `DATABASE_URL`.
async fn connect() -> Result<PgKvStore, CommandError> {
    tracing::info!("Connecting to database...");
    Ok(PgKvStore::connect(&database_url()?).await?)
}

/// Shared KV handle for commands that only touch storage.
async fn kv() -> Result<SharedKv, CommandError> {
    Ok(Arc::new(connect().await?))
}

/// Full application state for commands that call Shopify.
///
/// Loads every Shopify and `DutchNed` secret; commands that only read
/// storage use [`kv`] instead.
async fn app_state() -> Result<AppState, CommandError> {
    let config = ServiceConfig::from_env()?;
    let kv = kv().await?;
    Ok(AppState::new(config, kv)?)
}

fn parse_shop(shop: &str) -> Result<ShopDomain, CommandError> {
    Ok(ShopDomain::parse(shop)?)
}
