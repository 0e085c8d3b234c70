//! Business logic on top of the Shopify client and KV storage.
//!
//! # Architecture
//!
//! ```text
//! webhook ──► Pipeline ──► attributes::extract ──► MetafieldService ──► AdminClient
//!               │                                        ▲
//!               ├──► TokenStore ─────────────────────────┘
//!               └──► ErrorHandlingService (classify, circuit breaker, error log)
//! ```
//!
//! All state (status records, retry queue, dead letters, breakers) lives in
//! the shared [`KvStore`](crate::kv::KvStore).

pub mod attributes;
pub mod error_handling;
pub mod metafields;
pub mod pipeline;
pub mod tokens;

pub use error_handling::{CircuitDecision, CircuitRecord, ClassifiedError, ErrorHandlingService};
pub use metafields::{MetafieldService, RetryPolicy, UpsertOutcome};
pub use pipeline::{
    DeadLetterEntry, JobSource, OrderJob, Pipeline, PipelineStats, ProcessOutcome, RetryJob,
    RetrySweep, StatusRecord, WebhookOutcome, dead_letters, scheduled_retries,
};
pub use tokens::{ShopToken, TokenStore};

use delivery_dates_core::ShopDomain;
use thiserror::Error;

use crate::kv::KvError;
use crate::shopify::AdminShopifyError;
use crate::shopify::webhook::WebhookError;

/// Errors raised while processing an order.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// KV storage failed.
    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    /// Shopify Admin API call failed.
    #[error("shopify error: {0}")]
    Shopify(#[from] AdminShopifyError),

    /// Webhook could not be verified or parsed.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// No access token is stored for the shop.
    #[error("no access token stored for {0}")]
    MissingToken(ShopDomain),

    /// Order data failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The shop's circuit breaker is open.
    #[error("circuit open for {0}")]
    CircuitOpen(ShopDomain),
}
