//! Shopify Admin API integration.
//!
//! # Security
//!
//! Shop access tokens grant `write_orders` on the merchant's store. They are
//! only ever read from the token store and passed per call; the client itself
//! holds no shop credentials.
//!
//! # Architecture
//!
//! - [`AdminClient`] - GraphQL calls (metafields, webhook subscriptions) and
//!   the OAuth code exchange, using `graphql_client` request/response types
//!   over `reqwest`
//! - [`webhook`] - HMAC verification and payload types for webhook intake
//! - [`oauth`] - HMAC verification of OAuth callback query strings
//!
//! # Example
//!
//! ```rust,ignore
//! use delivery_dates_server::shopify::AdminClient;
//!
//! let client = AdminClient::new(&config.shopify)?;
//! let existing = client
//!     .order_metafields(&shop, &token, order_id, "custom", &["delivery_date"])
//!     .await?;
//! ```

mod admin;
pub mod oauth;
pub mod types;
pub mod webhook;

pub use admin::{AdminClient, OAuthToken, WEBHOOK_TOPICS};
pub use types::*;

use thiserror::Error;

/// Errors that can occur when interacting with Shopify Admin API.
#[derive(Debug, Error)]
pub enum AdminShopifyError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GraphQL query returned errors.
    #[error("GraphQL errors: {}", format_graphql_errors(.0))]
    GraphQL(Vec<GraphQLError>),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by Shopify.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Authentication/authorization failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Shopify returned a 5xx status.
    #[error("Shopify server error: HTTP {0}")]
    Server(u16),

    /// Shopify returned an unexpected non-success status.
    #[error("Unexpected HTTP status {0}: {1}")]
    UnexpectedStatus(u16, String),

    /// User error from mutation (e.g., invalid input).
    #[error("User error: {0}")]
    UserError(String),

    /// OAuth code exchange failed.
    #[error("OAuth error: {0}")]
    OAuth(String),
}

impl AdminShopifyError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Server(_) | Self::Http(_))
    }
}

/// A GraphQL error returned by the Shopify Admin API.
#[derive(Debug, Clone)]
pub struct GraphQLError {
    /// Error message.
    pub message: String,
    /// Error code from `extensions.code` (e.g., `THROTTLED`).
    pub code: Option<String>,
}

fn format_graphql_errors(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.clone())
        .collect::<Vec<_>>()
        .join("; ")
}
