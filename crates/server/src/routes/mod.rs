//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                             - Liveness
//! GET  /health/ready                       - KV reachable
//!
//! # Storefront (rate limited)
//! GET  /api/delivery-dates                 - DutchNed availability proxy
//! POST /api/orders/{order_id}/delivery     - Save a delivery choice directly
//!
//! # Shopify
//! POST /api/webhooks/orders/create         - Order webhook intake
//! POST /api/webhooks/orders/updated        - Order webhook intake
//! POST /api/webhooks/app/uninstalled       - Forget the shop's token
//! GET  /auth/callback                      - OAuth code exchange + webhook registration
//!
//! # Monitoring (bearer token)
//! GET    /admin/stats                      - Pipeline counts
//! GET    /admin/orders/{shop}/{order_id}   - Order status record
//! GET    /admin/dead-letters               - Dead-letter queue
//! POST   /admin/dead-letters/{id}/replay   - Replay a dead letter
//! DELETE /admin/dead-letters/{id}          - Discard a dead letter
//! GET    /admin/circuit/{shop}             - Circuit breaker state
//! POST   /admin/circuit/{shop}/reset       - Close a circuit
//! GET    /admin/errors                     - Recent classified errors
//! POST   /admin/retries/run                - Sweep due retries now
//! ```

pub mod admin;
pub mod auth;
pub mod delivery;
pub mod health;
pub mod orders;
pub mod webhooks;

use axum::Router;
use axum::middleware::from_fn_with_state;

use crate::middleware::{api_rate_limiter, require_admin_token, storefront_rate_limiter};
use crate::state::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(delivery::router().layer(storefront_rate_limiter()))
        .merge(orders::router().layer(api_rate_limiter()))
        .merge(webhooks::router())
        .merge(auth::router())
        .nest(
            "/admin",
            admin::router().layer(from_fn_with_state(state.clone(), require_admin_token)),
        )
        .with_state(state)
}

/// Parse an order id from a path segment: numeric or an `Order` GID.
fn parse_order_id(raw: &str) -> Option<delivery_dates_core::OrderId> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .map(delivery_dates_core::OrderId::new)
        .or_else(|| delivery_dates_core::OrderId::from_gid(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order_id() {
        assert_eq!(parse_order_id("42").map(|id| id.as_i64()), Some(42));
        assert_eq!(
            parse_order_id("gid://shopify/Order/42").map(|id| id.as_i64()),
            Some(42)
        );
        assert!(parse_order_id("-1").is_none());
        assert!(parse_order_id("abc").is_none());
    }
}
