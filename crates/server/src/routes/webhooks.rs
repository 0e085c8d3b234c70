//! Shopify webhook endpoints.
//!
//! Bodies are taken as raw bytes: the HMAC is computed over the exact
//! payload Shopify sent.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use serde_json::{Value, json};

use crate::error::AppError;
use crate::services::WebhookOutcome;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/webhooks/orders/create", post(order_webhook))
        .route("/api/webhooks/orders/updated", post(order_webhook))
        .route("/api/webhooks/app/uninstalled", post(app_uninstalled))
}

/// POST /api/webhooks/orders/{create,updated}
async fn order_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, AppError> {
    let outcome = state.pipeline().handle_order_webhook(&headers, &body).await?;
    Ok(Json(outcome))
}

/// POST /api/webhooks/app/uninstalled
async fn app_uninstalled(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let removed = state.pipeline().handle_app_uninstalled(&headers, &body).await?;
    Ok(Json(json!({ "token_removed": removed })))
}
