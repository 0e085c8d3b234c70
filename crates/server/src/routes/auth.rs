//! Shopify app install callback.
//!
//! Handles only the server side of the install: the consent redirect is
//! driven by Shopify and the embedded app, not by this service.

use axum::{
    Json, Router,
    extract::{RawQuery, State},
    routing::get,
};
use delivery_dates_core::ShopDomain;
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::instrument;

use crate::error::AppError;
use crate::shopify::oauth::verify_query_hmac;
use crate::shopify::{WEBHOOK_TOPICS, WebhookRegistration};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/auth/callback", get(callback))
}

#[derive(Debug, Serialize)]
struct InstallResponse {
    shop: ShopDomain,
    scopes: Vec<String>,
    webhooks: Vec<WebhookResult>,
}

#[derive(Debug, Serialize)]
struct WebhookResult {
    topic: &'static str,
    #[serde(flatten)]
    status: WebhookStatus,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WebhookStatus {
    Registered(WebhookRegistration),
    Failed { error: String },
}

/// GET /auth/callback - Exchange the install code and register webhooks.
#[instrument(skip_all)]
async fn callback(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<InstallResponse>, AppError> {
    let params: Vec<(String, String)> =
        url::form_urlencoded::parse(query.as_deref().unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    if let Some(error) = param("error") {
        tracing::warn!(error, "Shopify OAuth error");
        return Err(AppError::BadRequest(format!("authorization failed: {error}")));
    }

    // Verify HMAC signature from Shopify
    if !verify_query_hmac(&params, state.config().shopify.api_secret.expose_secret()) {
        tracing::error!("Invalid HMAC signature in OAuth callback");
        return Err(AppError::Unauthorized("invalid hmac".to_string()));
    }

    let shop = param("shop")
        .ok_or_else(|| AppError::BadRequest("missing shop".to_string()))
        .and_then(|s| ShopDomain::parse(s).map_err(|e| AppError::BadRequest(e.to_string())))?;
    let code = param("code").ok_or_else(|| AppError::BadRequest("missing code".to_string()))?;

    // Exchange code for token
    let token = state.shopify().exchange_code(&shop, code).await?;
    let scopes: Vec<String> = token
        .scope
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    state
        .tokens()
        .save(&shop, &token.access_token, scopes.clone())
        .await?;
    state.errors().reset(&shop).await?;

    let mut webhooks = Vec::with_capacity(WEBHOOK_TOPICS.len());
    for &topic in WEBHOOK_TOPICS {
        let callback_url = state.config().webhook_callback_url(topic);
        let status = match state
            .shopify()
            .register_webhook(&shop, &token.access_token, topic, &callback_url)
            .await
        {
            Ok(registration) => WebhookStatus::Registered(registration),
            Err(e) => {
                tracing::error!(topic, error = %e, "Failed to register webhook");
                WebhookStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
        webhooks.push(WebhookResult { topic, status });
    }

    tracing::info!(shop = %shop, "App installed");
    Ok(Json(InstallResponse {
        shop,
        scopes,
        webhooks,
    }))
}
