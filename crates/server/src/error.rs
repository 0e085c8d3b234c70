//! Unified error handling for the HTTP surface.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::dutchned::DutchNedError;
use crate::kv::KvError;
use crate::services::PipelineError;
use crate::shopify::AdminShopifyError;
use crate::shopify::webhook::WebhookError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// KV storage operation failed.
    #[error("Storage error: {0}")]
    Kv(#[from] KvError),

    /// Shopify API operation failed.
    #[error("Shopify error: {0}")]
    Shopify(#[from] AdminShopifyError),

    /// DutchNed API operation failed.
    #[error("DutchNed error: {0}")]
    DutchNed(DutchNedError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A dependency is not ready.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DutchNedError> for AppError {
    fn from(err: DutchNedError) -> Self {
        match err {
            DutchNedError::InvalidQuery(msg) => Self::BadRequest(msg),
            other => Self::DutchNed(other),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidSignature => Self::Unauthorized(err.to_string()),
            WebhookError::MissingHeader(_)
            | WebhookError::InvalidShop(_)
            | WebhookError::InvalidPayload(_) => Self::BadRequest(err.to_string()),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Kv(e) => Self::Kv(e),
            PipelineError::Shopify(e) => Self::Shopify(e),
            PipelineError::Webhook(e) => e.into(),
            PipelineError::MissingToken(shop) => {
                Self::NotFound(format!("no access token for {shop}"))
            }
            PipelineError::Validation(msg) => Self::BadRequest(msg),
            PipelineError::CircuitOpen(shop) => {
                Self::ServiceUnavailable(format!("circuit open for {shop}"))
            }
        }
    }
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Kv(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Shopify(_) | Self::DutchNed(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log server errors with Sentry
        if matches!(
            self,
            Self::Kv(_) | Self::Internal(_) | Self::Shopify(_) | Self::DutchNed(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = self.status_code();

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Kv(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Shopify(_) | Self::DutchNed(_) => "External service error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order-123".to_string());
        assert_eq!(err.to_string(), "Not found: order-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::ServiceUnavailable("test".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(AppError::Shopify(AdminShopifyError::Server(502))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_webhook_errors_map_to_client_statuses() {
        assert_eq!(
            AppError::from(WebhookError::InvalidSignature).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(WebhookError::MissingHeader("x-shopify-topic")).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_invalid_delivery_query_is_bad_request() {
        let err = AppError::from(DutchNedError::InvalidQuery("days".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let err = AppError::from(DutchNedError::Upstream(500));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_pipeline_validation_is_bad_request() {
        let err = AppError::from(PipelineError::Validation("bad date".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
