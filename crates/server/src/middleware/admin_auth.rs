//! Bearer token guard for the monitoring endpoints.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;

use crate::error::AppError;
use crate::state::AppState;

/// Reject requests whose `Authorization: Bearer` token does not match
/// `ADMIN_API_TOKEN`.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let authorized = presented.is_some_and(|token| {
        constant_time_compare(token, state.config().admin_token.expose_secret())
    });

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request");
        return AppError::Unauthorized("invalid or missing bearer token".to_string())
            .into_response();
    }

    next.run(request).await
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("token", "token"));
        assert!(!constant_time_compare("token", "tokex"));
        assert!(!constant_time_compare("token", "token2"));
        assert!(constant_time_compare("", ""));
    }
}
