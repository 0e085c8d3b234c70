//! HTTP middleware stack.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layer (capture errors)
//! 2. `TraceLayer` (request tracing, see [`trace_layer`])
//! 3. Request ID (add unique ID to each request)
//! 4. Rate limiting (governor) on public `/api` routes
//! 5. Admin bearer token on `/admin/*`

pub mod admin_auth;
pub mod rate_limit;
pub mod request_id;
pub mod trace;

pub use admin_auth::require_admin_token;
pub use rate_limit::{api_rate_limiter, storefront_rate_limiter};
pub use request_id::request_id_middleware;
pub use trace::trace_layer;
