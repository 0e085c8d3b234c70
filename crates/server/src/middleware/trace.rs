//! Per-request tracing spans.
//!
//! Every request gets an `http_request` span. Fields filled in later
//! (`status`, `latency_ms`, and `request_id` from
//! [`request_id_middleware`](super::request_id_middleware)) are declared
//! empty up front, since `Span::record` ignores undeclared fields.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, HttpMakeClassifier, OnResponse, TraceLayer};
use tracing::Span;

/// The concrete `TraceLayer` built by [`trace_layer`].
pub type HttpTraceLayer = TraceLayer<
    HttpMakeClassifier,
    fn(&Request<Body>) -> Span,
    DefaultOnRequest,
    fn(&Response<Body>, Duration, &Span),
>;

/// `TraceLayer` with the service's span layout.
#[must_use]
pub fn trace_layer() -> HttpTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(http_span as fn(&Request<Body>) -> Span)
        .on_response(record_response as fn(&Response<Body>, Duration, &Span))
}

fn http_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        request_id = tracing::field::Empty,
    )
}

fn record_response(response: &Response<Body>, latency: Duration, span: &Span) {
    span.record("status", response.status().as_u16());
    span.record(
        "latency_ms",
        u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
    );
    DefaultOnResponse::default().on_response(response, latency, span);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt;
    use tracing::field::{Field, Visit};
    use tracing::span;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;
    use crate::middleware::request_id::{REQUEST_ID_HEADER, request_id_middleware};

    /// Captures `field = value` pairs recorded on spans after creation.
    #[derive(Clone, Default)]
    struct Recorded(Arc<Mutex<Vec<(String, String)>>>);

    impl Recorded {
        fn get(&self, name: &str) -> Option<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.clone())
        }
    }

    impl Visit for Recorded {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0
                .lock()
                .unwrap()
                .push((field.name().to_string(), format!("{value:?}")));
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            self.0
                .lock()
                .unwrap()
                .push((field.name().to_string(), value.to_string()));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for Recorded {
        fn on_record(&self, _id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
            values.record(&mut self.clone());
        }
    }

    #[tokio::test]
    async fn test_span_carries_request_id_and_status() {
        let recorded = Recorded::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(recorded.clone()),
        );

        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(trace_layer());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "req-span-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        assert_eq!(recorded.get("request_id").as_deref(), Some("req-span-1"));
        assert_eq!(recorded.get("status").as_deref(), Some("200"));
        assert!(recorded.get("latency_ms").is_some());
    }
}
