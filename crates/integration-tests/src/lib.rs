//! End-to-end test harness for the delivery dates service.
//!
//! Each [`TestApp`] runs the real router on an ephemeral port, backed by an
//! in-memory KV store, with the Shopify Admin API and `DutchNed` replaced by
//! one mock `axum` server ([`MockUpstream`]). No database or network access
//! is needed:
//!
//! ```bash
//! cargo test -p delivery-dates-integration-tests
//! ```

#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Days, Utc};
use delivery_dates_core::ShopDomain;
use delivery_dates_server::config::{
    DutchNedConfig, PipelineConfig, ServiceConfig, ShopifyAppConfig,
};
use delivery_dates_server::kv::{MemoryKvStore, SharedKv};
use delivery_dates_server::middleware::{request_id_middleware, trace_layer};
use delivery_dates_server::routes;
use delivery_dates_server::services::{MetafieldService, RetryPolicy};
use delivery_dates_server::shopify::AdminClient;
use delivery_dates_server::shopify::webhook::{
    HMAC_HEADER, SHOP_DOMAIN_HEADER, TOPIC_HEADER, WEBHOOK_ID_HEADER, sign_webhook_body,
};
use delivery_dates_server::state::AppState;
use hmac::{Hmac, Mac};
use secrecy::SecretString;
use serde_json::{Value, json};
use sha2::Sha256;
use tokio::net::TcpListener;

pub const SHOP: &str = "test-shop.myshopify.com";
pub const API_KEY: &str = "integration-api-key";
pub const API_SECRET: &str = "integration-api-secret";
pub const ACCESS_TOKEN: &str = "shpat_integration_token";
pub const ADMIN_TOKEN: &str = "Zq8xLw3nVt6pRk2mYh9cBf4jDs7gNa5e";
pub const OAUTH_CODE: &str = "install-code";
pub const NAMESPACE: &str = "custom";
/// Postal code the mock `DutchNed` answers with HTTP 503.
pub const FAILING_POSTAL_CODE: &str = "9999ZZ";

// =============================================================================
// Mock upstream (Shopify Admin API + DutchNed)
// =============================================================================

/// A one-off answer to the next GraphQL call.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// HTTP 429 with this `Retry-After` header value.
    TooManyRequests { retry_after: &'static str },
    /// HTTP 200 carrying a `THROTTLED` GraphQL error (cost limit).
    Throttled,
}

/// Recorded state of the mock upstream APIs.
#[derive(Debug, Default)]
pub struct MockUpstream {
    /// Order GID -> metafield nodes.
    orders: Mutex<HashMap<String, Vec<Value>>>,
    /// When set, every GraphQL call answers with this status.
    fail_status: Mutex<Option<u16>>,
    /// Answers used, in order, before normal handling resumes.
    scripted: Mutex<VecDeque<ScriptedResponse>>,
    /// GraphQL operation names, in call order.
    operations: Mutex<Vec<String>>,
    /// `(topic, callback_url)` subscriptions.
    subscriptions: Mutex<Vec<(String, String)>>,
    /// Query strings received by the `DutchNed` mock.
    dutchned_queries: Mutex<Vec<HashMap<String, String>>>,
    next_id: Mutex<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MockUpstream {
    /// Make an order exist with no metafields.
    pub fn add_order(&self, order_id: i64) {
        lock(&self.orders)
            .entry(order_gid(order_id))
            .or_default();
    }

    /// Current value of an order metafield in [`NAMESPACE`].
    #[must_use]
    pub fn metafield(&self, order_id: i64, key: &str) -> Option<(String, String)> {
        lock(&self.orders)
            .get(&order_gid(order_id))?
            .iter()
            .find(|m| m["namespace"] == NAMESPACE && m["key"] == key)
            .map(|m| {
                (
                    m["type"].as_str().unwrap_or_default().to_string(),
                    m["value"].as_str().unwrap_or_default().to_string(),
                )
            })
    }

    /// Store a metafield on an order directly.
    pub fn set_metafield(&self, order_id: i64, namespace: &str, key: &str, kind: &str, value: &str) {
        let node = json!({
            "id": format!("gid://shopify/Metafield/{}", self.next_id()),
            "namespace": namespace,
            "key": key,
            "type": kind,
            "value": value,
        });
        let mut orders = lock(&self.orders);
        let nodes = orders.entry(order_gid(order_id)).or_default();
        nodes.retain(|m| !(m["namespace"] == namespace && m["key"] == key));
        nodes.push(node);
    }

    /// Answer the next GraphQL call with `response`.
    pub fn respond_once(&self, response: ScriptedResponse) {
        lock(&self.scripted).push_back(response);
    }

    /// Answer every GraphQL call with `status` (or stop failing with `None`).
    pub fn fail_with(&self, status: Option<u16>) {
        *lock(&self.fail_status) = status;
    }

    /// How many times a GraphQL operation was called.
    #[must_use]
    pub fn operation_count(&self, name: &str) -> usize {
        lock(&self.operations).iter().filter(|op| *op == name).count()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        lock(&self.subscriptions).clone()
    }

    #[must_use]
    pub fn dutchned_queries(&self) -> Vec<HashMap<String, String>> {
        lock(&self.dutchned_queries).clone()
    }

    fn next_id(&self) -> u64 {
        let mut id = lock(&self.next_id);
        *id += 1;
        *id
    }
}

#[must_use]
pub fn order_gid(order_id: i64) -> String {
    format!("gid://shopify/Order/{order_id}")
}

fn mock_router(mock: Arc<MockUpstream>) -> Router {
    Router::new()
        .route("/admin/api/{version}/graphql.json", post(mock_graphql))
        .route("/admin/oauth/access_token", post(mock_access_token))
        .route("/delivery-dates", get(mock_delivery_dates))
        .with_state(mock)
}

async fn mock_graphql(
    State(mock): State<Arc<MockUpstream>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if headers
        .get("x-shopify-access-token")
        .and_then(|v| v.to_str().ok())
        != Some(ACCESS_TOKEN)
    {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let operation = body["operationName"].as_str().unwrap_or_default().to_string();
    lock(&mock.operations).push(operation.clone());

    let scripted = lock(&mock.scripted).pop_front();
    match scripted {
        Some(ScriptedResponse::TooManyRequests { retry_after }) => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", retry_after)],
                "Exceeded 2 calls per second for api client",
            )
                .into_response();
        }
        Some(ScriptedResponse::Throttled) => {
            return Json(json!({
                "errors": [{
                    "message": "Throttled",
                    "extensions": { "code": "THROTTLED" }
                }]
            }))
            .into_response();
        }
        None => {}
    }

    if let Some(status) = *lock(&mock.fail_status) {
        return StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }

    let variables = &body["variables"];
    let data = match operation.as_str() {
        "OrderMetafields" => {
            let id = variables["id"].as_str().unwrap_or_default();
            let keys: Vec<&str> = variables["keys"]
                .as_array()
                .map(|keys| keys.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let first = variables["first"]
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0);
            match lock(&mock.orders).get(id) {
                Some(nodes) => {
                    // Shopify pages by `first` after filtering on `keys`
                    let nodes: Vec<&Value> = nodes
                        .iter()
                        .filter(|m| {
                            let full_key = format!(
                                "{}.{}",
                                m["namespace"].as_str().unwrap_or_default(),
                                m["key"].as_str().unwrap_or_default()
                            );
                            keys.contains(&full_key.as_str())
                        })
                        .take(first)
                        .collect();
                    json!({ "order": { "id": id, "metafields": { "nodes": nodes } } })
                }
                None => json!({ "order": null }),
            }
        }
        "MetafieldsSet" => {
            let inputs = variables["metafields"].as_array().cloned().unwrap_or_default();
            let mut written = Vec::with_capacity(inputs.len());
            for input in inputs {
                let owner = input["ownerId"].as_str().unwrap_or_default().to_string();
                let node_id = format!("gid://shopify/Metafield/{}", mock.next_id());
                let mut orders = lock(&mock.orders);
                let nodes = orders.entry(owner).or_default();
                nodes.retain(|m| {
                    !(m["namespace"] == input["namespace"] && m["key"] == input["key"])
                });
                let node = json!({
                    "id": node_id,
                    "namespace": input["namespace"],
                    "key": input["key"],
                    "type": input["type"],
                    "value": input["value"],
                });
                nodes.push(node.clone());
                written.push(node);
            }
            json!({ "metafieldsSet": { "metafields": written, "userErrors": [] } })
        }
        "WebhookSubscriptionCreate" => {
            let topic = variables["topic"].as_str().unwrap_or_default().to_string();
            let url = variables["webhookSubscription"]["callbackUrl"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let mut subscriptions = lock(&mock.subscriptions);
            if subscriptions.iter().any(|(t, u)| *t == topic && *u == url) {
                json!({ "webhookSubscriptionCreate": {
                    "webhookSubscription": null,
                    "userErrors": [{
                        "field": ["webhookSubscription", "callbackUrl"],
                        "message": "Address for this topic has already been taken"
                    }]
                }})
            } else {
                subscriptions.push((topic, url));
                let id = format!("gid://shopify/WebhookSubscription/{}", mock.next_id());
                json!({ "webhookSubscriptionCreate": {
                    "webhookSubscription": { "id": id },
                    "userErrors": []
                }})
            }
        }
        _ => return (StatusCode::BAD_REQUEST, "unknown operation").into_response(),
    };

    Json(json!({ "data": data })).into_response()
}

async fn mock_access_token(Form(form): Form<HashMap<String, String>>) -> Response {
    let valid = form.get("client_id").map(String::as_str) == Some(API_KEY)
        && form.get("client_secret").map(String::as_str) == Some(API_SECRET)
        && form.get("code").map(String::as_str) == Some(OAUTH_CODE);
    if !valid {
        return (StatusCode::BAD_REQUEST, "invalid_request").into_response();
    }
    Json(json!({ "access_token": ACCESS_TOKEN, "scope": "write_orders,read_orders" }))
        .into_response()
}

async fn mock_delivery_dates(
    State(mock): State<Arc<MockUpstream>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Basic "));
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let failing = query.get("postal_code").map(String::as_str) == Some(FAILING_POSTAL_CODE);
    lock(&mock.dutchned_queries).push(query);
    if failing {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let today = Utc::now().date_naive();
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    let later = today.checked_add_days(Days::new(2)).unwrap_or(today);

    Json(json!({
        "deliveryDates": [
            { "date": yesterday.format("%d-%m-%Y").to_string(), "shippingMethods": [] },
            {
                "date": tomorrow.format("%Y-%m-%d").to_string(),
                "shippingMethods": [
                    { "code": "EVE", "name": "Evening", "price": "4.95" },
                    { "code": "STD", "name": "Standard", "price": 0 }
                ]
            },
            { "date": later.format("%Y-%m-%d").to_string(), "shippingMethods": [] }
        ]
    }))
    .into_response()
}

// =============================================================================
// Test application
// =============================================================================

/// The service under test plus its mock upstream.
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub state: AppState,
    pub mock: Arc<MockUpstream>,
}

/// Pipeline tuning for tests: retries are due immediately.
#[must_use]
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        base_retry_delay: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_pipeline_config()).await
    }

    pub async fn spawn_with(pipeline: PipelineConfig) -> Self {
        Self::spawn_with_retry(pipeline, RetryPolicy::immediate()).await
    }

    /// Spawn with a custom per-call Admin API retry policy.
    pub async fn spawn_with_retry(pipeline: PipelineConfig, retry: RetryPolicy) -> Self {
        let mock = Arc::new(MockUpstream::default());
        let mock_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let mock_url = format!(
            "http://{}",
            mock_listener.local_addr().expect("mock address")
        );
        let router = mock_router(mock.clone());
        tokio::spawn(async move { axum::serve(mock_listener, router).await });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind app");
        let addr = listener.local_addr().expect("app address");
        let base_url = format!("http://{addr}");

        let config = ServiceConfig {
            database_url: None,
            host: addr.ip(),
            port: addr.port(),
            base_url: base_url.clone(),
            admin_token: SecretString::from(ADMIN_TOKEN),
            shopify: ShopifyAppConfig {
                api_key: API_KEY.to_string(),
                api_secret: SecretString::from(API_SECRET),
                api_version: "2025-01".to_string(),
                metafield_namespace: NAMESPACE.to_string(),
            },
            dutchned: DutchNedConfig {
                api_url: mock_url.clone(),
                username: "dutchned-user".to_string(),
                password: SecretString::from("dutchned-password"),
                cache_ttl: Duration::from_secs(60),
            },
            pipeline,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 0.0,
            sentry_traces_sample_rate: 0.0,
        };

        let kv: SharedKv = Arc::new(MemoryKvStore::new());
        let shopify = AdminClient::with_base_url(&config.shopify, &mock_url)
            .expect("Failed to build Shopify client");
        let metafields =
            MetafieldService::new(shopify.clone(), NAMESPACE).with_retry_policy(retry);
        let state = AppState::with_clients(config, kv, shopify, metafields)
            .expect("Failed to build app state");

        let app = routes::router(state.clone())
            .layer(axum::middleware::from_fn(request_id_middleware))
            .layer(trace_layer());
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            state,
            mock,
        }
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    #[must_use]
    pub fn shop() -> ShopDomain {
        ShopDomain::parse(SHOP).expect("valid test shop")
    }

    /// Store the access token the mock Shopify accepts.
    pub async fn install_token(&self) {
        self.state
            .tokens()
            .save(&Self::shop(), ACCESS_TOKEN, vec!["write_orders".to_string()])
            .await
            .expect("Failed to store token");
    }

    /// Deliver a signed webhook.
    pub async fn send_webhook(
        &self,
        topic: &str,
        webhook_id: Option<&str>,
        payload: &Value,
    ) -> reqwest::Response {
        let body = serde_json::to_vec(payload).expect("serializable payload");
        let signature = sign_webhook_body(&body, API_SECRET).expect("signable body");
        self.send_raw_webhook(topic, webhook_id, body, &signature).await
    }

    /// Deliver a webhook with an explicit signature.
    pub async fn send_raw_webhook(
        &self,
        topic: &str,
        webhook_id: Option<&str>,
        body: Vec<u8>,
        signature: &str,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url(&format!("/api/webhooks/{topic}")))
            .header("content-type", "application/json")
            .header(HMAC_HEADER, signature)
            .header(SHOP_DOMAIN_HEADER, SHOP)
            .header(TOPIC_HEADER, topic);
        if let Some(id) = webhook_id {
            request = request.header(WEBHOOK_ID_HEADER, id);
        }
        request
            .body(body)
            .send()
            .await
            .expect("Failed to send webhook")
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/admin{path}")))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("Failed to call admin endpoint")
    }

    pub async fn admin_post(&self, path: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/admin{path}")))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("Failed to call admin endpoint")
    }

    pub async fn admin_delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(&format!("/admin{path}")))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("Failed to call admin endpoint")
    }
}

/// An order webhook body with the given note attributes.
#[must_use]
pub fn order_payload(order_id: i64, attributes: &[(&str, &str)]) -> Value {
    let note_attributes: Vec<Value> = attributes
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    json!({
        "id": order_id,
        "name": format!("#{order_id}"),
        "note_attributes": note_attributes,
        "created_at": "2026-01-02T10:00:00Z"
    })
}

/// Query parameters of an OAuth callback, signed like Shopify does.
#[must_use]
pub fn signed_callback_query(params: &[(&str, &str)], secret: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    let mut sorted = pairs.clone();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let message = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("any key size");
    mac.update(message.as_bytes());
    pairs.push(("hmac".to_string(), hex::encode(mac.finalize().into_bytes())));
    pairs
}

/// Encode query pairs for a URL.
#[must_use]
pub fn encode_query(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
