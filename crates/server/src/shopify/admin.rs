//! Shopify Admin API GraphQL client.
//!
//! Shop tokens are passed per call; one client serves every installed shop.

use std::sync::Arc;
use std::time::Duration;

use delivery_dates_core::{OrderId, ShopDomain};
use graphql_client::QueryBody;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::instrument;

use crate::config::ShopifyAppConfig;

use super::{
    AdminShopifyError, ExistingMetafield, GraphQLError, MetafieldsSetInput, UserError,
    WebhookRegistration,
};

/// Webhook topics registered on install.
pub const WEBHOOK_TOPICS: &[&str] = &["orders/create", "orders/updated", "app/uninstalled"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Fallback when a 429 has no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 2;

const ORDER_METAFIELDS_QUERY: &str = r"
query OrderMetafields($id: ID!, $keys: [String!]!, $first: Int!) {
  order(id: $id) {
    id
    metafields(first: $first, keys: $keys) {
      nodes { id namespace key type value }
    }
  }
}
";

const METAFIELDS_SET_MUTATION: &str = r"
mutation MetafieldsSet($metafields: [MetafieldsSetInput!]!) {
  metafieldsSet(metafields: $metafields) {
    metafields { id namespace key type value }
    userErrors { field message }
  }
}
";

const WEBHOOK_SUBSCRIPTION_CREATE_MUTATION: &str = r"
mutation WebhookSubscriptionCreate($topic: WebhookSubscriptionTopic!, $webhookSubscription: WebhookSubscriptionInput!) {
  webhookSubscriptionCreate(topic: $topic, webhookSubscription: $webhookSubscription) {
    webhookSubscription { id }
    userErrors { field message }
  }
}
";

/// OAuth token returned by the code exchange.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    /// The access token for API calls
    pub access_token: String,
    /// Granted scopes (comma separated)
    pub scope: String,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Shopify Admin API GraphQL client.
///
/// # Security
///
/// Holds the app's API secret for the OAuth code exchange. Shop access
/// tokens are never cached here.
#[derive(Clone)]
pub struct AdminClient {
    inner: Arc<AdminClientInner>,
}

struct AdminClientInner {
    client: reqwest::Client,
    api_version: String,
    api_key: String,
    api_secret: SecretString,
    /// Replaces `https://{shop}` when set (local mock servers).
    base_url: Option<String>,
}

impl std::fmt::Debug for AdminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminClient")
            .field("api_version", &self.inner.api_version)
            .field("api_key", &self.inner.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("base_url", &self.inner.base_url)
            .finish()
    }
}

/// GraphQL response wrapper.
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLErrorResponse>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorResponse {
    message: String,
    #[serde(default)]
    extensions: Option<GraphQLErrorExtensions>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorExtensions {
    code: Option<String>,
}

/// OAuth token response from Shopify.
#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    scope: String,
}

// =============================================================================
// Query payloads
// =============================================================================

#[derive(Debug, Serialize)]
struct OrderMetafieldsVariables {
    id: String,
    /// `namespace.key` identifiers
    keys: Vec<String>,
    first: usize,
}

#[derive(Debug, Deserialize)]
struct OrderMetafieldsData {
    order: Option<OrderMetafieldsNode>,
}

#[derive(Debug, Deserialize)]
struct OrderMetafieldsNode {
    metafields: Nodes<ExistingMetafield>,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Serialize)]
struct MetafieldsSetVariables<'a> {
    metafields: &'a [MetafieldsSetInput],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetafieldsSetData {
    metafields_set: Option<MetafieldsSetPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetafieldsSetPayload {
    #[serde(default)]
    metafields: Option<Vec<ExistingMetafield>>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookSubscriptionCreateVariables {
    topic: String,
    webhook_subscription: WebhookSubscriptionInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookSubscriptionInput {
    callback_url: String,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookSubscriptionCreateData {
    webhook_subscription_create: Option<WebhookSubscriptionCreatePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookSubscriptionCreatePayload {
    webhook_subscription: Option<WebhookSubscriptionNode>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct WebhookSubscriptionNode {
    id: String,
}

impl AdminClient {
    /// Create a new Admin API client.
    ///
    /// # Errors
    ///
    /// Returns `AdminShopifyError::Http` if the HTTP client fails to build.
    pub fn new(config: &ShopifyAppConfig) -> Result<Self, AdminShopifyError> {
        Self::build(config, None)
    }

    /// Send every request to `base_url` instead of the shop's domain.
    ///
    /// # Errors
    ///
    /// Returns `AdminShopifyError::Http` if the HTTP client fails to build.
    pub fn with_base_url(
        config: &ShopifyAppConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, AdminShopifyError> {
        Self::build(
            config,
            Some(base_url.into().trim_end_matches('/').to_string()),
        )
    }

    fn build(
        config: &ShopifyAppConfig,
        base_url: Option<String>,
    ) -> Result<Self, AdminShopifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            inner: Arc::new(AdminClientInner {
                client,
                api_version: config.api_version.clone(),
                api_key: config.api_key.clone(),
                api_secret: config.api_secret.clone(),
                base_url,
            }),
        })
    }

    /// The Admin API version in use.
    #[must_use]
    pub fn api_version(&self) -> &str {
        &self.inner.api_version
    }

    fn shop_base(&self, shop: &ShopDomain) -> String {
        self.inner
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{shop}"))
    }

    // =========================================================================
    // OAuth
    // =========================================================================

    /// Exchange an authorization code for an access token.
    ///
    /// # Errors
    ///
    /// Returns `AdminShopifyError::OAuth` if the token exchange fails.
    /// Returns `AdminShopifyError::Http` if the HTTP request fails.
    #[instrument(skip(self, code), fields(shop = %shop))]
    pub async fn exchange_code(
        &self,
        shop: &ShopDomain,
        code: &str,
    ) -> Result<OAuthToken, AdminShopifyError> {
        let url = format!("{}/admin/oauth/access_token", self.shop_base(shop));

        let params = [
            ("client_id", self.inner.api_key.as_str()),
            ("client_secret", self.inner.api_secret.expose_secret()),
            ("code", code),
        ];

        let response = self.inner.client.post(&url).form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AdminShopifyError::OAuth(format!(
                "Token exchange failed ({status}): {text}"
            )));
        }

        let token_response: OAuthTokenResponse = response.json().await?;

        Ok(OAuthToken {
            access_token: token_response.access_token,
            scope: token_response.scope,
        })
    }

    // =========================================================================
    // GraphQL Execution
    // =========================================================================

    /// Execute a GraphQL operation against a shop.
    async fn execute<V: Serialize, T: DeserializeOwned>(
        &self,
        shop: &ShopDomain,
        access_token: &str,
        operation_name: &'static str,
        query: &'static str,
        variables: V,
    ) -> Result<T, AdminShopifyError> {
        let endpoint = format!(
            "{}/admin/api/{}/graphql.json",
            self.shop_base(shop),
            self.inner.api_version
        );

        let body = QueryBody {
            variables,
            query,
            operation_name,
        };

        let response = self
            .inner
            .client
            .post(&endpoint)
            .header("X-Shopify-Access-Token", access_token)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(AdminShopifyError::RateLimited(retry_after));
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AdminShopifyError::Unauthorized(
                "Invalid or expired access token".to_string(),
            ));
        }

        if status == StatusCode::NOT_FOUND {
            return Err(AdminShopifyError::NotFound(format!("shop {shop}")));
        }

        if status.is_server_error() {
            return Err(AdminShopifyError::Server(status.as_u16()));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AdminShopifyError::UnexpectedStatus(status.as_u16(), text));
        }

        let graphql_response: GraphQLResponse<T> = response.json().await?;

        if let Some(errors) = graphql_response.errors
            && !errors.is_empty()
        {
            let converted: Vec<GraphQLError> = errors
                .into_iter()
                .map(|e| GraphQLError {
                    message: e.message,
                    code: e.extensions.and_then(|x| x.code),
                })
                .collect();

            // Cost-based throttling arrives as a 200 with a THROTTLED error
            if converted
                .iter()
                .any(|e| e.code.as_deref() == Some("THROTTLED"))
            {
                return Err(AdminShopifyError::RateLimited(DEFAULT_RETRY_AFTER_SECS));
            }
            return Err(AdminShopifyError::GraphQL(converted));
        }

        graphql_response.data.ok_or_else(|| {
            AdminShopifyError::GraphQL(vec![GraphQLError {
                message: "No data in response".to_string(),
                code: None,
            }])
        })
    }

    // =========================================================================
    // Metafields
    // =========================================================================

    /// Read the order's metafields `namespace.{key}` for each of `keys`.
    ///
    /// Only the requested keys are fetched, so other metafields on the order
    /// cannot push them out of the page.
    ///
    /// # Errors
    ///
    /// Returns `AdminShopifyError::NotFound` if the order does not exist,
    /// or any error from the API call.
    #[instrument(skip(self, access_token), fields(shop = %shop, order_id = %order_id))]
    pub async fn order_metafields(
        &self,
        shop: &ShopDomain,
        access_token: &str,
        order_id: OrderId,
        namespace: &str,
        keys: &[&str],
    ) -> Result<Vec<ExistingMetafield>, AdminShopifyError> {
        let variables = OrderMetafieldsVariables {
            id: order_id.to_gid(),
            keys: keys.iter().map(|key| format!("{namespace}.{key}")).collect(),
            first: keys.len(),
        };

        let data: OrderMetafieldsData = self
            .execute(
                shop,
                access_token,
                "OrderMetafields",
                ORDER_METAFIELDS_QUERY,
                variables,
            )
            .await?;

        let order = data
            .order
            .ok_or_else(|| AdminShopifyError::NotFound(order_id.to_gid()))?;

        Ok(order.metafields.nodes)
    }

    /// Create or update metafields in one `metafieldsSet` call.
    ///
    /// # Errors
    ///
    /// Returns `AdminShopifyError::UserError` if Shopify rejects the input.
    #[instrument(skip(self, access_token, inputs), fields(shop = %shop, count = inputs.len()))]
    pub async fn set_metafields(
        &self,
        shop: &ShopDomain,
        access_token: &str,
        inputs: &[MetafieldsSetInput],
    ) -> Result<Vec<ExistingMetafield>, AdminShopifyError> {
        let variables = MetafieldsSetVariables { metafields: inputs };

        let data: MetafieldsSetData = self
            .execute(
                shop,
                access_token,
                "MetafieldsSet",
                METAFIELDS_SET_MUTATION,
                variables,
            )
            .await?;

        let payload = data
            .metafields_set
            .ok_or_else(|| AdminShopifyError::UserError("Empty metafieldsSet payload".to_string()))?;

        if !payload.user_errors.is_empty() {
            return Err(AdminShopifyError::UserError(join_user_errors(
                &payload.user_errors,
            )));
        }

        Ok(payload.metafields.unwrap_or_default())
    }

    // =========================================================================
    // Webhooks
    // =========================================================================

    /// Subscribe `callback_url` to `topic` (e.g. `orders/create`).
    ///
    /// An existing subscription for the same address is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AdminShopifyError::UserError` for any other rejection.
    #[instrument(skip(self, access_token), fields(shop = %shop))]
    pub async fn register_webhook(
        &self,
        shop: &ShopDomain,
        access_token: &str,
        topic: &str,
        callback_url: &str,
    ) -> Result<WebhookRegistration, AdminShopifyError> {
        let variables = WebhookSubscriptionCreateVariables {
            topic: topic_enum(topic),
            webhook_subscription: WebhookSubscriptionInput {
                callback_url: callback_url.to_string(),
                format: "JSON",
            },
        };

        let data: WebhookSubscriptionCreateData = self
            .execute(
                shop,
                access_token,
                "WebhookSubscriptionCreate",
                WEBHOOK_SUBSCRIPTION_CREATE_MUTATION,
                variables,
            )
            .await?;

        let payload = data.webhook_subscription_create.ok_or_else(|| {
            AdminShopifyError::UserError("Empty webhookSubscriptionCreate payload".to_string())
        })?;

        if !payload.user_errors.is_empty() {
            if payload
                .user_errors
                .iter()
                .all(|e| e.message.to_lowercase().contains("already been taken"))
            {
                return Ok(WebhookRegistration::AlreadyRegistered);
            }
            return Err(AdminShopifyError::UserError(join_user_errors(
                &payload.user_errors,
            )));
        }

        payload
            .webhook_subscription
            .map(|s| WebhookRegistration::Created { id: s.id })
            .ok_or_else(|| {
                AdminShopifyError::UserError("No webhook subscription returned".to_string())
            })
    }
}

/// `orders/create` -> `ORDERS_CREATE`.
fn topic_enum(topic: &str) -> String {
    topic.replace('/', "_").to_uppercase()
}

/// Shopify sends `Retry-After` as seconds, sometimes fractional (`2.0`).
fn parse_retry_after(value: &str) -> Option<u64> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(secs.ceil() as u64)
}

fn join_user_errors(errors: &[UserError]) -> String {
    errors
        .iter()
        .map(UserError::describe)
        .collect::<Vec<_>>()
        .join("; ")
}
