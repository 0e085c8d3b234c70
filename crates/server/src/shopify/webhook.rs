//! Shopify webhook verification and payloads.
//!
//! Shopify signs every webhook with `base64(HMAC-SHA256(api_secret, body))`
//! in `X-Shopify-Hmac-Sha256`. The signature covers the raw bytes, so
//! verification must run before the body is parsed.

use axum::http::HeaderMap;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use delivery_dates_core::{OrderId, ShopDomain, ShopDomainError};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const HMAC_HEADER: &str = "x-shopify-hmac-sha256";
pub const SHOP_DOMAIN_HEADER: &str = "x-shopify-shop-domain";
pub const TOPIC_HEADER: &str = "x-shopify-topic";
pub const WEBHOOK_ID_HEADER: &str = "x-shopify-webhook-id";

/// Errors from webhook intake.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// A required Shopify header is absent or not valid UTF-8.
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// The shop header is not a `*.myshopify.com` domain.
    #[error("invalid shop domain: {0}")]
    InvalidShop(#[from] ShopDomainError),

    /// HMAC did not match the body.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Body is not a valid order payload.
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Verify a webhook body against its `X-Shopify-Hmac-Sha256` header.
///
/// The comparison is constant time. A header that is not valid base64
/// fails verification.
#[must_use]
pub fn verify_webhook_hmac(body: &[u8], header_b64: &str, secret: &str) -> bool {
    let Ok(expected) = BASE64.decode(header_b64.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the header value Shopify would send for `body`.
///
/// Returns `None` only if the MAC cannot be keyed.
#[must_use]
pub fn sign_webhook_body(body: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

/// Shopify headers carried by every webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    /// Base64 HMAC signature.
    pub hmac: String,
    /// Originating shop.
    pub shop: ShopDomain,
    /// Topic, e.g. `orders/create`.
    pub topic: String,
    /// Delivery id, stable across Shopify's redeliveries.
    pub webhook_id: Option<String>,
}

impl WebhookHeaders {
    /// Extract the Shopify headers.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::MissingHeader` for an absent HMAC, shop or
    /// topic header, and `WebhookError::InvalidShop` for a malformed shop.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, WebhookError> {
        let hmac = required_header(headers, HMAC_HEADER)?;
        let shop = ShopDomain::parse(&required_header(headers, SHOP_DOMAIN_HEADER)?)?;
        let topic = required_header(headers, TOPIC_HEADER)?;
        let webhook_id = optional_header(headers, WEBHOOK_ID_HEADER);

        Ok(Self {
            hmac,
            shop,
            topic,
            webhook_id,
        })
    }

    /// Key used for duplicate detection.
    ///
    /// Falls back to a digest of the body when Shopify omits the delivery id.
    #[must_use]
    pub fn dedupe_id(&self, body: &[u8]) -> String {
        self.webhook_id.clone().unwrap_or_else(|| {
            let digest = Sha256::digest(body);
            format!("{}:{}:{}", self.shop, self.topic, hex::encode(digest))
        })
    }
}

fn required_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    optional_header(headers, name).ok_or(WebhookError::MissingHeader(name))
}

fn optional_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Payloads
// =============================================================================

/// The parts of an order webhook this service reads.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderWebhookPayload {
    /// Numeric order id.
    pub id: OrderId,
    /// Display name, e.g. `#1001`.
    #[serde(default)]
    pub name: Option<String>,
    /// Checkout note attributes.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub note_attributes: Vec<NoteAttribute>,
    /// Order creation timestamp as sent by Shopify.
    #[serde(default)]
    pub created_at: Option<String>,
}

impl OrderWebhookPayload {
    /// Parse a raw webhook body.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::InvalidPayload` if the body is not an order.
    pub fn from_slice(body: &[u8]) -> Result<Self, WebhookError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// A checkout note attribute.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct NoteAttribute {
    pub name: String,
    #[serde(default, deserialize_with = "value_as_text")]
    pub value: Option<String>,
}

impl NoteAttribute {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<NoteAttribute>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<NoteAttribute>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Note attribute values are usually strings, but storefront scripts
/// occasionally post numbers or booleans.
fn value_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "shpss_test_secret";

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_verify_webhook_hmac_valid() {
        let body = br#"{"id":1}"#;
        let signature = sign_webhook_body(body, SECRET).unwrap();
        assert!(verify_webhook_hmac(body, &signature, SECRET));
    }

    #[test]
    fn test_verify_webhook_hmac_tampered_body() {
        let signature = sign_webhook_body(br#"{"id":1}"#, SECRET).unwrap();
        assert!(!verify_webhook_hmac(br#"{"id":2}"#, &signature, SECRET));
    }

    #[test]
    fn test_verify_webhook_hmac_wrong_secret() {
        let body = br#"{"id":1}"#;
        let signature = sign_webhook_body(body, "other_secret").unwrap();
        assert!(!verify_webhook_hmac(body, &signature, SECRET));
    }

    #[test]
    fn test_verify_webhook_hmac_malformed_header() {
        assert!(!verify_webhook_hmac(b"{}", "not base64!!", SECRET));
        assert!(!verify_webhook_hmac(b"{}", "", SECRET));
    }

    #[test]
    fn test_verify_webhook_hmac_known_vector() {
        // RFC 4231 test case 2
        let signature = BASE64.encode(
            hex::decode("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
                .unwrap(),
        );
        assert!(verify_webhook_hmac(
            b"what do ya want for nothing?",
            &signature,
            "Jefe"
        ));
    }

    #[test]
    fn test_headers_extracted() {
        let map = headers(&[
            (HMAC_HEADER, "abc="),
            (SHOP_DOMAIN_HEADER, "Store.myshopify.com"),
            (TOPIC_HEADER, "orders/create"),
            (WEBHOOK_ID_HEADER, "b54557e4-bdd9-4b37-8a5f-bf7d70bcd043"),
        ]);
        let parsed = WebhookHeaders::from_headers(&map).unwrap();
        assert_eq!(parsed.shop.as_str(), "store.myshopify.com");
        assert_eq!(parsed.topic, "orders/create");
        assert_eq!(
            parsed.dedupe_id(b"{}"),
            "b54557e4-bdd9-4b37-8a5f-bf7d70bcd043"
        );
    }

    #[test]
    fn test_headers_missing_hmac() {
        let map = headers(&[
            (SHOP_DOMAIN_HEADER, "store.myshopify.com"),
            (TOPIC_HEADER, "orders/create"),
        ]);
        let err = WebhookHeaders::from_headers(&map).unwrap_err();
        assert!(matches!(err, WebhookError::MissingHeader(HMAC_HEADER)));
    }

    #[test]
    fn test_headers_invalid_shop() {
        let map = headers(&[
            (HMAC_HEADER, "abc="),
            (SHOP_DOMAIN_HEADER, "evil.example.com"),
            (TOPIC_HEADER, "orders/create"),
        ]);
        assert!(matches!(
            WebhookHeaders::from_headers(&map),
            Err(WebhookError::InvalidShop(_))
        ));
    }

    #[test]
    fn test_dedupe_id_falls_back_to_body_digest() {
        let map = headers(&[
            (HMAC_HEADER, "abc="),
            (SHOP_DOMAIN_HEADER, "store.myshopify.com"),
            (TOPIC_HEADER, "orders/create"),
        ]);
        let parsed = WebhookHeaders::from_headers(&map).unwrap();
        let a = parsed.dedupe_id(b"one");
        let b = parsed.dedupe_id(b"two");
        assert_ne!(a, b);
        assert!(a.starts_with("store.myshopify.com:orders/create:"));
    }

    #[test]
    fn test_payload_parses_and_ignores_unknown_fields() {
        let body = br##"{
            "id": 820982911946154508,
            "name": "#9999",
            "email": "jon@example.com",
            "created_at": "2026-01-02T10:00:00-05:00",
            "note_attributes": [
                {"name": "delivery_date", "value": "2026-01-05"},
                {"name": "gift", "value": true},
                {"name": "empty", "value": null}
            ]
        }"##;
        let payload = OrderWebhookPayload::from_slice(body).unwrap();
        assert_eq!(payload.id.as_i64(), 820_982_911_946_154_508);
        assert_eq!(payload.name.as_deref(), Some("#9999"));
        assert_eq!(payload.note_attributes.len(), 3);
        assert_eq!(payload.note_attributes[1].value.as_deref(), Some("true"));
        assert_eq!(payload.note_attributes[2].value, None);
    }

    #[test]
    fn test_payload_null_note_attributes() {
        let payload = OrderWebhookPayload::from_slice(br#"{"id": 1, "note_attributes": null}"#)
            .unwrap();
        assert!(payload.note_attributes.is_empty());
    }

    #[test]
    fn test_payload_missing_id_is_invalid() {
        assert!(matches!(
            OrderWebhookPayload::from_slice(br##"{"name": "#1"}"##),
            Err(WebhookError::InvalidPayload(_))
        ));
    }
}
