//! Shopify Admin API types used by the metafield pipeline.

use serde::{Deserialize, Serialize};

/// Shopify metafield value types written by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetafieldType {
    /// ISO 8601 calendar date.
    Date,
    /// Single line of text, at most 255 characters in this service.
    SingleLineTextField,
}

impl MetafieldType {
    /// The type name the Admin API expects.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::SingleLineTextField => "single_line_text_field",
        }
    }
}

impl std::fmt::Display for MetafieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metafield value to write on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafieldValue {
    /// Metafield key within the configured namespace.
    pub key: String,
    /// Metafield type.
    #[serde(rename = "type")]
    pub kind: MetafieldType,
    /// Serialized value.
    pub value: String,
}

/// A metafield already stored on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingMetafield {
    /// Metafield GID.
    pub id: String,
    /// Namespace.
    pub namespace: String,
    /// Key.
    pub key: String,
    /// Type name as returned by the API.
    #[serde(rename = "type")]
    pub kind: String,
    /// Serialized value.
    pub value: String,
}

/// Wire input for the `metafieldsSet` mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetafieldsSetInput {
    /// Owner GID (`gid://shopify/Order/{id}`).
    pub owner_id: String,
    /// Namespace.
    pub namespace: String,
    /// Key.
    pub key: String,
    /// Type name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Serialized value.
    pub value: String,
}

/// A user error returned by a GraphQL mutation.
#[derive(Debug, Clone, Deserialize)]
pub struct UserError {
    /// Path to the offending input field.
    #[serde(default)]
    pub field: Option<Vec<String>>,
    /// Human-readable message.
    pub message: String,
}

impl UserError {
    /// Render as `field.path: message`.
    #[must_use]
    pub fn describe(&self) -> String {
        let field = self.field.as_ref().map_or_else(String::new, |f| f.join("."));
        if field.is_empty() {
            self.message.clone()
        } else {
            format!("{field}: {}", self.message)
        }
    }
}

/// Result of registering a webhook subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookRegistration {
    /// A new subscription was created.
    Created {
        /// Subscription GID.
        id: String,
    },
    /// Shopify already has a subscription for this topic and address.
    AlreadyRegistered,
}
