//! Newtype IDs for type-safe Shopify resource references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different resource types. Shopify numeric IDs
//! exceed `i32`, so the wrappers hold an `i64`.

/// Macro to define a type-safe Shopify ID wrapper.
///
/// Creates a newtype wrapper around `i64` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `Ord`
/// - Conversion methods: `new()`, `as_i64()`
/// - GraphQL global ID helpers: `to_gid()`, `from_gid()`
/// - `From<i64>` and `Into<i64>` implementations
///
/// # Example
///
/// ```rust
/// # use delivery_dates_core::define_id;
/// define_id!(OrderId, "Order");
/// define_id!(ProductId, "Product");
///
/// let order_id = OrderId::new(1);
/// assert_eq!(order_id.to_gid(), "gid://shopify/Order/1");
///
/// // These are different types, so this won't compile:
/// // let _: ProductId = order_id;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $resource:literal) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Shopify resource name used in global IDs.
            pub const RESOURCE: &'static str = $resource;

            /// Create a new ID from an i64 value.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the underlying i64 value.
            #[must_use]
            pub const fn as_i64(&self) -> i64 {
                self.0
            }

            /// Render as a Shopify GraphQL global ID (`gid://shopify/{Resource}/{id}`).
            #[must_use]
            pub fn to_gid(&self) -> String {
                format!("gid://shopify/{}/{}", Self::RESOURCE, self.0)
            }

            /// Parse a Shopify GraphQL global ID or a bare numeric ID.
            #[must_use]
            pub fn from_gid(value: &str) -> Option<Self> {
                let prefix = format!("gid://shopify/{}/", Self::RESOURCE);
                let raw = value.strip_prefix(prefix.as_str()).unwrap_or(value);
                raw.parse::<i64>().ok().filter(|id| *id > 0).map(Self)
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(OrderId, "Order");

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_gid() {
        let id = OrderId::new(5_123_456_789_012);
        assert_eq!(id.to_gid(), "gid://shopify/Order/5123456789012");
    }

    #[test]
    fn test_order_id_from_gid() {
        assert_eq!(
            OrderId::from_gid("gid://shopify/Order/42"),
            Some(OrderId::new(42))
        );
        assert_eq!(OrderId::from_gid("42"), Some(OrderId::new(42)));
        assert_eq!(OrderId::from_gid("gid://shopify/Product/42"), None);
        assert_eq!(OrderId::from_gid("-1"), None);
        assert_eq!(OrderId::from_gid("abc"), None);
    }

    #[test]
    fn test_order_id_serde_transparent() {
        let id: OrderId = serde_json::from_str("820982911946154500").unwrap();
        assert_eq!(id.as_i64(), 820_982_911_946_154_500);
        assert_eq!(serde_json::to_string(&id).unwrap(), "820982911946154500");
    }
}
