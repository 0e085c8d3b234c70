//! Shopify shop domain type.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Errors that can occur when parsing a [`ShopDomain`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShopDomainError {
    /// The input string is empty.
    #[error("shop domain cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("shop domain must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The domain does not end with `.myshopify.com`.
    #[error("shop domain must end with .myshopify.com")]
    NotMyshopify,
    /// The shop handle contains characters other than `a-z`, `0-9` and `-`.
    #[error("shop handle contains invalid characters")]
    InvalidHandle,
}

/// A `*.myshopify.com` shop domain.
///
/// Shopify sends the shop in webhook headers and OAuth query parameters.
/// Everything keyed per shop (tokens, circuit breakers, status records) uses
/// the normalized form, so the same shop can't end up under two keys.
///
/// ## Constraints
///
/// - Trimmed and lower-cased
/// - An optional `https://` scheme and trailing `/` are stripped
/// - Handle is `[a-z0-9-]+` and must not start with `-`
/// - Must end with `.myshopify.com`
///
/// ## Examples
///
/// ```
/// use delivery_dates_core::ShopDomain;
///
/// let shop = ShopDomain::parse("  My-Store.myshopify.com ").unwrap();
/// assert_eq!(shop.as_str(), "my-store.myshopify.com");
/// assert_eq!(shop.handle(), "my-store");
///
/// assert!(ShopDomain::parse("example.com").is_err());
/// assert!(ShopDomain::parse("bad_handle.myshopify.com").is_err());
/// ```
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ShopDomain(String);

impl ShopDomain {
    /// Maximum length of a shop domain.
    pub const MAX_LENGTH: usize = 255;

    /// Required domain suffix.
    pub const SUFFIX: &'static str = ".myshopify.com";

    /// Parse a `ShopDomain` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input:
    /// - Is empty after trimming
    /// - Is longer than 255 characters
    /// - Does not end with `.myshopify.com`
    /// - Has an invalid shop handle
    pub fn parse(s: &str) -> Result<Self, ShopDomainError> {
        let trimmed = s.trim().to_lowercase();
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(&trimmed);
        let normalized = without_scheme.trim_end_matches('/');

        if normalized.is_empty() {
            return Err(ShopDomainError::Empty);
        }

        if normalized.len() > Self::MAX_LENGTH {
            return Err(ShopDomainError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        let handle = normalized
            .strip_suffix(Self::SUFFIX)
            .ok_or(ShopDomainError::NotMyshopify)?;

        if handle.is_empty()
            || handle.starts_with('-')
            || !handle
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ShopDomainError::InvalidHandle);
        }

        Ok(Self(normalized.to_owned()))
    }

    /// Returns the shop domain as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the shop handle (the part before `.myshopify.com`).
    #[must_use]
    pub fn handle(&self) -> &str {
        self.0.strip_suffix(Self::SUFFIX).unwrap_or(&self.0)
    }

    /// Consumes the `ShopDomain` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShopDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ShopDomain {
    type Err = ShopDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ShopDomain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ShopDomain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_domains() {
        assert!(ShopDomain::parse("store.myshopify.com").is_ok());
        assert!(ShopDomain::parse("my-store-2.myshopify.com").is_ok());
        assert!(ShopDomain::parse("https://store.myshopify.com/").is_ok());
    }

    #[test]
    fn test_parse_normalizes() {
        let shop = ShopDomain::parse("  STORE.MyShopify.com ").unwrap();
        assert_eq!(shop.as_str(), "store.myshopify.com");
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(ShopDomain::parse("   "), Err(ShopDomainError::Empty));
    }

    #[test]
    fn test_parse_not_myshopify() {
        assert_eq!(
            ShopDomain::parse("store.example.com"),
            Err(ShopDomainError::NotMyshopify)
        );
    }

    #[test]
    fn test_parse_invalid_handle() {
        assert_eq!(
            ShopDomain::parse(".myshopify.com"),
            Err(ShopDomainError::InvalidHandle)
        );
        assert_eq!(
            ShopDomain::parse("-store.myshopify.com"),
            Err(ShopDomainError::InvalidHandle)
        );
        assert_eq!(
            ShopDomain::parse("evil.com/x.myshopify.com"),
            Err(ShopDomainError::InvalidHandle)
        );
    }

    #[test]
    fn test_parse_too_long() {
        let long = format!("{}.myshopify.com", "a".repeat(250));
        assert!(matches!(
            ShopDomain::parse(&long),
            Err(ShopDomainError::TooLong { .. })
        ));
    }

    #[test]
    fn test_handle() {
        let shop = ShopDomain::parse("cheese-shop.myshopify.com").unwrap();
        assert_eq!(shop.handle(), "cheese-shop");
    }

    #[test]
    fn test_deserialize_validates() {
        let shop: ShopDomain = serde_json::from_str("\"Store.myshopify.com\"").unwrap();
        assert_eq!(shop.as_str(), "store.myshopify.com");

        let bad: Result<ShopDomain, _> = serde_json::from_str("\"store.example.com\"");
        assert!(bad.is_err());
    }
}
