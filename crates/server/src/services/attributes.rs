//! Note attribute to metafield transform.
//!
//! Checkout scripts write the customer's choice as order note attributes.
//! Two of them are persisted as order metafields:
//!
//! | Note attribute    | Metafield key     | Type                     |
//! |-------------------|-------------------|--------------------------|
//! | `delivery_date`   | `delivery_date`   | `date`                   |
//! | `shipping_method` | `shipping_method` | `single_line_text_field` |
//!
//! Attribute names are matched after trimming and lower-casing, with spaces
//! and dashes treated as underscores (`Delivery Date`, `delivery-date`).
//! Everything else is ignored.

use delivery_dates_core::DeliveryDate;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::shopify::webhook::NoteAttribute;
use crate::shopify::{MetafieldType, MetafieldValue};

pub const DELIVERY_DATE_KEY: &str = "delivery_date";
pub const SHIPPING_METHOD_KEY: &str = "shipping_method";

/// Longest shipping method accepted, in characters.
pub const MAX_TEXT_LEN: usize = 255;

/// A note attribute this service persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownAttribute {
    DeliveryDate,
    ShippingMethod,
}

impl KnownAttribute {
    /// Match an attribute name, tolerating case, spacing and dashes.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            DELIVERY_DATE_KEY => Some(Self::DeliveryDate),
            SHIPPING_METHOD_KEY => Some(Self::ShippingMethod),
            _ => None,
        }
    }

    #[must_use]
    pub const fn metafield_key(self) -> &'static str {
        match self {
            Self::DeliveryDate => DELIVERY_DATE_KEY,
            Self::ShippingMethod => SHIPPING_METHOD_KEY,
        }
    }

    #[must_use]
    pub const fn metafield_type(self) -> MetafieldType {
        match self {
            Self::DeliveryDate => MetafieldType::Date,
            Self::ShippingMethod => MetafieldType::SingleLineTextField,
        }
    }

    /// Validate and normalize a raw attribute value.
    fn validate(self, raw: Option<&str>) -> Result<String, String> {
        let value = raw.map(str::trim).unwrap_or_default();
        match self {
            Self::DeliveryDate => DeliveryDate::parse(value)
                .map(|d| d.to_string())
                .map_err(|e| e.to_string()),
            Self::ShippingMethod => {
                if value.is_empty() {
                    Err("shipping method is empty".to_string())
                } else if value.chars().count() > MAX_TEXT_LEN {
                    Err(format!(
                        "shipping method exceeds {MAX_TEXT_LEN} characters"
                    ))
                } else {
                    Ok(value.to_string())
                }
            }
        }
    }
}

/// A known attribute whose value failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct AttributeError {
    /// Attribute name as sent.
    pub attribute: String,
    /// Why it was rejected.
    pub reason: String,
}

impl std::fmt::Display for AttributeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.attribute, self.reason)
    }
}

/// Result of [`extract`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    /// Validated metafields, one per key.
    pub metafields: Vec<MetafieldValue>,
    /// Known attributes that failed validation.
    pub errors: Vec<AttributeError>,
    /// Names of attributes that were not recognized.
    pub ignored: Vec<String>,
}

impl TransformOutcome {
    /// No known attributes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metafields.is_empty() && self.errors.is_empty()
    }

    /// Known attributes were present but none were valid.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.metafields.is_empty() && !self.errors.is_empty()
    }

    /// Validation errors joined for status records and logs.
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Map note attributes to metafield values.
///
/// When an attribute appears more than once the last occurrence wins.
#[must_use]
pub fn extract(attributes: &[NoteAttribute]) -> TransformOutcome {
    let mut outcome = TransformOutcome::default();

    for attr in attributes {
        let Some(known) = KnownAttribute::from_name(&attr.name) else {
            outcome.ignored.push(attr.name.clone());
            continue;
        };

        let key = known.metafield_key();
        outcome.metafields.retain(|m| m.key != key);
        outcome.errors.retain(|e| KnownAttribute::from_name(&e.attribute) != Some(known));

        match known.validate(attr.value.as_deref()) {
            Ok(value) => outcome.metafields.push(MetafieldValue {
                key: key.to_string(),
                kind: known.metafield_type(),
                value,
            }),
            Err(reason) => outcome.errors.push(AttributeError {
                attribute: attr.name.clone(),
                reason,
            }),
        }
    }

    outcome.metafields.sort_by(|a, b| a.key.cmp(&b.key));
    outcome
}

/// Stable digest of a metafield set, independent of order.
#[must_use]
pub fn fingerprint(metafields: &[MetafieldValue]) -> String {
    let mut pairs: Vec<String> = metafields
        .iter()
        .map(|m| format!("{}={}", m.key, m.value))
        .collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    hasher.update(pairs.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str, value: &str) -> NoteAttribute {
        NoteAttribute::new(name, value)
    }

    #[test]
    fn test_name_variants_match() {
        for name in ["delivery_date", "Delivery Date", "delivery-date", " DELIVERY_DATE "] {
            assert_eq!(
                KnownAttribute::from_name(name),
                Some(KnownAttribute::DeliveryDate),
                "{name}"
            );
        }
        assert_eq!(
            KnownAttribute::from_name("Shipping Method"),
            Some(KnownAttribute::ShippingMethod)
        );
        assert_eq!(KnownAttribute::from_name("gift_note"), None);
    }

    #[test]
    fn test_extract_both_attributes() {
        let outcome = extract(&[
            attr("Shipping Method", "  Evening delivery "),
            attr("delivery_date", "05-01-2026"),
            attr("gift_note", "Happy birthday"),
        ]);

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.ignored, vec!["gift_note"]);
        assert_eq!(
            outcome.metafields,
            vec![
                MetafieldValue {
                    key: "delivery_date".to_string(),
                    kind: MetafieldType::Date,
                    value: "2026-01-05".to_string(),
                },
                MetafieldValue {
                    key: "shipping_method".to_string(),
                    kind: MetafieldType::SingleLineTextField,
                    value: "Evening delivery".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_extract_nothing_relevant() {
        let outcome = extract(&[attr("utm_source", "newsletter")]);
        assert!(outcome.is_empty());
        assert!(!outcome.is_invalid());
        assert_eq!(outcome.ignored.len(), 1);
    }

    #[test]
    fn test_extract_invalid_date() {
        let outcome = extract(&[attr("delivery_date", "next tuesday")]);
        assert!(outcome.is_invalid());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].attribute, "delivery_date");
    }

    #[test]
    fn test_extract_partial_validity() {
        let outcome = extract(&[
            attr("delivery_date", "2026-01-05"),
            attr("shipping_method", "   "),
        ]);
        assert!(!outcome.is_invalid());
        assert_eq!(outcome.metafields.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.error_summary().contains("shipping method is empty"));
    }

    #[test]
    fn test_extract_missing_value() {
        let outcome = extract(&[NoteAttribute {
            name: "delivery_date".to_string(),
            value: None,
        }]);
        assert!(outcome.is_invalid());
    }

    #[test]
    fn test_shipping_method_length_limit() {
        let ok = "a".repeat(MAX_TEXT_LEN);
        assert_eq!(extract(&[attr("shipping_method", &ok)]).metafields.len(), 1);

        let too_long = "a".repeat(MAX_TEXT_LEN + 1);
        assert!(extract(&[attr("shipping_method", &too_long)]).is_invalid());
    }

    #[test]
    fn test_last_occurrence_wins() {
        let outcome = extract(&[
            attr("delivery_date", "not a date"),
            attr("Delivery Date", "2026-02-10"),
        ]);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.metafields.len(), 1);
        assert_eq!(outcome.metafields[0].value, "2026-02-10");
    }

    #[test]
    fn test_fingerprint_order_independent() {
        let a = extract(&[
            attr("delivery_date", "2026-01-05"),
            attr("shipping_method", "Standard"),
        ]);
        let b = extract(&[
            attr("shipping_method", "Standard"),
            attr("delivery_date", "05/01/2026"),
        ]);
        assert_eq!(fingerprint(&a.metafields), fingerprint(&b.metafields));

        let c = extract(&[attr("delivery_date", "2026-01-06")]);
        assert_ne!(fingerprint(&a.metafields), fingerprint(&c.metafields));
    }
}
