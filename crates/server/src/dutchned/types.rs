//! DutchNed request and response types.

use chrono::{NaiveDate, Weekday};
use delivery_dates_core::DeliveryDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::DutchNedError;

/// Default number of days looked ahead.
pub const DEFAULT_DAYS: u32 = 14;
/// Longest look-ahead accepted.
pub const MAX_DAYS: u32 = 60;
/// Country used when none is given.
pub const DEFAULT_COUNTRY: &str = "NL";

/// Query string of `GET /api/delivery-dates`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryDateParams {
    #[serde(default, alias = "postalCode", alias = "postcode")]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub days: Option<u32>,
}

/// A validated, normalized availability query. Also the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryQuery {
    pub postal_code: String,
    pub country: String,
    pub from: Option<NaiveDate>,
    pub days: u32,
}

impl DeliveryQuery {
    /// Validate request parameters.
    ///
    /// # Errors
    ///
    /// Returns `DutchNedError::InvalidQuery` describing the first problem.
    pub fn from_params(params: &DeliveryDateParams) -> Result<Self, DutchNedError> {
        let postal_code: String = params
            .postal_code
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        if postal_code.is_empty() {
            return Err(DutchNedError::InvalidQuery(
                "postal_code is required".to_string(),
            ));
        }

        let country = params
            .country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_COUNTRY)
            .to_uppercase();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DutchNedError::InvalidQuery(
                "country must be a two-letter code".to_string(),
            ));
        }

        if !postal_code_is_valid(&postal_code, &country) {
            return Err(DutchNedError::InvalidQuery(format!(
                "invalid postal code for {country}"
            )));
        }

        let days = params.days.unwrap_or(DEFAULT_DAYS);
        if !(1..=MAX_DAYS).contains(&days) {
            return Err(DutchNedError::InvalidQuery(format!(
                "days must be between 1 and {MAX_DAYS}"
            )));
        }

        let from = params
            .from
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(DeliveryDate::parse)
            .transpose()
            .map_err(|e| DutchNedError::InvalidQuery(format!("from: {e}")))?
            .map(|d| d.as_naive());

        Ok(Self {
            postal_code,
            country,
            from,
            days,
        })
    }
}

/// Dutch postcodes are `1234AB`; elsewhere accept 3-10 alphanumerics.
fn postal_code_is_valid(postal_code: &str, country: &str) -> bool {
    if country == "NL" {
        let bytes = postal_code.as_bytes();
        return bytes.len() == 6
            && bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[0] != b'0'
            && bytes[4..].iter().all(u8::is_ascii_uppercase);
    }
    (3..=10).contains(&postal_code.len())
        && postal_code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// A shipping method offered on a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingOption {
    pub code: String,
    pub name: String,
    #[serde(default, deserialize_with = "price_from_any")]
    pub price: Option<Decimal>,
}

/// An available delivery date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOption {
    /// ISO date.
    pub date: DeliveryDate,
    /// Lower-case English weekday.
    pub weekday: String,
    /// `DD-MM-YYYY`, as shown to Dutch customers.
    pub display_date: String,
    pub shipping_methods: Vec<ShippingOption>,
}

impl DeliveryOption {
    #[must_use]
    pub fn new(date: DeliveryDate, shipping_methods: Vec<ShippingOption>) -> Self {
        Self {
            weekday: weekday_name(date.weekday()).to_string(),
            display_date: date.to_dutch_format(),
            date,
            shipping_methods,
        }
    }
}

const fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Upstream response body.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum WireResponse {
    Wrapped {
        #[serde(alias = "deliveryDates", alias = "dates")]
        delivery_dates: Vec<WireDeliveryDate>,
    },
    Bare(Vec<WireDeliveryDate>),
}

impl WireResponse {
    pub(super) fn into_dates(self) -> Vec<WireDeliveryDate> {
        match self {
            Self::Wrapped { delivery_dates } | Self::Bare(delivery_dates) => delivery_dates,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct WireDeliveryDate {
    pub date: DeliveryDate,
    #[serde(default, alias = "shippingMethods", alias = "methods")]
    pub shipping_methods: Vec<ShippingOption>,
}

/// Prices arrive as JSON numbers or strings.
fn price_from_any<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => s.trim().parse().map(Some).map_err(D::Error::custom),
        Some(serde_json::Value::Number(n)) => n.to_string().parse().map(Some).map_err(D::Error::custom),
        Some(other) => Err(D::Error::custom(format!("invalid price: {other}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn params(postal: &str) -> DeliveryDateParams {
        DeliveryDateParams {
            postal_code: Some(postal.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_query_defaults_and_normalization() {
        let q = DeliveryQuery::from_params(&params(" 1234 ab ")).unwrap();
        assert_eq!(q.postal_code, "1234AB");
        assert_eq!(q.country, "NL");
        assert_eq!(q.days, DEFAULT_DAYS);
        assert_eq!(q.from, None);
    }

    #[test]
    fn test_query_requires_postal_code() {
        let err = DeliveryQuery::from_params(&DeliveryDateParams::default()).unwrap_err();
        assert!(matches!(err, DutchNedError::InvalidQuery(_)));
    }

    #[test]
    fn test_query_rejects_bad_dutch_postcode() {
        assert!(DeliveryQuery::from_params(&params("0123AB")).is_err());
        assert!(DeliveryQuery::from_params(&params("12345")).is_err());
        assert!(DeliveryQuery::from_params(&params("1234A1")).is_err());
    }

    #[test]
    fn test_query_other_country() {
        let q = DeliveryQuery::from_params(&DeliveryDateParams {
            postal_code: Some("1000".to_string()),
            country: Some("be".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(q.country, "BE");
        assert_eq!(q.postal_code, "1000");
    }

    #[test]
    fn test_query_days_bounds() {
        let mut p = params("1234AB");
        p.days = Some(0);
        assert!(DeliveryQuery::from_params(&p).is_err());
        p.days = Some(MAX_DAYS + 1);
        assert!(DeliveryQuery::from_params(&p).is_err());
        p.days = Some(MAX_DAYS);
        assert!(DeliveryQuery::from_params(&p).is_ok());
    }

    #[test]
    fn test_query_from_date() {
        let mut p = params("1234AB");
        p.from = Some("05-01-2026".to_string());
        let q = DeliveryQuery::from_params(&p).unwrap();
        assert_eq!(q.from, NaiveDate::from_ymd_opt(2026, 1, 5));

        p.from = Some("soon".to_string());
        assert!(DeliveryQuery::from_params(&p).is_err());
    }

    #[test]
    fn test_wire_response_shapes() {
        let wrapped: WireResponse = serde_json::from_str(
            r#"{"deliveryDates": [{"date": "05-01-2026", "shippingMethods": [
                {"code": "EVE", "name": "Evening", "price": 4.95},
                {"code": "STD", "name": "Standard", "price": "0.00"},
                {"code": "PICK", "name": "Pickup"}
            ]}]}"#,
        )
        .unwrap();
        let dates = wrapped.into_dates();
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].date.to_string(), "2026-01-05");
        let methods = &dates[0].shipping_methods;
        assert_eq!(methods[0].price, Some(Decimal::from_str("4.95").unwrap()));
        assert_eq!(methods[1].price, Some(Decimal::ZERO));
        assert_eq!(methods[2].price, None);

        let bare: WireResponse =
            serde_json::from_str(r#"[{"date": "2026-01-06"}]"#).unwrap();
        assert_eq!(bare.into_dates()[0].shipping_methods.len(), 0);
    }

    #[test]
    fn test_delivery_option_display_fields() {
        let option = DeliveryOption::new(DeliveryDate::parse("2026-01-05").unwrap(), vec![]);
        assert_eq!(option.weekday, "monday");
        assert_eq!(option.display_date, "05-01-2026");
    }
}
