//! Delivery date type.

use core::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Errors that can occur when parsing a [`DeliveryDate`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryDateError {
    /// The input string is empty.
    #[error("delivery date cannot be empty")]
    Empty,
    /// The input is not in a supported format.
    #[error("delivery date must be YYYY-MM-DD or DD-MM-YYYY, got '{0}'")]
    InvalidFormat(String),
}

/// A calendar delivery date.
///
/// Checkouts send the date the customer picked as an order note attribute.
/// The checkout widget renders dates the way `DutchNed` does (`DD-MM-YYYY`),
/// while Shopify `date` metafields need ISO 8601 (`YYYY-MM-DD`). Both are
/// accepted; [`Display`](fmt::Display) and serialization always produce ISO.
///
/// ## Examples
///
/// ```
/// use delivery_dates_core::DeliveryDate;
///
/// let iso = DeliveryDate::parse("2026-03-14").unwrap();
/// let dutch = DeliveryDate::parse("14-03-2026").unwrap();
/// assert_eq!(iso, dutch);
/// assert_eq!(dutch.to_string(), "2026-03-14");
///
/// assert!(DeliveryDate::parse("2026-02-30").is_err());
/// assert!(DeliveryDate::parse("tomorrow").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryDate(NaiveDate);

impl DeliveryDate {
    /// Parse a `DeliveryDate` from `YYYY-MM-DD` or `DD-MM-YYYY`.
    ///
    /// A `/` separator is accepted in place of `-`. An ISO datetime
    /// (`2026-03-14T00:00:00Z`) is truncated to its date part.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty or not a valid calendar date in
    /// one of the supported formats.
    pub fn parse(s: &str) -> Result<Self, DeliveryDateError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DeliveryDateError::Empty);
        }

        let invalid = || DeliveryDateError::InvalidFormat(trimmed.to_owned());
        let normalized = trimmed.replace('/', "-");
        let date_part = match normalized.split_once('T') {
            Some((date, _)) if is_iso_datetime(&normalized) => date,
            Some(_) => return Err(invalid()),
            None => normalized.as_str(),
        };

        // chrono's %Y takes any digit count, so the year width is checked here
        let format = match date_part.split('-').collect::<Vec<_>>().as_slice() {
            [year, _, _] if is_full_year(year) => "%Y-%m-%d",
            [_, _, year] if is_full_year(year) => "%d-%m-%Y",
            _ => return Err(invalid()),
        };

        NaiveDate::parse_from_str(date_part, format)
            .map(Self)
            .map_err(|_| invalid())
    }

    /// Create from a `chrono` date.
    #[must_use]
    pub const fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Returns the underlying `chrono` date.
    #[must_use]
    pub const fn as_naive(&self) -> NaiveDate {
        self.0
    }

    /// Returns the weekday.
    #[must_use]
    pub fn weekday(&self) -> Weekday {
        self.0.weekday()
    }

    /// Renders the date as `DD-MM-YYYY`.
    #[must_use]
    pub fn to_dutch_format(&self) -> String {
        self.0.format("%d-%m-%Y").to_string()
    }
}

fn is_full_year(field: &str) -> bool {
    field.len() == 4 && field.bytes().all(|b| b.is_ascii_digit())
}

fn is_iso_datetime(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

impl fmt::Display for DeliveryDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl std::str::FromStr for DeliveryDate {
    type Err = DeliveryDateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DeliveryDate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeliveryDate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
