//! Datetime parsing shared by the CLI, the YAML configuration and catalogue records.

use crate::{CatalogError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer};

/// Accepted datetime layouts, tried in order.
const DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
];

/// Parse a datetime string.
///
/// Accepts the `DD/MM/YYYY HH:MM:SS` layout of the command line, ISO-8601 with
/// either `T` or a space as separator, and a bare `YYYY-MM-DD` (midnight).
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    parse_with_time_of_day(s, NaiveTime::MIN)
}

/// Parse the inclusive upper bound of a time window.
///
/// Same layouts as [`parse_datetime`], but a bare `YYYY-MM-DD` covers the
/// whole day and resolves to its last instant.
pub fn parse_end_datetime(s: &str) -> Result<NaiveDateTime> {
    parse_with_time_of_day(s, end_of_day())
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN)
}

fn parse_with_time_of_day(s: &str, bare_date_time: NaiveTime) -> Result<NaiveDateTime> {
    let s = s.trim();
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_time(bare_date_time))
        .map_err(|_| CatalogError::InvalidDatetime(s.to_string()))
}

/// Serde adapter for optional datetime fields written in any accepted layout.
pub fn deserialize_opt_datetime<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        Some(s) => parse_datetime(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Serde adapter for an optional inclusive upper bound; see [`parse_end_datetime`].
pub fn deserialize_opt_end_datetime<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        Some(s) => parse_end_datetime(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Serde adapter for a list of datetimes written in any accepted layout.
pub fn deserialize_datetimes<'de, D>(deserializer: D) -> std::result::Result<Vec<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<String> = Vec::deserialize(deserializer)?;
    raw.iter()
        .map(|s| parse_datetime(s).map_err(serde::de::Error::custom))
        .collect()
}
