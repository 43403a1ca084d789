//! Date parsing for job payloads and portal listings.
//!
//! Payload dates come from the backend as ISO 8601 (date or date-time);
//! portal listings render dates as `dd/mm/yyyy`. Range checks compare whole
//! days only, time of day is discarded.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::CoreError;

/// Format used by the registry portals in listing tables.
const BR_DATE_FORMAT: &str = "%d/%m/%Y";

/// Date-time layouts accepted in payloads, tried in order after RFC 3339.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a `dd/mm/yyyy` date, ignoring surrounding whitespace.
pub fn parse_br_date(text: &str) -> Result<NaiveDate, CoreError> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, BR_DATE_FORMAT)
        .map_err(|e| CoreError::Validation(format!("Invalid date '{text}': {e}")))
}

/// Parse an ISO 8601 date or date-time and keep only the calendar date.
pub fn parse_iso_date(text: &str) -> Result<NaiveDate, CoreError> {
    let text = text.trim();

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.date_naive());
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|dt| dt.date())
        .ok_or_else(|| CoreError::Validation(format!("Invalid ISO date '{text}'")))
}

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CoreError> {
        if start > end {
            return Err(CoreError::InvalidPayload(format!(
                "data_inicio ({start}) is after data_fim ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both ends from ISO payload strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, CoreError> {
        let start = parse_iso_date(start)
            .map_err(|e| CoreError::InvalidPayload(format!("data_inicio: {e}")))?;
        let end = parse_iso_date(end)
            .map_err(|e| CoreError::InvalidPayload(format!("data_fim: {e}")))?;
        Self::new(start, end)
    }

    /// Whether `date` falls within the range, both ends included.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn br_date_parses_with_whitespace() {
        assert_eq!(parse_br_date(" 15/01/2024\n").unwrap(), ymd(2024, 1, 15));
    }

    #[test]
    fn br_date_rejects_iso_layout() {
        assert!(parse_br_date("2024-01-15").is_err());
        assert!(parse_br_date("").is_err());
    }

    #[test]
    fn iso_date_accepts_plain_date_and_datetimes() {
        assert_eq!(parse_iso_date("2024-01-31").unwrap(), ymd(2024, 1, 31));
        assert_eq!(parse_iso_date("2024-01-31T23:59:59").unwrap(), ymd(2024, 1, 31));
        assert_eq!(parse_iso_date("2024-01-31T10:00:00.250").unwrap(), ymd(2024, 1, 31));
        assert_eq!(parse_iso_date("2024-01-31 08:30:00").unwrap(), ymd(2024, 1, 31));
        assert_eq!(parse_iso_date("2024-01-31T08:30:00-03:00").unwrap(), ymd(2024, 1, 31));
    }

    #[test]
    fn iso_date_rejects_garbage() {
        assert!(parse_iso_date("31/01/2024").is_err());
        assert!(parse_iso_date("yesterday").is_err());
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        let range = DateRange::parse("2024-01-01", "2024-01-31").unwrap();
        assert!(range.contains(ymd(2024, 1, 1)));
        assert!(range.contains(ymd(2024, 1, 31)));
        assert!(!range.contains(ymd(2023, 12, 31)));
        assert!(!range.contains(ymd(2024, 2, 1)));
    }

    #[test]
    fn range_ignores_time_of_day() {
        let range = DateRange::parse("2024-01-01T18:00:00", "2024-01-31T00:00:00").unwrap();
        assert!(range.contains(ymd(2024, 1, 1)));
        assert!(range.contains(ymd(2024, 1, 31)));
    }

    #[test]
    fn reversed_range_is_invalid_payload() {
        let err = DateRange::parse("2024-02-01", "2024-01-01").unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload(_)));
    }

    #[test]
    fn unparsable_end_names_the_field() {
        let err = DateRange::parse("2024-01-01", "soon").unwrap_err();
        assert!(err.to_string().contains("data_fim"));
    }
}
