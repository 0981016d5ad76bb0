//! Query-string parsing for the dashboard endpoints
//!
//! Parameters arrive as raw strings so that every bad value can be reported
//! at once, as a list of field errors, instead of failing on the first.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use super::error::{ApiError, FieldError};

/// Collects field errors while parameters are parsed
#[derive(Debug, Default)]
pub struct ParamErrors(Vec<FieldError>);

impl ParamErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    /// Parse an optional value, recording a field error when it does not parse
    pub fn parse<T>(&mut self, field: &str, value: Option<&str>) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = present(value)?;
        match value.parse() {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(field, e.to_string());
                None
            }
        }
    }

    /// Parse the `startDate`/`endDate` pair. A plain date as the end bound covers that whole day.
    pub fn date_range(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let start = self.date("startDate", start, DayBound::Start);
        let end = self.date("endDate", end, DayBound::End);

        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                self.push("startDate", "startDate must not be after endDate");
            }
        }
        (start, end)
    }

    fn date(&mut self, field: &str, value: Option<&str>, bound: DayBound) -> Option<DateTime<Utc>> {
        let value = present(value)?;
        match parse_date(value, bound) {
            Some(date) => Some(date),
            None => {
                self.push(field, format!("'{}' is not an RFC 3339 timestamp or YYYY-MM-DD date", value));
                None
            }
        }
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ApiError::InvalidQuery(self.0))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum DayBound {
    Start,
    End,
}

/// Empty parameters count as absent
fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(value: &str, bound: DayBound) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let time = match bound {
        DayBound::Start => NaiveTime::MIN,
        DayBound::End => NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?,
    };
    Some(day.and_time(time).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_plain_dates_cover_whole_days() {
        let mut errors = ParamErrors::new();
        let (start, end) = errors.date_range(Some("2024-03-01"), Some("2024-03-01"));

        assert_eq!(start, Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(
            end,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap() + chrono::Duration::milliseconds(999))
        );
        assert!(errors.finish().is_ok());
    }

    #[test]
    fn test_rfc3339_with_offset() {
        let mut errors = ParamErrors::new();
        let (start, end) = errors.date_range(Some("2024-03-01T03:00:00+03:00"), None);

        assert_eq!(start, Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(end, None);
        assert!(errors.finish().is_ok());
    }

    #[test]
    fn test_bad_values_are_all_reported() {
        let mut errors = ParamErrors::new();
        errors.date_range(Some("yesterday"), Some("2024-13-01"));
        let limit: Option<u32> = errors.parse("limit", Some("ten"));
        assert_eq!(limit, None);

        match errors.finish() {
            Err(ApiError::InvalidQuery(details)) => {
                let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
                assert_eq!(fields, vec!["startDate", "endDate", "limit"]);
            }
            other => panic!("expected invalid query, got {:?}", other),
        }
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        let mut errors = ParamErrors::new();
        errors.date_range(Some("2024-03-02"), Some("2024-03-01"));
        assert!(errors.finish().is_err());
    }

    #[test]
    fn test_empty_values_count_as_absent() {
        let mut errors = ParamErrors::new();
        let (start, end) = errors.date_range(Some(""), Some("  "));
        let limit: Option<u32> = errors.parse("limit", Some(""));

        assert_eq!((start, end, limit), (None, None, None));
        assert!(errors.finish().is_ok());
    }
}
