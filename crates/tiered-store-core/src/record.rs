//! Record and metadata types shared by every tier.
//!
//! Records are produced outside this crate as JSON-like objects. The only
//! structural requirement is a [`TIMESTAMP_FIELD`] entry that can be parsed
//! into an absolute instant; everything else is carried through untouched.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// A single timestamped record: an ordered mapping of field name to value.
pub type Record = Map<String, Value>;

/// Arbitrary key/value metadata attached to a dataset (source, schema version, ...).
pub type Metadata = Map<String, Value>;

/// Name of the field every record must carry.
pub const TIMESTAMP_FIELD: &str = "timestamp";

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a record's timestamp value into a UTC instant.
///
/// Accepted shapes:
/// - RFC 3339 strings (any offset, normalized to UTC).
/// - `YYYY-MM-DD HH:MM:SS[.f]` or `YYYY-MM-DDTHH:MM:SS[.f]`, read as UTC.
/// - `YYYY-MM-DD`, read as midnight UTC.
/// - Integers, read as Unix epoch milliseconds.
///
/// Returns `None` for anything else, including nulls and floats.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

/// Check that `dataset_id` can be used as a file name under the store root.
///
/// Returns a short reason on failure.
pub fn validate_dataset_id(dataset_id: &str) -> Result<(), &'static str> {
    if dataset_id.is_empty() {
        return Err("dataset id is empty");
    }
    if dataset_id == "." || dataset_id == ".." {
        return Err("dataset id cannot be a relative path component");
    }
    if dataset_id.contains(['/', '\\', '\0']) {
        return Err("dataset id contains a path separator or NUL");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).single().unwrap()
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_timestamp(&json!("2024-01-02T03:04:05+02:00"));
        assert_eq!(ts, Some(utc(2024, 1, 2, 1, 4, 5)));
    }

    #[test]
    fn parses_naive_datetime_as_utc() {
        assert_eq!(
            parse_timestamp(&json!("2024-01-02 03:04:05")),
            Some(utc(2024, 1, 2, 3, 4, 5))
        );
        assert_eq!(
            parse_timestamp(&json!("2024-01-02T03:04:05.250")),
            Some(utc(2024, 1, 2, 3, 4, 5) + chrono::Duration::milliseconds(250))
        );
    }

    #[test]
    fn parses_bare_date_as_midnight() {
        assert_eq!(
            parse_timestamp(&json!("2024-01-02")),
            Some(utc(2024, 1, 2, 0, 0, 0))
        );
    }

    #[test]
    fn parses_integer_as_epoch_millis() {
        assert_eq!(
            parse_timestamp(&json!(1_704_067_200_000_i64)),
            Some(utc(2024, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(1.5)), None);
        assert_eq!(parse_timestamp(&Value::Null), None);
        assert_eq!(parse_timestamp(&json!({"ts": 1})), None);
    }

    #[test]
    fn dataset_id_validation() {
        assert!(validate_dataset_id("train-2024_01").is_ok());
        assert!(validate_dataset_id("").is_err());
        assert!(validate_dataset_id("..").is_err());
        assert!(validate_dataset_id("a/b").is_err());
        assert!(validate_dataset_id("a\\b").is_err());
    }
}
