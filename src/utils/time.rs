//! Timestamp encoding for persisted rows
//!
//! Stored as RFC 3339 text with millisecond precision, always UTC.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{TagError, TagResult};

pub fn encode(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode(table: &'static str, raw: &str) -> TagResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TagError::corrupt(table, format!("bad timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_millisecond_precision() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let raw = encode(&ts);
        assert_eq!(raw, "2023-11-14T22:13:20.123Z");
        assert_eq!(decode("tags", &raw).unwrap(), ts);
    }

    #[test]
    fn test_bad_timestamp_is_corrupt() {
        assert!(matches!(decode("tags", "yesterday"), Err(TagError::Corrupt { .. })));
    }
}
