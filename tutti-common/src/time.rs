//! Timestamp utilities
//!
//! Timestamps are persisted as fixed-width RFC 3339 UTC strings with
//! microsecond precision, so ordering comparisons in SQL (`expires_at < ?`)
//! agree with chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn from_db(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Decode(format!("timestamp '{}': {}", raw, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(from_db).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_to_db_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let fractional = whole + Duration::microseconds(123_456);
        assert_eq!(to_db(whole), "2026-03-01T09:00:00.000000Z");
        assert_eq!(to_db(whole).len(), to_db(fractional).len());
    }

    #[test]
    fn test_lexical_order_matches_chronological_order() {
        let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let later = earlier + Duration::microseconds(1);
        assert!(to_db(earlier) < to_db(later));

        let next_day = earlier + Duration::hours(24);
        assert!(to_db(later) < to_db(next_day));
    }

    #[test]
    fn test_from_db_parses_stored_value() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 18, 30, 5).unwrap();
        assert_eq!(from_db(&to_db(ts)).unwrap(), ts);
    }

    #[test]
    fn test_from_db_rejects_garbage() {
        assert!(matches!(from_db("yesterday"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_from_db_opt_passes_none_through() {
        assert_eq!(from_db_opt(None).unwrap(), None);
    }
}
