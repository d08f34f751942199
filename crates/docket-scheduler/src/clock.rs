//! Time source and timestamp encoding.
//!
//! Timestamps are persisted as fixed-width UTC strings (`2024-10-10T00:00:00.000Z`)
//! so that SQLite's text comparison orders them chronologically.

use std::sync::Arc;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveTime, Offset, SecondsFormat, TimeZone, Utc,
};
use docket_core::error::{DocketError, Result};

/// Injectable "now". Services read time only through this.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A clock frozen at `at`.
pub fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}

/// Encode a timestamp for storage.
pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored timestamp.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DocketError::Computation(format!("malformed timestamp '{s}': {e}")))
}

pub fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

pub fn offset_from_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours.clamp(-23, 23) * 3600).unwrap_or_else(|| Utc.fix())
}

/// Start of the calendar day containing `at`, in the given offset.
pub fn day_start(at: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = at.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    offset
        .from_local_datetime(&local)
        .single()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(at)
}

/// Start of the calendar week (Monday) containing `at`.
pub fn week_start(at: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let weekday = at.with_timezone(&offset).weekday().num_days_from_monday();
    day_start(at, offset) - Duration::days(weekday as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    #[test]
    fn test_format_is_fixed_width() {
        assert_eq!(format_ts(ts("2024-10-10T00:00:00Z")), "2024-10-10T00:00:00.000Z");
        assert_eq!(
            format_ts(ts("2024-10-10T08:30:15.5+08:00")),
            "2024-10-10T00:30:15.500Z"
        );
    }

    #[test]
    fn test_lexical_order_matches_time_order() {
        let a = format_ts(ts("2024-09-30T23:59:59Z"));
        let b = format_ts(ts("2024-10-01T00:00:00Z"));
        assert!(a < b);
    }

    #[test]
    fn test_malformed_timestamp() {
        let err = parse_ts("2024/10/10").unwrap_err();
        assert!(matches!(err, DocketError::Computation(_)));
    }

    #[test]
    fn test_day_start_with_offset() {
        let utc = offset_from_hours(0);
        assert_eq!(day_start(ts("2024-10-15T17:45:00Z"), utc), ts("2024-10-15T00:00:00Z"));

        // 17:45 UTC is already the 16th in UTC+8
        let cst = offset_from_hours(8);
        assert_eq!(day_start(ts("2024-10-15T17:45:00Z"), cst), ts("2024-10-15T16:00:00Z"));
    }

    #[test]
    fn test_week_start_is_monday() {
        // 2024-10-17 is a Thursday
        let utc = offset_from_hours(0);
        assert_eq!(week_start(ts("2024-10-17T12:00:00Z"), utc), ts("2024-10-14T00:00:00Z"));
        assert_eq!(week_start(ts("2024-10-14T00:00:00Z"), utc), ts("2024-10-14T00:00:00Z"));
    }

    #[test]
    fn test_fixed_clock() {
        let at = ts("2024-10-15T00:00:00Z");
        let clock = fixed_clock(at);
        assert_eq!(clock(), at);
    }
}
