//! Date and time-of-day normalization shared by filtering and sorting
//!
//! All timestamps are epoch milliseconds in UTC. Time-of-day values are
//! normalized onto a fixed reference date (the epoch day) so that two times
//! compare by duration regardless of which day they were recorded on.

use crate::cell::CellValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_DAY: i64 = 86_400_000;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Parse a date cell into epoch milliseconds
pub fn parse_date_ms(value: &CellValue) -> Option<i64> {
    match value {
        CellValue::Null => None,
        CellValue::Number(n) if n.is_finite() => Some(*n as i64),
        CellValue::Number(_) => None,
        CellValue::Text(s) => parse_date_str(s),
    }
}

pub fn parse_date_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date_start_ms(date));
        }
    }
    None
}

pub fn date_start_ms(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Calendar date of an epoch timestamp, `None` when out of chrono's range
pub fn date_of_ms(ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

/// `M/D/YYYY` rendering used for substring date filters
pub fn localized_date(ms: i64) -> Option<String> {
    date_of_ms(ms).map(|d| d.format("%-m/%-d/%Y").to_string())
}

/// Normalized epoch of an hour/minute on the reference date
pub fn time_of_day_ms(hours: u32, minutes: u32) -> Option<i64> {
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(i64::from(hours * 60 + minutes) * MS_PER_MINUTE)
}

/// `HH:mm` rendering of a normalized time-of-day epoch
pub fn format_time_of_day(ms: i64) -> String {
    let minutes = ms.rem_euclid(MS_PER_DAY) / MS_PER_MINUTE;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Find the first `H:M` / `HH:MM` group in `s`
pub fn find_hour_minute(s: &str) -> Option<(u32, u32)> {
    let bytes = s.as_bytes();
    let digits_at = |i: usize| {
        bytes[i..]
            .iter()
            .take(2)
            .take_while(|b| b.is_ascii_digit())
            .count()
    };
    for start in 0..bytes.len() {
        let hour_len = digits_at(start);
        if hour_len == 0 {
            continue;
        }
        let colon = start + hour_len;
        if bytes.get(colon) != Some(&b':') {
            continue;
        }
        let minute_len = if colon + 1 < bytes.len() { digits_at(colon + 1) } else { 0 };
        if minute_len == 0 {
            continue;
        }
        let hours = s[start..colon].parse().ok()?;
        let minutes = s[colon + 1..colon + 1 + minute_len].parse().ok()?;
        return Some((hours, minutes));
    }
    None
}

/// Outcome of extracting a time of day from a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfDay {
    /// A valid time, normalized onto the reference date
    Valid(i64),
    /// An `H:M` group was found but is not a real time (e.g. `25:00`)
    Invalid,
    /// No time component at all
    Missing,
}

/// Extract the time-of-day component from a full datetime or a bare `HH:mm` string
pub fn extract_time_of_day(value: &CellValue) -> TimeOfDay {
    let text = value.as_text();
    if text.is_empty() {
        return TimeOfDay::Missing;
    }

    if text.contains('T') || text.contains(' ') {
        if let Some(time_part) = text.split(&['T', ' '][..]).nth(1) {
            if let Some((h, m)) = find_hour_minute(time_part) {
                return time_of_day_ms(h, m).map_or(TimeOfDay::Invalid, TimeOfDay::Valid);
            }
        }
    }

    match find_hour_minute(&text) {
        Some((h, m)) => time_of_day_ms(h, m).map_or(TimeOfDay::Invalid, TimeOfDay::Valid),
        None => TimeOfDay::Missing,
    }
}

/// Parse a strict `HH:mm` editor value
pub fn parse_hh_mm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 || !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (h, m) = (h.parse().ok()?, m.parse().ok()?);
    time_of_day_ms(h, m).map(|_| (h, m))
}

/// Parse a strict `YYYY-MM-DD` editor value within 1900..=2100
pub fn parse_yyyy_mm_dd(s: &str) -> Option<NaiveDate> {
    let bytes = s.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let year = s[..4].parse::<i32>().ok()?;
    (1900..=2100).contains(&year).then_some(date)
}

/// Leading-integer parse (`"123abc"` is 123), `None` when no digits lead
pub fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let end = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if end == 0 {
        return None;
    }
    rest[..end].parse::<i64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dates() {
        assert_eq!(parse_date_str("1970-01-02"), Some(MS_PER_DAY));
        assert_eq!(parse_date_str("1970/01/02"), Some(MS_PER_DAY));
        assert_eq!(parse_date_str("1970-01-01 00:01:00"), Some(MS_PER_MINUTE));
        assert_eq!(parse_date_str("1970-01-01T00:00:01Z"), Some(1000));
        assert_eq!(parse_date_str("not a date"), None);
        assert_eq!(parse_date_ms(&CellValue::Number(5.0)), Some(5));
    }

    #[test]
    fn test_extract_time_of_day() {
        let t = |s: &str| extract_time_of_day(&CellValue::from(s));
        assert_eq!(t("2024-03-01 09:30:00"), TimeOfDay::Valid(570 * MS_PER_MINUTE));
        assert_eq!(t("2024-03-01T9:05"), TimeOfDay::Valid(545 * MS_PER_MINUTE));
        assert_eq!(t("14:45"), TimeOfDay::Valid((14 * 60 + 45) * MS_PER_MINUTE));
        assert_eq!(t("at 123:45"), TimeOfDay::Valid((23 * 60 + 45) * MS_PER_MINUTE));
        assert_eq!(t("25:00"), TimeOfDay::Invalid);
        assert_eq!(t("noon"), TimeOfDay::Missing);
        assert_eq!(t(""), TimeOfDay::Missing);
    }

    #[test]
    fn test_strict_editor_values() {
        assert_eq!(parse_hh_mm("09:30"), Some((9, 30)));
        assert_eq!(parse_hh_mm("9:30"), None);
        assert_eq!(parse_hh_mm("24:00"), None);
        assert!(parse_yyyy_mm_dd("2024-02-29").is_some());
        assert!(parse_yyyy_mm_dd("2023-02-29").is_none());
        assert!(parse_yyyy_mm_dd("1899-12-31").is_none());
        assert!(parse_yyyy_mm_dd("2024-2-1").is_none());
    }

    #[test]
    fn test_int_prefix_and_formatting() {
        assert_eq!(parse_int_prefix("123abc"), Some(123));
        assert_eq!(parse_int_prefix("-5"), Some(-5));
        assert_eq!(parse_int_prefix("abc"), None);
        assert_eq!(format_time_of_day(570 * MS_PER_MINUTE), "09:30");
        assert_eq!(localized_date(0).as_deref(), Some("1/1/1970"));
    }
}
