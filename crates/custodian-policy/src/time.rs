//! Date parsing and time zone helpers for age filters and delayed actions

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Parse a `utc` name or a `+HH:MM` / `-HH:MM` offset
pub fn parse_tz(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") || tz == "+00:00" {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match tz.as_bytes().first().copied()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Interpret a resource value as a point in time
///
/// Accepts RFC 3339 strings, naive `YYYY-MM-DD[THH:MM:SS]` strings (taken
/// as UTC) and epoch numbers (seconds, or milliseconds for large values).
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_date_str(s),
        Value::Number(n) => {
            let n = n.as_f64()?;
            let millis = if n.abs() > 1e11 { n } else { n * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Render an action date for a label value
///
/// Label values cannot hold `:` or spaces, so components are joined with
/// underscores. Without an hour delay the time component is `0_0`.
pub fn format_action_date(date: &DateTime<FixedOffset>, with_time: bool) -> String {
    if with_time {
        date.format("%Y_%m_%d__%H_%M").to_string()
    } else {
        date.format("%Y_%m_%d__0_0").to_string()
    }
}

/// Parse a date rendered by [`format_action_date`] in time zone `tz`
pub fn parse_action_date(s: &str, tz: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let (date, time) = s.split_once("__").unwrap_or((s, "0_0"));

    let mut parts = date.split('_').map(|p| p.parse::<u32>().ok());
    let year = parts.next()??;
    let month = parts.next()??;
    let day = parts.next()??;
    if parts.next().is_some() {
        return None;
    }

    let mut parts = time.split('_').map(|p| p.parse::<u32>().ok());
    let hour = parts.next()??;
    let minute = parts.next().unwrap_or(Some(0))?;

    let naive = NaiveDate::from_ymd_opt(year as i32, month, day)?.and_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn test_parse_tz() {
        assert_eq!(parse_tz("utc").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_tz("+05:30").unwrap().local_minus_utc(), 19_800);
        assert_eq!(parse_tz("-08:00").unwrap().local_minus_utc(), -28_800);
        assert!(parse_tz("Mars/Olympus").is_none());
        assert!(parse_tz("+25:00").is_none());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_date(&json!("2024-03-01T12:00:00Z")), Some(expected));
        assert_eq!(parse_date(&json!("2024-03-01T12:00:00")), Some(expected));
        assert_eq!(parse_date(&json!("2024-03-01T14:00:00+02:00")), Some(expected));
        assert_eq!(parse_date(&json!(expected.timestamp())), Some(expected));
        assert_eq!(parse_date(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(
            parse_date(&json!("2024-03-01")),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert!(parse_date(&json!("yesterday")).is_none());
        assert!(parse_date(&json!(true)).is_none());
    }

    #[test]
    fn test_action_date_roundtrip() {
        let tz = parse_tz("utc").unwrap();
        let date = tz.with_ymd_and_hms(2024, 1, 5, 7, 30, 0).unwrap();

        assert_eq!(format_action_date(&date, true), "2024_01_05__07_30");
        assert_eq!(format_action_date(&date, false), "2024_01_05__0_0");

        let parsed = parse_action_date("2024_01_05__0_0", &tz).unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2024, 1, 5));
        assert_eq!(parsed.hour(), 0);
        assert_eq!(parse_action_date("2024_01_05__07_30", &tz), Some(date));
        assert!(parse_action_date("2024_13_05__0_0", &tz).is_none());
        assert!(parse_action_date("soon", &tz).is_none());
    }
}
