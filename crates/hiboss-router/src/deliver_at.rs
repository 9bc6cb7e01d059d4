use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{Result, RouterError};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Default, PartialEq, Eq)]
struct RelativeOffset {
    years: i64,
    months: i64,
    days: i64,
    hours: i64,
    minutes: i64,
    seconds: i64,
}

/// Parse `[+-]<n>{Y|M|D|h|m|s}…`, e.g. `+1Y2M3D`. Returns `None` if `s`
/// doesn't look like a relative expression at all (so callers can fall
/// through to the absolute-datetime parsers).
fn parse_relative(s: &str) -> Option<RelativeOffset> {
    let mut chars = s.char_indices().peekable();
    let (_, sign_char) = chars.next()?;
    let sign: i64 = match sign_char {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };

    let mut offset = RelativeOffset::default();
    let mut saw_segment = false;
    let rest = &s[sign_char.len_utf8()..];
    let mut cursor = rest;

    while !cursor.is_empty() {
        let digit_end = cursor.find(|c: char| !c.is_ascii_digit()).unwrap_or(cursor.len());
        if digit_end == 0 {
            return None;
        }
        let n: i64 = cursor[..digit_end].parse().ok()?;
        let mut unit_chars = cursor[digit_end..].chars();
        let unit = unit_chars.next()?;
        let value = n * sign;
        match unit {
            'Y' => offset.years += value,
            'M' => offset.months += value,
            'D' => offset.days += value,
            'h' => offset.hours += value,
            'm' => offset.minutes += value,
            's' => offset.seconds += value,
            _ => return None,
        }
        saw_segment = true;
        cursor = unit_chars.as_str();
    }

    if saw_segment {
        Some(offset)
    } else {
        None
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month_first = if month == 12 {
        chrono::NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        chrono::NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid calendar month boundary");
    let this_month_first =
        chrono::NaiveDate::from_ymd_opt(year, month, 1).expect("valid calendar month");
    (next_month_first - this_month_first).num_days() as u32
}

/// Apply a total month delta to `dt`, clamping the day-of-month to the
/// target month's length (e.g. Jan 31 + 1M -> Feb 28/29).
fn add_months_clamped(dt: DateTime<Utc>, total_months: i64) -> DateTime<Utc> {
    if total_months == 0 {
        return dt;
    }
    let absolute_month0 = dt.year() as i64 * 12 + dt.month0() as i64 + total_months;
    let new_year = absolute_month0.div_euclid(12) as i32;
    let new_month = absolute_month0.rem_euclid(12) as u32 + 1;
    let new_day = dt.day().min(days_in_month(new_year, new_month));

    Utc.with_ymd_and_hms(
        new_year,
        new_month,
        new_day,
        dt.hour(),
        dt.minute(),
        dt.second(),
    )
    .single()
    .unwrap_or(dt)
}

fn apply_relative(base: DateTime<Utc>, offset: RelativeOffset) -> DateTime<Utc> {
    let with_calendar = add_months_clamped(base, offset.years * 12 + offset.months);
    with_calendar
        + Duration::days(offset.days)
        + Duration::hours(offset.hours)
        + Duration::minutes(offset.minutes)
        + Duration::seconds(offset.seconds)
}

/// Resolve a naive local datetime in `tz`, preferring the earlier instant on
/// an ambiguous (DST fall-back) local time and erroring on one that never
/// occurred (DST spring-forward gap).
fn resolve_local(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>> {
    use chrono::LocalResult;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _latest) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(RouterError::InvalidInput(format!(
            "local datetime {naive} does not exist in timezone {tz}"
        ))),
    }
}

/// Parse `deliver_at` per the addressing rules: an RFC 3339 instant, a
/// local-looking datetime interpreted in `boss_timezone`, or a signed
/// relative expression anchored at `now`. Returns unix-ms UTC.
pub fn parse_deliver_at(s: &str, boss_timezone: &str, now: DateTime<Utc>) -> Result<i64> {
    let trimmed = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }

    if let Some(offset) = parse_relative(trimmed) {
        return Ok(apply_relative(now, offset).timestamp_millis());
    }

    let tz = Tz::from_str(boss_timezone)
        .map_err(|_| RouterError::InvalidInput(format!("unknown timezone: {boss_timezone}")))?;
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(resolve_local(naive, tz)?.timestamp_millis());
        }
    }

    Err(RouterError::InvalidInput(format!(
        "unrecognised deliver_at expression: {s}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rfc3339_instant_round_trips() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let ms = parse_deliver_at("2026-03-05T10:00:00Z", "UTC", now).unwrap();
        assert_eq!(ms, Utc.with_ymd_and_hms(2026, 3, 5, 10, 0, 0).unwrap().timestamp_millis());
    }

    #[test]
    fn relative_expression_applies_calendar_offset() {
        let now = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let ms = parse_deliver_at("+1M", "UTC", now).unwrap();
        let resolved = Utc.timestamp_millis_opt(ms).unwrap();
        assert_eq!(resolved.month(), 2);
        assert_eq!(resolved.day(), 28); // clamped, 2026 is not a leap year
    }

    #[test]
    fn relative_expression_concatenates_segments() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let ms = parse_deliver_at("+1Y2M3D4h5m6s", "UTC", now).unwrap();
        let resolved = Utc.timestamp_millis_opt(ms).unwrap();
        assert_eq!(resolved.year(), 2027);
        assert_eq!(resolved.month(), 3);
        assert_eq!(resolved.day(), 4);
        assert_eq!(resolved.hour(), 4);
        assert_eq!(resolved.minute(), 5);
        assert_eq!(resolved.second(), 6);
    }

    #[test]
    fn negative_relative_expression_goes_backward() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let ms = parse_deliver_at("-1D", "UTC", now).unwrap();
        let resolved = Utc.timestamp_millis_opt(ms).unwrap();
        assert_eq!(resolved.day(), 31);
        assert_eq!(resolved.month(), 5);
    }

    #[test]
    fn naive_local_datetime_uses_boss_timezone() {
        let now = Utc::now();
        let ms = parse_deliver_at("2026-06-01 09:00", "America/New_York", now).unwrap();
        let resolved = Utc.timestamp_millis_opt(ms).unwrap();
        // EDT is UTC-4 in June.
        assert_eq!(resolved.hour(), 13);
    }

    #[test]
    fn garbage_input_is_rejected() {
        let now = Utc::now();
        assert!(parse_deliver_at("whenever", "UTC", now).is_err());
    }
}
