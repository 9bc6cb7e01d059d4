use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronExpr;

use crate::error::{Result, SchedulerError};

/// Normalize a 5-field unix cron expression or `@hourly`/`@daily`/`@midnight`
/// preset into the 6-field (seconds-first) form the `cron` crate parses.
/// A caller-supplied 6-field expression (explicit seconds) passes through.
fn normalize_expression(expr: &str) -> Result<String> {
    let trimmed = expr.trim();
    match trimmed {
        "@hourly" => return Ok("0 0 * * * *".to_string()),
        "@daily" | "@midnight" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {trimmed}")),
        6 => Ok(trimmed.to_string()),
        n => Err(SchedulerError::InvalidCron {
            expr: expr.to_string(),
            reason: format!("expected 5 fields, a 6-field seconds-first expression, or a preset; got {n} fields"),
        }),
    }
}

fn parse_expression(expr: &str) -> Result<CronExpr> {
    let normalized = normalize_expression(expr)?;
    CronExpr::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Resolve the effective IANA timezone: the schedule's explicit zone, or
/// the boss default when `None`.
pub fn resolve_timezone(schedule_tz: Option<&str>, boss_timezone: &str) -> Result<Tz> {
    let name = schedule_tz.unwrap_or(boss_timezone);
    Tz::from_str(name).map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

/// Next fire time strictly after `after`, evaluated in the effective timezone.
pub fn compute_next_fire(
    cron_expr: &str,
    schedule_tz: Option<&str>,
    boss_timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let schedule = parse_expression(cron_expr)?;
    let zone = resolve_timezone(schedule_tz, boss_timezone)?;
    let after_in_zone = after.with_timezone(&zone);
    schedule
        .after(&after_in_zone)
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            reason: "expression has no future occurrence".to_string(),
        })
}

/// Pure: validate and return the next `count` fire times without touching
/// the store. Used by `cron.explain`.
pub fn explain(
    cron_expr: &str,
    schedule_tz: Option<&str>,
    boss_timezone: &str,
    count: usize,
) -> Result<Vec<DateTime<Utc>>> {
    let schedule = parse_expression(cron_expr)?;
    let zone = resolve_timezone(schedule_tz, boss_timezone)?;
    let now = Utc::now().with_timezone(&zone);
    Ok(schedule
        .after(&now)
        .take(count)
        .map(|dt| dt.with_timezone(&Utc))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_two_minutes_fires_strictly_after_now() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = compute_next_fire("*/2 * * * *", None, "UTC", now).unwrap();
        assert!(next > now);
        assert_eq!(next.format("%M").to_string().parse::<u32>().unwrap() % 2, 0);
    }

    #[test]
    fn hourly_preset_resolves() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 30, 0).unwrap();
        let next = compute_next_fire("@hourly", None, "UTC", now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn invalid_expression_is_rejected() {
        let now = Utc::now();
        let err = compute_next_fire("not a cron", None, "UTC", now).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(resolve_timezone(Some("Mars/Olympus_Mons"), "UTC").is_err());
    }

    #[test]
    fn explain_returns_strictly_increasing_times() {
        let times = explain("*/5 * * * *", None, "UTC", 3).unwrap();
        assert_eq!(times.len(), 3);
        assert!(times[0] < times[1] && times[1] < times[2]);
    }
}
