use std::str::FromStr;

use chrono::{Datelike, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use hiboss_core::types::SessionPolicy;

use crate::provider::ProviderSession;

/// The Executor's per-agent cache entry: a live session plus the bookkeeping
/// the refresh policy needs. Lives only for the daemon's lifetime.
pub struct CachedSession {
    pub session: Box<dyn ProviderSession>,
    pub created_at_ms: i64,
    pub last_run_completed_at_ms: Option<i64>,
}

fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some((h, m))
}

/// Has the most recent occurrence of `hh:mm` (boss timezone) fallen strictly
/// between `created_at_ms` and `now_ms`? Used for the daily-reset rule.
fn crossed_daily_reset(hhmm: &str, created_at_ms: i64, now_ms: i64, boss_timezone: &str) -> bool {
    let Ok(tz) = Tz::from_str(boss_timezone) else {
        return false;
    };
    let Some((hour, minute)) = parse_hhmm(hhmm) else {
        return false;
    };
    let Some(now_utc) = Utc.timestamp_millis_opt(now_ms).single() else {
        return false;
    };
    let now_local = now_utc.with_timezone(&tz);

    let today = match tz.with_ymd_and_hms(now_local.year(), now_local.month(), now_local.day(), hour, minute, 0) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => return false,
    };

    let mut occurrence_ms = today.with_timezone(&Utc).timestamp_millis();
    if occurrence_ms > now_ms {
        occurrence_ms -= 24 * 60 * 60 * 1000;
    }

    occurrence_ms > created_at_ms && occurrence_ms <= now_ms
}

/// Evaluated before a run. Max-context-length is handled separately, after a
/// successful run, since it depends on that run's reported usage.
pub fn refresh_reason(
    policy: &SessionPolicy,
    created_at_ms: i64,
    last_run_completed_at_ms: Option<i64>,
    now_ms: i64,
    boss_timezone: &str,
) -> Option<&'static str> {
    if let Some(hhmm) = &policy.daily_reset_at {
        if crossed_daily_reset(hhmm, created_at_ms, now_ms, boss_timezone) {
            return Some("daily reset");
        }
    }
    if let Some(idle_secs) = policy.idle_timeout_secs {
        if let Some(last) = last_run_completed_at_ms {
            if now_ms.saturating_sub(last) > idle_secs as i64 * 1000 {
                return Some("idle timeout");
            }
        }
    }
    None
}

/// Max-context-length check, evaluated only after a run that actually
/// reported a context length — "do not guess" when usage is absent.
pub fn exceeds_max_context(policy: &SessionPolicy, reported_context_length: Option<u64>) -> bool {
    match (policy.max_context_length, reported_context_length) {
        (Some(max), Some(actual)) => actual > max,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(daily: Option<&str>, idle_secs: Option<u64>, max_ctx: Option<u64>) -> SessionPolicy {
        SessionPolicy {
            daily_reset_at: daily.map(str::to_string),
            idle_timeout_secs: idle_secs,
            max_context_length: max_ctx,
        }
    }

    #[test]
    fn daily_reset_fires_once_crossed() {
        let p = policy(Some("00:00"), None, None);
        let created = Utc.with_ymd_and_hms(2026, 6, 1, 23, 0, 0).unwrap().timestamp_millis();
        let now = Utc.with_ymd_and_hms(2026, 6, 2, 1, 0, 0).unwrap().timestamp_millis();
        assert_eq!(refresh_reason(&p, created, None, now, "UTC"), Some("daily reset"));
    }

    #[test]
    fn daily_reset_does_not_fire_same_day() {
        let p = policy(Some("00:00"), None, None);
        let created = Utc.with_ymd_and_hms(2026, 6, 2, 0, 30, 0).unwrap().timestamp_millis();
        let now = Utc.with_ymd_and_hms(2026, 6, 2, 1, 0, 0).unwrap().timestamp_millis();
        assert_eq!(refresh_reason(&p, created, None, now, "UTC"), None);
    }

    #[test]
    fn idle_timeout_fires_after_threshold() {
        let p = policy(None, Some(60), None);
        let created = 0;
        let last = 1_000_000;
        let now = last + 120_000;
        assert_eq!(refresh_reason(&p, created, Some(last), now, "UTC"), Some("idle timeout"));
    }

    #[test]
    fn idle_timeout_silent_before_first_run() {
        let p = policy(None, Some(60), None);
        assert_eq!(refresh_reason(&p, 0, None, 1_000_000, "UTC"), None);
    }

    #[test]
    fn max_context_skipped_when_usage_absent() {
        let p = policy(None, None, Some(1000));
        assert!(!exceeds_max_context(&p, None));
    }

    #[test]
    fn max_context_trips_when_exceeded() {
        let p = policy(None, None, Some(1000));
        assert!(exceeds_max_context(&p, Some(1001)));
        assert!(!exceeds_max_context(&p, Some(999)));
    }
}
