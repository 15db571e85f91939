//! Cron-window evaluation.
//!
//! Determines whether a recurring window (cron schedule + duration, in an
//! IANA timezone) contains a given instant, and when the next window starts.
//!
//! Cron iterators only produce forward firings, so the most recent firing at
//! or before `now` is found by walking forward from a bounded anchor 14 days
//! in the past. Schedules that recur less often than that (e.g. yearly) are
//! outside the supported range: they evaluate as never-active rather than
//! erroring.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;

/// How far back to anchor the search for the previous firing.
const PREV_SEARCH_DAYS: i64 = 14;

/// Upper bound on firings walked from the anchor. Cron is minute-granular,
/// so the densest schedule yields ~20,160 firings in 14 days; the cap never
/// cuts a legitimate search short.
const PREV_SEARCH_LIMIT: usize = 30_000;

/// Failures evaluating a window definition.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum WindowError {
    /// The timezone is not a known IANA zone name.
    #[error("invalid timezone {0:?}")]
    InvalidTimezone(String),

    /// The cron expression does not parse as 5-field cron.
    #[error("invalid schedule {schedule:?}: {reason}")]
    InvalidSchedule { schedule: String, reason: String },

    /// The duration does not parse or is not positive.
    #[error("invalid duration {0:?}: must be a positive duration")]
    InvalidDuration(String),
}

/// Result of evaluating one window at a given instant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluatedWindow {
    /// Whether the instant lies inside the window interval.
    pub active: bool,
    /// Start of the containing interval, when active.
    pub active_start: Option<DateTime<Utc>>,
    /// End of the containing interval, when active.
    pub active_end: Option<DateTime<Utc>>,
    /// Start of the next upcoming interval.
    pub next_start: Option<DateTime<Utc>>,
    /// End of the next upcoming interval.
    pub next_end: Option<DateTime<Utc>>,
}

/// Evaluate a cron-based window at `now`.
///
/// `schedule` is a 5-field cron expression interpreted in `tz`; each firing
/// opens an interval of `duration` (a positive duration string such as "1h").
/// The window is active iff `prev <= now < prev + duration` where `prev` is
/// the most recent firing at or before `now`.
///
/// Deterministic: identical inputs produce identical results.
pub fn eval_cron_window(
    now: DateTime<Utc>,
    tz: &str,
    schedule: &str,
    duration: &str,
) -> Result<EvaluatedWindow, WindowError> {
    let zone: Tz = tz
        .parse()
        .map_err(|_| WindowError::InvalidTimezone(tz.to_string()))?;
    let duration = parse_window_duration(duration)?;
    let schedule = parse_schedule(schedule)?;

    let now_local = now.with_timezone(&zone);
    let anchor = now_local - Duration::days(PREV_SEARCH_DAYS);

    let mut prev = None;
    for (walked, firing) in schedule.after(&anchor).enumerate() {
        if firing > now_local || walked >= PREV_SEARCH_LIMIT {
            break;
        }
        prev = Some(firing);
    }
    let next = schedule.after(&now_local).next();

    let mut out = EvaluatedWindow {
        next_start: next.map(|t| t.with_timezone(&Utc)),
        next_end: next.map(|t| (t + duration).with_timezone(&Utc)),
        ..EvaluatedWindow::default()
    };

    if let Some(start) = prev {
        let end = start + duration;
        if now_local < end {
            out.active = true;
            out.active_start = Some(start.with_timezone(&Utc));
            out.active_end = Some(end.with_timezone(&Utc));
        }
    }

    Ok(out)
}

/// Parse a 5-field cron expression.
///
/// The `cron` crate expects a seconds field, so a zero-seconds field is
/// prepended to the standard 5-field form.
pub(crate) fn parse_schedule(expr: &str) -> Result<Schedule, WindowError> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() != 5 {
        return Err(WindowError::InvalidSchedule {
            schedule: expr.to_string(),
            reason: "expected 5 fields (minute hour day-of-month month day-of-week)".to_string(),
        });
    }
    Schedule::from_str(&format!("0 {trimmed}")).map_err(|e| WindowError::InvalidSchedule {
        schedule: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a window duration string; must be strictly positive.
pub(crate) fn parse_window_duration(value: &str) -> Result<Duration, WindowError> {
    let parsed = humantime::parse_duration(value.trim())
        .map_err(|_| WindowError::InvalidDuration(value.to_string()))?;
    let duration = Duration::from_std(parsed)
        .map_err(|_| WindowError::InvalidDuration(value.to_string()))?;
    if duration <= Duration::zero() {
        return Err(WindowError::InvalidDuration(value.to_string()));
    }
    Ok(duration)
}
