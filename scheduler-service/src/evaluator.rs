//! # Next-fire computation
//!
//! `calculate_next_run` computes `(schedule, after) -> next fire`, split
//! out as a pure function over `ScheduleKind` so DST
//! behavior can be pinned down by unit test without touching a store.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use shared::errors::{AlyxError, AlyxResult};

use crate::domain::ScheduleKind;

fn expand_descriptor(expr: &str) -> Option<&'static str> {
    match expr.trim() {
        "@hourly" => Some("0 0 * * * *"),
        "@daily" | "@midnight" => Some("0 0 0 * * *"),
        "@weekly" => Some("0 0 0 * * 0"),
        "@monthly" => Some("0 0 0 1 * *"),
        "@yearly" | "@annually" => Some("0 0 0 1 1 *"),
        _ => None,
    }
}

/// `cron` expects a leading seconds field; the standard 5-field
/// crontab expressions
/// (minute hour dom month dow) get `0 ` prepended. Expressions that
/// already carry 6+ fields, or a descriptor, pass through unchanged
/// (after descriptor expansion).
fn normalize_cron(expression: &str) -> String {
    if let Some(expanded) = expand_descriptor(expression) {
        return expanded.to_string();
    }
    let field_count = expression.split_whitespace().count();
    if field_count == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

pub(crate) fn parse_timezone(timezone: &str) -> AlyxResult<Tz> {
    Tz::from_str(timezone).map_err(|_| AlyxError::InvalidTimezone(timezone.to_string()))
}

fn build_cron_schedule(expression: &str) -> AlyxResult<CronSchedule> {
    let normalized = normalize_cron(expression);
    CronSchedule::from_str(&normalized).map_err(|e| AlyxError::InvalidCronExpression(e.to_string()))
}

fn next_cron_fire(expression: &str, timezone: &str, after: DateTime<Utc>) -> AlyxResult<DateTime<Utc>> {
    let tz = parse_timezone(timezone)?;
    let schedule = build_cron_schedule(expression)?;

    let after_in_tz = after.with_timezone(&tz);
    schedule
        .after(&after_in_tz)
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AlyxError::InvalidCronExpression(expression.to_string()))
}

/// Counts cron occurrences in `(from, until)`, capped at `cap` — the
/// recovery procedure iterates `parser.Next` from the stale `next_run`
/// until ≥ `now`, capped at 1000.
pub(crate) fn count_cron_occurrences(
    expression: &str,
    timezone: &str,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    cap: usize,
) -> AlyxResult<usize> {
    let tz = parse_timezone(timezone)?;
    let schedule = build_cron_schedule(expression)?;
    let from_in_tz = from.with_timezone(&tz);

    let mut count = 0;
    for fire in schedule.after(&from_in_tz) {
        if count >= cap || fire.with_timezone(&Utc) >= until {
            break;
        }
        count += 1;
    }
    Ok(count)
}

/// Parses `s|m|h`-suffixed durations (`30s`, `5m`, `2h`). Sub-second
/// expressions and anything below one second fail with `InvalidInterval`.
pub fn parse_interval(expression: &str) -> AlyxResult<Duration> {
    let trimmed = expression.trim();
    let invalid = || AlyxError::InvalidInterval(expression.to_string());

    if trimmed.len() < 2 {
        return Err(invalid());
    }
    let (number, unit) = trimmed.split_at(trimmed.len() - 1);
    let value: i64 = number.parse().map_err(|_| invalid())?;
    let seconds = match unit {
        "s" => value,
        "m" => value.checked_mul(60).ok_or_else(invalid)?,
        "h" => value.checked_mul(3600).ok_or_else(invalid)?,
        _ => return Err(invalid()),
    };
    if seconds < 1 {
        return Err(invalid());
    }
    Ok(Duration::seconds(seconds))
}

/// Computes the next fire time for `kind`, or `None` only when a
/// `one_time` schedule hasn't executed yet and its timestamp is itself
/// the answer (never actually returns `None` — kept `Result<DateTime<Utc>>`
/// for symmetry with the other two kinds, which can always produce a next
/// fire given a valid expression).
pub fn calculate_next_run(
    kind: &ScheduleKind,
    timezone: &str,
    after: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
) -> AlyxResult<DateTime<Utc>> {
    match kind {
        ScheduleKind::Cron { expression } => next_cron_fire(expression, timezone, after),
        ScheduleKind::Interval { expression } => {
            let duration = parse_interval(expression)?;
            Ok(after + duration)
        }
        ScheduleKind::OneTime { at } => {
            if last_run.is_some() {
                return Err(AlyxError::AlreadyExecuted);
            }
            Ok(*at)
        }
    }
}
