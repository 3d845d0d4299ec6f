//! # Scheduler domain entities
//!
//! `Schedule` is persisted through `shared::store::Store` under
//! `_alyx_scheduler_state`. `ScheduleKind` carries the three
//! trigger shapes cron/interval/one_time as a single tagged field rather
//! than three optional columns, so a schedule can never be stored in an
//! ambiguous "which kind is this" state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron { expression: String },
    /// Duration spelled as its original `s|m|h`-suffixed source string, so
    /// the evaluator's parse errors stay reproducible across restarts.
    Interval { expression: String },
    OneTime { at: DateTime<Utc> },
}

/// A schedule row. `running_count` is process-local accounting, never
/// persisted — it lives in `Scheduler`, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub function_id: String,
    #[serde(default)]
    pub input: Value,
    #[serde(flatten)]
    pub kind: ScheduleKind,
    /// IANA timezone name. `CalculateNextRun` resolves it against
    /// `chrono_tz`; invalid names fail with `InvalidTimezone`.
    pub timezone: String,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub last_status: Option<String>,
    /// `0` means unlimited overlap.
    pub max_overlap: u32,
    pub skip_if_running: bool,
    /// Re-attempt a failed run, up to `max_retries` times, before waiting
    /// for the next naturally computed `next_run`.
    pub retry_on_failure: bool,
    pub max_retries: u32,
    /// Retries already attempted for the current `next_run` slot. Reset
    /// to `0` whenever a run succeeds or `next_run` advances past it.
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        name: String,
        function_id: String,
        input: Value,
        kind: ScheduleKind,
        timezone: String,
        max_overlap: u32,
        skip_if_running: bool,
        retry_on_failure: bool,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            function_id,
            input,
            kind,
            timezone,
            enabled: true,
            next_run: None,
            last_run: None,
            execution_count: 0,
            last_status: None,
            max_overlap,
            skip_if_running,
            retry_on_failure,
            max_retries,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
