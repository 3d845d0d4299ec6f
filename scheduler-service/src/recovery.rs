//! # Startup recovery
//!
//! Runs once at process startup:
//! finds every schedule with a stale `next_run` and either replays the
//! missed executions (`ALYX_SCHEDULER_CATCHUP=true`) or simply fast-
//! forwards `next_run` to the next fire after now. The catch-up flag is
//! an explicit argument here rather than read from the environment
//! inline, so tests can exercise both branches deterministically.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use shared::errors::AlyxResult;
use shared::store::Row;
use tracing::warn;

use crate::domain::{Schedule, ScheduleKind};
use crate::evaluator::{calculate_next_run, count_cron_occurrences};
use crate::event_bus::{EventBus, ExecuteEvent};
use crate::repository::ScheduleRepository;

const CRON_MISSED_CAP: usize = 1000;
const CRON_CATCHUP_CAP: usize = 100;
const CATCHUP_SPACING: StdDuration = StdDuration::from_millis(100);

fn missed_count(schedule: &Schedule, now: DateTime<Utc>) -> AlyxResult<usize> {
    let Some(next_run) = schedule.next_run else { return Ok(0) };
    match &schedule.kind {
        ScheduleKind::Cron { expression } => count_cron_occurrences(expression, &schedule.timezone, next_run, now, CRON_MISSED_CAP),
        ScheduleKind::Interval { .. } | ScheduleKind::OneTime { .. } => Ok(1),
    }
}

/// Recovers every schedule whose `next_run` fell in the past while the
/// process was down. When `catchup` is `true`, replays missed
/// executions (cron capped at 100, spaced 100ms apart); otherwise just
/// recomputes a fresh `next_run` from `now`.
pub async fn recover(
    repository: &ScheduleRepository,
    event_bus: &Arc<dyn EventBus>,
    now: DateTime<Utc>,
    catchup: bool,
) -> AlyxResult<()> {
    let stale = repository.find_stale(now).await?;

    for schedule in stale {
        let missed = match missed_count(&schedule, now) {
            Ok(m) => m,
            Err(err) => {
                warn!(schedule_id = %schedule.id, error = %err, "failed to compute missed executions");
                0
            }
        };

        if catchup && missed > 0 {
            let to_fire = match schedule.kind {
                ScheduleKind::Cron { .. } => missed.min(CRON_CATCHUP_CAP),
                _ => missed,
            };
            for _ in 0..to_fire {
                let event = ExecuteEvent {
                    schedule_id: schedule.id.clone(),
                    function_id: schedule.function_id.clone(),
                    input: schedule.input.clone(),
                };
                if let Err(err) = event_bus.publish(event).await {
                    warn!(schedule_id = %schedule.id, error = %err, "failed to publish recovered execution");
                }
                tokio::time::sleep(CATCHUP_SPACING).await;
            }
        }

        let mut patch = Row::new();
        match calculate_next_run(&schedule.kind, &schedule.timezone, now, schedule.last_run) {
            Ok(next) => match schedule.kind {
                ScheduleKind::OneTime { .. } => {
                    patch.insert("enabled".to_string(), json!(false));
                    patch.insert("next_run".to_string(), serde_json::Value::Null);
                }
                _ => {
                    patch.insert("next_run".to_string(), json!(next.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
                }
            },
            Err(err) => {
                warn!(schedule_id = %schedule.id, error = %err, "failed to recompute next run during recovery");
                continue;
            }
        }
        if let Err(err) = repository.update(&schedule.id, patch).await {
            warn!(schedule_id = %schedule.id, error = %err, "failed to persist recovered schedule");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::test_support::RecordingEventBus;
    use chrono::Duration;
    use shared::store::memory::InMemoryStore;

    fn stale_interval_schedule(id: &str, now: DateTime<Utc>) -> Schedule {
        let mut s = Schedule::new(
            id.to_string(),
            "test".to_string(),
            "fn-1".to_string(),
            json!({}),
            ScheduleKind::Interval { expression: "1m".to_string() },
            "UTC".to_string(),
            0,
            false,
            false,
            0,
        );
        s.next_run = Some(now - Duration::hours(1));
        s
    }

    #[tokio::test]
    async fn catchup_false_just_advances_next_run_without_firing() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let now = Utc::now();
        let created = repository.create(stale_interval_schedule("s1", now)).await.unwrap();
        let event_bus = Arc::new(RecordingEventBus::default());

        recover(&repository, &(event_bus.clone() as Arc<dyn EventBus>), now, false).await.unwrap();

        assert!(event_bus.events.lock().is_empty());
        let reloaded = repository.find_by_id(&created.id).await.unwrap().unwrap();
        assert!(reloaded.next_run.unwrap() > now);
    }

    #[tokio::test]
    async fn catchup_true_fires_missed_interval_execution_once() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let now = Utc::now();
        let created = repository.create(stale_interval_schedule("s1", now)).await.unwrap();
        let event_bus = Arc::new(RecordingEventBus::default());

        recover(&repository, &(event_bus.clone() as Arc<dyn EventBus>), now, true).await.unwrap();

        assert_eq!(event_bus.events.lock().len(), 1);
        assert_eq!(event_bus.events.lock()[0].schedule_id, created.id);
    }

    #[tokio::test]
    async fn non_stale_schedules_are_left_alone() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let now = Utc::now();
        let mut schedule = stale_interval_schedule("s1", now);
        schedule.next_run = Some(now + Duration::hours(1));
        repository.create(schedule).await.unwrap();
        let event_bus = Arc::new(RecordingEventBus::default());

        recover(&repository, &(event_bus.clone() as Arc<dyn EventBus>), now, true).await.unwrap();

        assert!(event_bus.events.lock().is_empty());
    }
}
