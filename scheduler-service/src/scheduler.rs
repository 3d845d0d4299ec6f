//! # Poll loop
//!
//! `Scheduler` runs the poll loop: every tick (default 1s) it
//! pulls due schedules, gates them on a per-schedule running count, fires
//! an `execute` event, and advances `next_run`. The function runtime that
//! actually executes `function_id` is out of scope for this workspace, so
//! `running_count` is only ever incremented here — a caller that wires up
//! real execution calls [`Scheduler::finish_execution`] when a run
//! completes — the scope where execution runs, and therefore ends, is
//! owned by the caller rather than this crate. `finish_execution` also
//! carries retry-on-failure bookkeeping: a failed run whose schedule has
//! `retry_on_failure` set and budget remaining under `max_retries` is
//! re-fired on the very next poll tick rather than waiting for its
//! regular `next_run`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::json;
use shared::lifecycle::BackgroundWorker;
use shared::store::Row;
use tracing::warn;

use crate::domain::{Schedule, ScheduleKind};
use crate::evaluator::calculate_next_run;
use crate::event_bus::{EventBus, ExecuteEvent};
use crate::repository::ScheduleRepository;

const DEFAULT_DUE_LIMIT: i64 = 100;

#[derive(Default)]
struct RunningCounts {
    inner: RwLock<HashMap<String, u32>>,
}

impl RunningCounts {
    fn get(&self, schedule_id: &str) -> u32 {
        self.inner.read().get(schedule_id).copied().unwrap_or(0)
    }

    fn increment(&self, schedule_id: &str) {
        *self.inner.write().entry(schedule_id.to_string()).or_insert(0) += 1;
    }

    fn decrement(&self, schedule_id: &str) {
        let mut inner = self.inner.write();
        if let Some(count) = inner.get_mut(schedule_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.remove(schedule_id);
            }
        }
    }
}

pub struct Scheduler {
    repository: ScheduleRepository,
    event_bus: Arc<dyn EventBus>,
    running: Arc<RunningCounts>,
    worker: Option<BackgroundWorker>,
}

impl Scheduler {
    pub fn new(repository: ScheduleRepository, event_bus: Arc<dyn EventBus>) -> Self {
        Self { repository, event_bus, running: Arc::new(RunningCounts::default()), worker: None }
    }

    pub fn start(&mut self, poll_interval: StdDuration) {
        let repository = self.repository.clone();
        let event_bus = self.event_bus.clone();
        let running = self.running.clone();

        self.worker = Some(BackgroundWorker::spawn(move |notify| async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = poll_once(&repository, &event_bus, &running, Utc::now()).await {
                            warn!(error = %err, "scheduler poll tick failed");
                        }
                    }
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(worker) = &self.worker {
            worker.stop();
        }
    }

    pub async fn join(&mut self) {
        if let Some(worker) = &mut self.worker {
            worker.join().await;
        }
    }

    /// Signals that a previously published execution for `schedule_id` has
    /// finished, releasing its running-count slot and recording the
    /// outcome. A failed run is re-fired on the next poll tick when the
    /// schedule has `retry_on_failure` set and hasn't exhausted
    /// `max_retries`; otherwise the retry count resets and the schedule
    /// waits for its regular `next_run`.
    pub async fn finish_execution(&self, schedule_id: &str, success: bool) {
        self.running.decrement(schedule_id);

        let schedule = match self.repository.find_by_id(schedule_id).await {
            Ok(Some(schedule)) => schedule,
            Ok(None) => return,
            Err(err) => {
                warn!(schedule_id, error = %err, "failed to load schedule for retry bookkeeping");
                return;
            }
        };

        let patch = finish_execution_patch(&schedule, success, Utc::now());
        if let Err(err) = self.repository.update(schedule_id, patch).await {
            warn!(schedule_id, error = %err, "failed to persist execution result");
        }
    }

    pub fn running_count(&self, schedule_id: &str) -> u32 {
        self.running.get(schedule_id)
    }
}

fn should_skip(schedule: &Schedule, running: &RunningCounts) -> bool {
    let count = running.get(&schedule.id);
    if schedule.skip_if_running && count > 0 {
        return true;
    }
    if schedule.max_overlap > 0 && count >= schedule.max_overlap {
        return true;
    }
    false
}

fn next_run_patch(schedule: &Schedule, now: chrono::DateTime<Utc>) -> Row {
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
            warn!(schedule_id = %schedule.id, error = %err, "failed to compute next run; leaving next_run unchanged");
        }
    }
    patch.insert("last_run".to_string(), json!(now.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
    patch.insert("execution_count".to_string(), json!(schedule.execution_count + 1));
    patch
}

/// Builds the patch [`Scheduler::finish_execution`] persists for a
/// completed run. A failure within retry budget jumps `next_run` to
/// `now` so the next poll tick re-fires it immediately; otherwise
/// `retry_count` resets and the schedule's regularly computed
/// `next_run` (set by [`next_run_patch`] at publish time) stands.
fn finish_execution_patch(schedule: &Schedule, success: bool, now: chrono::DateTime<Utc>) -> Row {
    let mut patch = Row::new();
    if success {
        patch.insert("last_status".to_string(), json!("success"));
        patch.insert("retry_count".to_string(), json!(0));
        return patch;
    }

    patch.insert("last_status".to_string(), json!("failed"));
    if schedule.retry_on_failure && schedule.retry_count < schedule.max_retries {
        patch.insert("retry_count".to_string(), json!(schedule.retry_count + 1));
        patch.insert("next_run".to_string(), json!(now.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
    } else {
        patch.insert("retry_count".to_string(), json!(0));
    }
    patch
}

async fn poll_once(
    repository: &ScheduleRepository,
    event_bus: &Arc<dyn EventBus>,
    running: &Arc<RunningCounts>,
    now: chrono::DateTime<Utc>,
) -> shared::errors::AlyxResult<()> {
    let due = repository.get_due(now, DEFAULT_DUE_LIMIT).await?;

    for schedule in due {
        if should_skip(&schedule, running) {
            continue;
        }
        running.increment(&schedule.id);

        let event =
            ExecuteEvent { schedule_id: schedule.id.clone(), function_id: schedule.function_id.clone(), input: schedule.input.clone() };
        if let Err(err) = event_bus.publish(event).await {
            warn!(schedule_id = %schedule.id, error = %err, "failed to publish execute event");
        }

        let patch = next_run_patch(&schedule, now);
        if let Err(err) = repository.update(&schedule.id, patch).await {
            warn!(schedule_id = %schedule.id, error = %err, "failed to persist schedule advance");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::test_support::RecordingEventBus;
    use chrono::Duration;
    use serde_json::json;
    use shared::store::memory::InMemoryStore;

    fn due_schedule(id: &str, now: chrono::DateTime<Utc>) -> Schedule {
        let mut s = Schedule::new(
            id.to_string(),
            "test".to_string(),
            "fn-1".to_string(),
            json!({"x": 1}),
            ScheduleKind::Interval { expression: "1m".to_string() },
            "UTC".to_string(),
            0,
            false,
            false,
            0,
        );
        s.next_run = Some(now - Duration::seconds(1));
        s
    }

    #[tokio::test]
    async fn due_schedule_fires_event_and_advances_next_run() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let created = repository.create(due_schedule("s1", Utc::now())).await.unwrap();
        let event_bus = Arc::new(RecordingEventBus::default());
        let running = Arc::new(RunningCounts::default());

        let now = Utc::now();
        poll_once(&repository, &(event_bus.clone() as Arc<dyn EventBus>), &running, now).await.unwrap();

        let events = event_bus.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].schedule_id, created.id);

        let reloaded = repository.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(reloaded.execution_count, 1);
        assert!(reloaded.next_run.unwrap() > now);
    }

    #[tokio::test]
    async fn skip_if_running_prevents_overlap() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let now = Utc::now();
        let mut schedule = due_schedule("s1", now);
        schedule.skip_if_running = true;
        let created = repository.create(schedule).await.unwrap();
        let event_bus = Arc::new(RecordingEventBus::default());
        let running = Arc::new(RunningCounts::default());
        running.increment(&created.id);

        poll_once(&repository, &(event_bus.clone() as Arc<dyn EventBus>), &running, now).await.unwrap();

        assert!(event_bus.events.lock().is_empty());
    }

    #[tokio::test]
    async fn max_overlap_caps_concurrent_runs() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let now = Utc::now();
        let mut schedule = due_schedule("s1", now);
        schedule.max_overlap = 2;
        let created = repository.create(schedule).await.unwrap();
        let event_bus = Arc::new(RecordingEventBus::default());
        let running = Arc::new(RunningCounts::default());
        running.increment(&created.id);
        running.increment(&created.id);

        poll_once(&repository, &(event_bus.clone() as Arc<dyn EventBus>), &running, now).await.unwrap();

        assert!(event_bus.events.lock().is_empty());
    }

    #[tokio::test]
    async fn one_time_schedule_disables_itself_after_firing() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let now = Utc::now();
        let schedule = Schedule::new(
            "s1".to_string(),
            "once".to_string(),
            "fn-1".to_string(),
            json!({}),
            ScheduleKind::OneTime { at: now - Duration::seconds(1) },
            "UTC".to_string(),
            0,
            false,
            false,
            0,
        );
        let mut schedule = schedule;
        schedule.next_run = Some(now - Duration::seconds(1));
        let created = repository.create(schedule).await.unwrap();

        let event_bus = Arc::new(RecordingEventBus::default());
        let running = Arc::new(RunningCounts::default());
        poll_once(&repository, &(event_bus.clone() as Arc<dyn EventBus>), &running, now).await.unwrap();

        let reloaded = repository.find_by_id(&created.id).await.unwrap().unwrap();
        assert!(!reloaded.enabled);
        assert!(reloaded.next_run.is_none());
    }

    #[tokio::test]
    async fn finish_execution_retries_a_failed_run_immediately() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let mut schedule = due_schedule("s1", Utc::now());
        schedule.retry_on_failure = true;
        schedule.max_retries = 2;
        let created = repository.create(schedule).await.unwrap();

        let scheduler = Scheduler::new(repository.clone(), Arc::new(RecordingEventBus::default()));
        scheduler.finish_execution(&created.id, false).await;

        let reloaded = repository.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_status.as_deref(), Some("failed"));
        assert_eq!(reloaded.retry_count, 1);
        assert!(reloaded.next_run.unwrap() <= Utc::now());
    }

    #[tokio::test]
    async fn finish_execution_stops_retrying_once_budget_is_exhausted() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let mut schedule = due_schedule("s1", Utc::now());
        schedule.retry_on_failure = true;
        schedule.max_retries = 1;
        schedule.retry_count = 1;
        let created = repository.create(schedule).await.unwrap();

        let scheduler = Scheduler::new(repository.clone(), Arc::new(RecordingEventBus::default()));
        scheduler.finish_execution(&created.id, false).await;

        let reloaded = repository.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_status.as_deref(), Some("failed"));
        assert_eq!(reloaded.retry_count, 0);
    }

    #[tokio::test]
    async fn finish_execution_success_resets_retry_count() {
        let repository = ScheduleRepository::new(Arc::new(InMemoryStore::new()));
        let mut schedule = due_schedule("s1", Utc::now());
        schedule.retry_on_failure = true;
        schedule.max_retries = 3;
        schedule.retry_count = 2;
        let created = repository.create(schedule).await.unwrap();

        let scheduler = Scheduler::new(repository.clone(), Arc::new(RecordingEventBus::default()));
        scheduler.finish_execution(&created.id, true).await;

        let reloaded = repository.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_status.as_deref(), Some("success"));
        assert_eq!(reloaded.retry_count, 0);
    }

    #[test]
    fn finish_execution_releases_the_slot() {
        let running = RunningCounts::default();
        running.increment("s1");
        assert_eq!(running.get("s1"), 1);
        running.decrement("s1");
        assert_eq!(running.get("s1"), 0);
    }
}
