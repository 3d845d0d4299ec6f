//! # Change detector
//!
//! Polls `Store::changes_after` on a fixed interval (default 50ms for
//! this crate — the scheduler owns its own, slower
//! poller over the same table). Non-blocking send into a bounded
//! channel; a full channel drops the change and logs a warning,
//! matching the explicit backpressure contract exactly —
//! missed changes are acceptable, duplicated ones are not, hence
//! `id > last_seen_id`, never `>=`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shared::lifecycle::BackgroundWorker;
use shared::store::{ChangeRow, Store};
use tokio::sync::mpsc;
use tracing::warn;

const CHANGES_PER_TICK: i64 = 1000;

pub struct ChangeDetector {
    last_seen_id: Arc<AtomicI64>,
    worker: Option<BackgroundWorker>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self { last_seen_id: Arc::new(AtomicI64::new(0)), worker: None }
    }

    pub fn last_seen_id(&self) -> i64 {
        self.last_seen_id.load(Ordering::SeqCst)
    }

    /// Starts polling. `sender` receives each detected change via
    /// `try_send`; a full channel is logged and the change dropped.
    pub fn start(&mut self, store: Arc<dyn Store>, sender: mpsc::Sender<ChangeRow>, poll_interval: Duration) {
        let last_seen_id = self.last_seen_id.clone();
        self.worker = Some(BackgroundWorker::spawn(move |notify| async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = tick(&store, &last_seen_id, &sender).await {
                            warn!(error = %err, "change detector tick failed");
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
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new()
    }
}

async fn tick(store: &Arc<dyn Store>, last_seen_id: &Arc<AtomicI64>, sender: &mpsc::Sender<ChangeRow>) -> shared::errors::AlyxResult<()> {
    let since = last_seen_id.load(Ordering::SeqCst);
    let changes = store.changes_after(since, CHANGES_PER_TICK).await?;
    if changes.is_empty() {
        return Ok(());
    }

    let max_id = changes.iter().map(|c| c.id).max().unwrap_or(since);

    for change in changes {
        if sender.try_send(change).is_err() {
            warn!("realtime change channel full, dropping change");
        }
    }

    last_seen_id.store(max_id, Ordering::SeqCst);
    store.mark_processed(max_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::store::memory::InMemoryStore;
    use shared::store::ChangeOperation;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn detects_and_advances_past_seen_changes() {
        let mem = Arc::new(InMemoryStore::new());
        mem.record_change("posts", ChangeOperation::Insert, "doc-1", None);
        let store: Arc<dyn Store> = mem;

        let (tx, mut rx) = mpsc::channel(16);
        let mut detector = ChangeDetector::new();
        detector.start(store.clone(), tx, StdDuration::from_millis(5));

        let change = tokio::time::timeout(StdDuration::from_millis(200), rx.recv()).await.unwrap().unwrap();
        assert_eq!(change.doc_id, "doc-1");

        detector.stop();
        detector.join().await;
        assert_eq!(detector.last_seen_id(), change.id);
    }

    #[tokio::test]
    async fn full_channel_drops_without_panicking() {
        let mem = Arc::new(InMemoryStore::new());
        for i in 0..5 {
            mem.record_change("posts", ChangeOperation::Insert, &format!("doc-{i}"), None);
        }
        let store: Arc<dyn Store> = mem;

        let (tx, _rx) = mpsc::channel(1);
        let mut detector = ChangeDetector::new();
        detector.start(store.clone(), tx, StdDuration::from_millis(5));

        tokio::time::sleep(StdDuration::from_millis(60)).await;
        detector.stop();
        detector.join().await;
    }
}
