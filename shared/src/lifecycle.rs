//! # Background worker lifecycle
//!
//! Every sweeper or poller in this codebase (revocation sweeper,
//! rate-limit sweeper, brute-force sweeper, OAuth-state sweeper, change
//! detector, scheduler poll loop, upload cleanup) shares the same
//! lifecycle: spawned with a done-signal, stoppable exactly once, joinable
//! to await task exit. `BackgroundWorker` is that shared shape so each
//! subsystem doesn't reinvent it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A spawned background task with a cooperative stop signal.
///
/// `stop()` is idempotent: calling it more than once is a no-op, guarded
/// by an `AtomicBool`. `join()` awaits the task's actual exit, which only
/// happens once the task observes the stop signal (or finishes on its
/// own, which well-behaved workers here never do until told to).
pub struct BackgroundWorker {
    notify: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Spawns `run`, passing it a clone of the stop signal. `run` is
    /// expected to loop, periodically checking `notified()` (e.g. via
    /// `tokio::select!` against a sleep/interval tick) and returning once
    /// it fires.
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(Arc<Notify>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let notify = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(notify.clone()));

        Self { notify, stopped, handle: Some(handle) }
    }

    /// Signals the worker to stop. Safe to call more than once; only the
    /// first call has any effect.
    ///
    /// Uses `notify_one`, not `notify_waiters`: every consumer loop here is
    /// a `select!` between `notified()` and a ticker, and the task is not
    /// a registered waiter while the tick branch's body is `await`ing. A
    /// `notify_waiters` landing in that window would wake no one and
    /// leave no permit behind, so `stop()` would be silently lost and
    /// `join()` could hang forever. `notify_one` buffers a single permit
    /// when there's no waiter yet, so the next `notified().await` returns
    /// immediately regardless of when `stop()` was called.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_one();
    }

    /// Awaits the worker task's exit. Does not itself signal a stop —
    /// call [`Self::stop`] first if the worker should exit promptly.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_then_join_exits_promptly() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticks_clone = ticks.clone();

        let mut worker = BackgroundWorker::spawn(move |notify| async move {
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {
                        ticks_clone.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.stop();
        worker.join().await;

        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn stop_during_tick_body_is_not_lost() {
        let mut worker = BackgroundWorker::spawn(move |notify| async move {
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = tokio::time::sleep(Duration::from_millis(1)) => {
                        // Simulates tick work long enough that the task
                        // is briefly not a registered `notified()` waiter
                        // when `stop()` below runs.
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        worker.stop();
        worker.join().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut worker = BackgroundWorker::spawn(|notify| async move {
            notify.notified().await;
        });

        worker.stop();
        worker.stop();
        worker.stop();
        worker.join().await;
    }
}
