//! # Brute-force protector
//!
//! Per-key failed-attempt counter with window reset, guarding login
//! against credential-stuffing. Shares the rate limiter's locking shape:
//! a per-key mutex behind an outer `RwLock` touched only for lookup or
//! insert.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use shared::lifecycle::BackgroundWorker;

struct Record {
    count: u32,
    first_attempt: Instant,
    last_attempt: Instant,
}

pub struct BruteForceProtector {
    threshold: u32,
    window: Duration,
    records: Arc<RwLock<HashMap<String, Mutex<Record>>>>,
    sweeper: Option<BackgroundWorker>,
}

impl BruteForceProtector {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self { threshold, window, records: Arc::new(RwLock::new(HashMap::new())), sweeper: None }
    }

    pub fn record_failed_attempt(&self, key: &str) {
        {
            let records = self.records.read();
            if let Some(record) = records.get(key) {
                Self::bump(record, self.window);
                return;
            }
        }

        let mut records = self.records.write();
        let record = records
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Record { count: 0, first_attempt: Instant::now(), last_attempt: Instant::now() }));
        Self::bump(record, self.window);
    }

    fn bump(record: &Mutex<Record>, window: Duration) {
        let mut record = record.lock();
        let now = Instant::now();
        if now.duration_since(record.first_attempt) >= window {
            record.count = 0;
            record.first_attempt = now;
        }
        record.count += 1;
        record.last_attempt = now;
    }

    pub fn is_blocked(&self, key: &str) -> bool {
        let records = self.records.read();
        let Some(record) = records.get(key) else { return false };
        let record = record.lock();
        record.count >= self.threshold && Instant::now().duration_since(record.first_attempt) < self.window
    }

    /// Remaining time until `key`'s lockout window elapses, or `None` if
    /// `key` is not currently blocked. Lets a caller surface
    /// `AlyxError::AccountLocked { until }` with a concrete wall-clock
    /// instant instead of just a boolean.
    pub fn remaining_lockout(&self, key: &str) -> Option<Duration> {
        let records = self.records.read();
        let record = records.get(key)?;
        let record = record.lock();
        if record.count < self.threshold {
            return None;
        }
        let elapsed = Instant::now().duration_since(record.first_attempt);
        self.window.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Called after a successful authentication.
    pub fn clear_attempts(&self, key: &str) {
        self.records.write().remove(key);
    }

    pub fn start_sweeper(&mut self, sweep_interval: Duration) {
        let records = self.records.clone();
        let stale_after = self.window * 2;
        self.sweeper = Some(BackgroundWorker::spawn(move |notify| async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        records.write().retain(|_, r| now.duration_since(r.lock().last_attempt) < stale_after);
                    }
                }
            }
        }));
    }

    pub fn stop_sweeper(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_threshold_attempts() {
        let protector = BruteForceProtector::new(3, Duration::from_secs(60));
        protector.record_failed_attempt("k");
        protector.record_failed_attempt("k");
        assert!(!protector.is_blocked("k"));
        protector.record_failed_attempt("k");
        assert!(protector.is_blocked("k"));
    }

    #[test]
    fn clear_attempts_unblocks() {
        let protector = BruteForceProtector::new(1, Duration::from_secs(60));
        protector.record_failed_attempt("k");
        assert!(protector.is_blocked("k"));
        protector.clear_attempts("k");
        assert!(!protector.is_blocked("k"));
    }

    #[test]
    fn window_reset_clears_count() {
        let protector = BruteForceProtector::new(2, Duration::from_millis(10));
        protector.record_failed_attempt("k");
        protector.record_failed_attempt("k");
        assert!(protector.is_blocked("k"));

        std::thread::sleep(Duration::from_millis(20));
        protector.record_failed_attempt("k");
        assert!(!protector.is_blocked("k"));
    }

    #[test]
    fn unknown_key_is_not_blocked() {
        let protector = BruteForceProtector::new(3, Duration::from_secs(60));
        assert!(!protector.is_blocked("nope"));
    }

    #[test]
    fn remaining_lockout_is_none_until_blocked() {
        let protector = BruteForceProtector::new(2, Duration::from_secs(60));
        protector.record_failed_attempt("k");
        assert!(protector.remaining_lockout("k").is_none());

        protector.record_failed_attempt("k");
        assert!(protector.remaining_lockout("k").is_some());
    }
}
