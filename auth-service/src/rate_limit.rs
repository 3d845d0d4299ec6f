//! # Rate limiter (token bucket)
//!
//! Fixed-window-with-refill, not a strict leaky bucket — deliberately
//! simpler semantics than a true token bucket, sufficient for admission
//! control on auth endpoints. Per-key state lives behind its own mutex;
//! the outer `RwLock` guarding the key map is only ever held briefly, for
//! lookup or insert of a new key's bucket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use shared::lifecycle::BackgroundWorker;

struct Bucket {
    tokens: u32,
    last_refill: Instant,
    last_seen: Instant,
}

pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    buckets: Arc<RwLock<HashMap<String, Mutex<Bucket>>>>,
    sweeper: Option<BackgroundWorker>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window, buckets: Arc::new(RwLock::new(HashMap::new())), sweeper: None }
    }

    /// `Allow(key)`: refills if a full window has elapsed since the last
    /// refill, then consumes a token if any remain.
    pub fn allow(&self, key: &str) -> bool {
        {
            let buckets = self.buckets.read();
            if let Some(bucket) = buckets.get(key) {
                return self.try_consume(bucket);
            }
        }

        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(Bucket { tokens: self.capacity, last_refill: Instant::now(), last_seen: Instant::now() })
        });
        self.try_consume(bucket)
    }

    fn try_consume(&self, bucket: &Mutex<Bucket>) -> bool {
        let mut bucket = bucket.lock();
        let now = Instant::now();
        if now.duration_since(bucket.last_refill) >= self.window {
            bucket.tokens = self.capacity;
            bucket.last_refill = now;
        }
        bucket.last_seen = now;

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn start_sweeper(&mut self, sweep_interval: Duration) {
        let buckets = self.buckets.clone();
        let idle_after = self.window * 2;
        self.sweeper = Some(BackgroundWorker::spawn(move |notify| async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        buckets.write().retain(|_, b| now.duration_since(b.lock().last_seen) < idle_after);
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
