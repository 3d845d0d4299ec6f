//! # Revocation set
//!
//! A concurrent `token_fingerprint -> natural_expiry` map. `is_revoked`
//! is true iff the fingerprint is present AND its expiry is still in the
//! future — an entry outliving its own token's expiry is simply stale and
//! is treated as not-revoked without needing an explicit delete. A
//! background sweeper removes stale entries at a fixed period; stopping
//! the sweeper does not itself clear anything.
//!
//! Uses `parking_lot::RwLock` over a std collection rather than pulling
//! in a concurrent-map crate like `dashmap`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shared::lifecycle::BackgroundWorker;

#[derive(Default)]
struct Inner {
    entries: HashMap<String, DateTime<Utc>>,
}

pub struct RevocationSet {
    inner: Arc<RwLock<Inner>>,
    sweeper: Option<BackgroundWorker>,
}

impl RevocationSet {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::default())), sweeper: None }
    }

    /// Marks `fingerprint` revoked until `natural_expiry`. Held under a
    /// writer lock.
    pub fn revoke(&self, fingerprint: String, natural_expiry: DateTime<Utc>) {
        self.inner.write().entries.insert(fingerprint, natural_expiry);
    }

    /// True iff present and not yet naturally expired. Held under a
    /// reader lock.
    pub fn is_revoked(&self, fingerprint: &str) -> bool {
        match self.inner.read().entries.get(fingerprint) {
            Some(expiry) => *expiry > Utc::now(),
            None => false,
        }
    }

    /// Starts the background sweeper. Calling this more than once leaks
    /// the previous worker's handle without double-running the loop,
    /// since the old `BackgroundWorker` would already have been dropped
    /// (and thus stopped) by the caller replacing it.
    pub fn start_sweeper(&mut self, period: std::time::Duration) {
        let inner = self.inner.clone();
        self.sweeper = Some(BackgroundWorker::spawn(move |notify| async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        inner.write().entries.retain(|_, expiry| *expiry > now);
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

impl Default for RevocationSet {
    fn default() -> Self {
        Self::new()
    }
}
