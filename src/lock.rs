//! # Run Serialization Guard
//!
//! Ensures at most one aggregation run is active system-wide. The lock is an
//! explicit entity (key, holder id, acquired-at, ceiling) behind a
//! compare-and-set store trait so a shared key-value backend can take the
//! place of the in-memory store in multi-process deployments.
//!
//! A second invocation while the lock is held is a no-op: skipped, not queued,
//! not an error. A holder past the ceiling (36 hours by default) is treated as
//! abandoned and displaced.

use crate::config::LockConfig;
use crate::error::{AggregationError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Compare-and-set lock storage.
#[async_trait]
pub trait LockStore: Send + Sync + 'static {
    /// Atomically acquire `key` for `holder` unless another unexpired holder
    /// exists. Returns whether the acquisition succeeded.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Release `key` if `holder` still owns it.
    async fn release(&self, key: &str, holder: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct LockEntry {
    holder: String,
    acquired_at: Instant,
    ttl: Duration,
}

impl LockEntry {
    fn expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }
}

/// Single-process lock store. The whole table sits behind one mutex so
/// check-and-insert is atomic.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, LockEntry>>,
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(key) {
            if !existing.expired() {
                return Ok(false);
            }
            warn!(
                key,
                previous_holder = %existing.holder,
                ttl_secs = ttl.as_secs(),
                "Lock ceiling elapsed, treating previous holder as abandoned"
            );
        }
        entries.insert(
            key.to_owned(),
            LockEntry {
                holder: holder.to_owned(),
                acquired_at: Instant::now(),
                ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| entry.holder == holder) {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Wraps the run-level orchestration so only one instance is active at a time.
pub struct RunGuard {
    store: Arc<dyn LockStore>,
    key: String,
    ttl: Duration,
}

impl RunGuard {
    pub fn new(store: Arc<dyn LockStore>, config: &LockConfig) -> Self {
        Self {
            store,
            key: config.key.clone(),
            ttl: config.ttl(),
        }
    }

    /// Run the closure's future under the lock. Resolves to `Ok(None)` without
    /// running anything when another holder is active.
    pub async fn run_exclusive<F, Fut, T>(&self, run: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let holder = Uuid::new_v4().to_string();
        if !self.store.try_acquire(&self.key, &holder, self.ttl).await? {
            info!(key = %self.key, "Aggregation run already in progress, skipping");
            return Ok(None);
        }
        info!(key = %self.key, holder = %holder, "Acquired aggregation run lock");

        let result = run().await;

        if let Err(err) = self.store.release(&self.key, &holder).await {
            warn!(key = %self.key, error = %err, "Failed to release aggregation run lock");
        }
        result.map(Some)
    }
}

impl From<&LockConfig> for RunGuard {
    fn from(config: &LockConfig) -> Self {
        Self::new(Arc::new(InMemoryLockStore::default()), config)
    }
}
