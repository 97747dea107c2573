use crate::domain::ports::{LockGuard, LockOutcome, LockService};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// An in-process lock table keyed by transaction id.
///
/// Stands in for a networked lease lock: no cross-process guarantee and no
/// expiry of held locks. Entries are created on first use and dropped again
/// once nobody holds or waits on them.
pub struct InMemoryLockManager {
    entries: Arc<LockTable>,
    timeout: Duration,
}

/// Releases its key on drop, so a cancelled holder cannot leak the lock.
struct HeldLock {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    entries: Arc<LockTable>,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        evict_if_idle(&self.entries, &self.key);
    }
}

/// Removes the entry when only the table references the mutex: no holder,
/// no waiter.
fn evict_if_idle(entries: &LockTable, key: &str) {
    entries.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
}

impl InMemoryLockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Number of lock entries currently in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        // The entry guard holds the shard lock, so racing first attempts
        // converge on one mutex.
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl LockService for InMemoryLockManager {
    async fn try_acquire(&self, key: &str) -> Result<LockOutcome> {
        let lock = self.entry(key);
        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(LockOutcome::Acquired(LockGuard::new(HeldLock {
                key: key.to_string(),
                guard: Some(guard),
                entries: Arc::clone(&self.entries),
            }))),
            Err(_) => {
                tracing::debug!(
                    key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "lock wait timed out"
                );
                // The holder may have released while we waited.
                evict_if_idle(&self.entries, key);
                Ok(LockOutcome::TimedOut)
            }
        }
    }
}
