//! Per-caller extraction serialization.
//!
//! Concurrent conversations from the same caller must not interleave
//! their dedup-then-store critical sections — a lost reinforcement or a
//! duplicate insert would violate the store's one-hash-per-caller
//! invariant. Each caller id maps to a `Semaphore(1)`; waiters queue in
//! FIFO order. Entries are created lazily and pruned when idle so the
//! map does not grow with the all-time caller population.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Manages per-caller extraction locks.
pub struct CallerLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for CallerLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CallerLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the extraction lock for a caller, waiting if another job
    /// for the same caller holds it. The permit auto-releases on drop.
    ///
    /// This lock is the one place the design allows holding a lock across
    /// suspension points — it must span the dedup round trip.
    pub async fn acquire(&self, caller_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(caller_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        sem.acquire_owned()
            .await
            .expect("caller lock semaphore is never closed")
    }

    /// Number of tracked callers (exported via the health endpoint).
    pub fn caller_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Remove locks nobody currently holds or waits on.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        // `Arc` count 1 = only the map refers to it, so no holder and no
        // waiter; available permit confirms no in-flight critical section.
        locks.retain(|_, sem| Arc::strong_count(sem) > 1 || sem.available_permits() == 0);
    }
}
