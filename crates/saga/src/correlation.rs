//! Per-correlation-key serialization of saga handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::CorrelationKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async lock per correlation key.
///
/// Locks that nobody holds or waits for are dropped on the next acquisition.
#[derive(Debug, Default)]
pub struct CorrelationLocks {
    locks: Mutex<HashMap<CorrelationKey, Arc<AsyncMutex<()>>>>,
}

impl CorrelationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other handler holds `key`.
    pub async fn acquire(&self, key: &CorrelationKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|k, lock| k == key || Arc::strong_count(lock) > 1);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
