//! Per-identifier publish locks.
//!
//! Serialises the publish and reclaim steps for a single identifier while
//! leaving operations on other identifiers uncontended. Readers never take
//! these locks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::cache::key::StorageIdentifier;

#[derive(Debug, Default)]
pub(crate) struct IdentifierLocks {
    slots: Mutex<HashMap<StorageIdentifier, Arc<AsyncMutex<()>>>>,
}

impl IdentifierLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `id`, waiting for any current holder
    pub(crate) async fn lock(&self, id: &StorageIdentifier) -> IdentifierGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            // Slots referenced only by the table were left by canceled waiters
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots
                .entry(id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = slot.clone().lock_owned().await;
        IdentifierGuard {
            locks: self,
            id: id.clone(),
            slot,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

pub(crate) struct IdentifierGuard<'a> {
    locks: &'a IdentifierLocks,
    id: StorageIdentifier,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentifierGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut slots = self.locks.slots.lock();
        // One reference in the table, one in this guard: nobody else is waiting
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.id);
        }
    }
}
