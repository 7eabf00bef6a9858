use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes operations on the same component.
///
/// Clones share their locks. Operations on different components never wait
/// for each other.
#[derive(Clone, Debug, Default)]
pub struct ComponentLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of one operation on a component.
#[derive(Debug)]
pub struct ComponentGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ComponentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other operation holds `component` and locks it.
    pub async fn lock(&self, component: &str) -> ComponentGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody waits on anymore are dropped on the way.
            locks.retain(|name, lock| name == component || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(component.to_owned()).or_default())
        };

        ComponentGuard {
            _guard: lock.lock_owned().await,
        }
    }
}
