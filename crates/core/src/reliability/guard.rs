use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::domain::mutation::IdempotencyKey;

/// Process-local set of idempotency keys with a mutation in flight.
///
/// Offers no exclusion across separate processes.
#[derive(Clone, Debug, Default)]
pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlightGuard {
    /// Claims `key`, or returns `None` when another task already holds it.
    pub fn try_acquire(&self, key: &IdempotencyKey) -> Option<InFlightPermit> {
        let inserted = match self.keys.lock() {
            Ok(mut keys) => keys.insert(key.0.clone()),
            Err(poisoned) => poisoned.into_inner().insert(key.0.clone()),
        };
        inserted.then(|| InFlightPermit { keys: Arc::clone(&self.keys), key: key.0.clone() })
    }

    pub fn is_held(&self, key: &IdempotencyKey) -> bool {
        match self.keys.lock() {
            Ok(keys) => keys.contains(&key.0),
            Err(poisoned) => poisoned.into_inner().contains(&key.0),
        }
    }

    pub fn len(&self) -> usize {
        match self.keys.lock() {
            Ok(keys) => keys.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its key when dropped, on every exit path.
#[derive(Debug)]
pub struct InFlightPermit {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        match self.keys.lock() {
            Ok(mut keys) => {
                keys.remove(&self.key);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.key);
            }
        }
    }
}
