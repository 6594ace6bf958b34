use std::sync::{Arc, Mutex};

/// Memoization slot for an immutable derived value.
///
/// `get_or_compute` returns the cached value when present and otherwise runs
/// the supplier under the slot's lock, so at most one computation runs per
/// cache at a time and readers never observe a partially-built value.
/// `invalidate` clears the slot; an invalidation racing a compute simply
/// discards that compute's result on the next read.
///
/// The supplier must not re-enter the same cache.
pub struct SnapshotCache<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> SnapshotCache<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn get_or_compute(&self, compute: impl FnOnce() -> T) -> Arc<T> {
        let mut slot = self.slot.lock().unwrap();
        if let Some(value) = slot.as_ref() {
            return Arc::clone(value);
        }
        let value = Arc::new(compute());
        *slot = Some(Arc::clone(&value));
        value
    }

    pub fn invalidate(&self) {
        *self.slot.lock().unwrap() = None;
    }

    /// Cached value, if any, without triggering a compute.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.slot.lock().unwrap().clone()
    }
}

impl<T> Default for SnapshotCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
