use parking_lot::Mutex;
use std::sync::Arc;

/// Shared, lock-protected value (config, directory snapshots).
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Clones the current value out so callers never hold the lock across work.
pub fn snapshot<T: Clone>(shared: &Shared<T>) -> T {
    shared.lock().clone()
}
