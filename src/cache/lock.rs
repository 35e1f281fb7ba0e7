use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a store mutex, carrying on with the inner state if a previous holder
/// panicked. Cached data is disposable, so a poisoned lock is never fatal.
pub(crate) fn lock_store<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            op,
            lock_kind = "mutex",
            result = "poisoned_recovered",
            "Recovered from poisoned cache store lock"
        );
        poisoned.into_inner()
    })
}
