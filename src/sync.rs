// src/sync.rs

use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a std mutex, recovering the inner state if a holder panicked.
///
/// Every guarded resource in this crate stays consistent across a panic
/// (counters and collections only), so continuing is preferable to
/// poisoning the whole pipeline.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("poisoned mutex encountered; recovering inner state");
            poisoned.into_inner()
        }
    }
}
