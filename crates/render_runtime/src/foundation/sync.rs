//! Lock helpers
//!
//! A panic while holding one of the renderer's locks leaves the protected data in a
//! usable state (every critical section is a plain data update), so poisoning is ignored.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

