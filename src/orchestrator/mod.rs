//! Run orchestration.
//!
//! Covers the per-key process registry, agent spawning and supervision,
//! the submission queue, and the bridge that drains queued work through
//! the renderer.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod bridge;
pub mod queue;
pub mod registry;
pub mod spawner;
pub mod supervisor;

/// Lock a shared map, recovering the guard if a holder panicked.
///
/// Critical sections in this module only perform map bookkeeping, so the
/// data stays consistent even when a panic unwinds through one.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
