//! Synchronization primitives abstraction for loom testing.
//!
//! When compiled with `--cfg loom`, this module uses loom's types which allow
//! deterministic concurrency testing. Otherwise, it uses std types.
//!
//! Everything that blocks or is shared between threads inside the crate goes
//! through these re-exports. `Arc` stays std in both configurations.

#[cfg(loom)]
pub(crate) use loom::sync::{Condvar, Mutex, MutexGuard};

#[cfg(not(loom))]
pub(crate) use std::sync::{Condvar, Mutex, MutexGuard};

#[cfg(loom)]
pub(crate) use loom::thread_local;

#[cfg(not(loom))]
pub(crate) use std::thread_local;

// =============================================================================
// Poison recovery
// =============================================================================
//
// User code never runs while one of our locks is held, so a poisoned lock can
// only come from a panic inside a short state transition closure. The state is
// still consistent at that point; recover the guard instead of propagating.

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn wait<'a, T>(cond: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cond.wait(guard).unwrap_or_else(std::sync::PoisonError::into_inner)
}
