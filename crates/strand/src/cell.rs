//! Mutex-protected value with closure-scoped access.
//!
//! A [`TransactionalCell`] never hands out a guard. All access goes through
//! [`apply`](TransactionalCell::apply), which runs a closure against the value
//! for the duration of one lock acquisition. This keeps every state transition
//! of the strand and the work queue a single, visibly-bounded critical section.

use std::fmt;

use crate::sync::{self, Condvar, Mutex};

/// A value that is only ever observed under its lock.
///
/// # Reentrancy
///
/// `apply` is not reentrant. Calling `apply` on the same cell from inside the
/// closure deadlocks. The closures in this crate only perform short queue and
/// flag updates and never call out to user code.
pub struct TransactionalCell<T> {
    value: Mutex<T>,
}

impl<T> TransactionalCell<T> {
    pub fn new(value: T) -> Self {
        Self { value: Mutex::new(value) }
    }

    /// Run `f` with exclusive access to the value and return its result.
    ///
    /// The lock is released before this returns, including when `f` panics.
    pub fn apply<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = sync::lock(&self.value);
        f(&mut guard)
    }

    /// Block on `cond` until `ready` holds, then run `f` under the same lock
    /// acquisition.
    ///
    /// `cond` must only ever be paired with this cell. Writers signal it after
    /// making `ready` true; spurious wake-ups re-check the predicate.
    pub fn apply_when<R>(
        &self,
        cond: &Condvar,
        mut ready: impl FnMut(&T) -> bool,
        f: impl FnOnce(&mut T) -> R,
    ) -> R {
        let mut guard = sync::lock(&self.value);
        while !ready(&guard) {
            guard = sync::wait(cond, guard);
        }
        f(&mut guard)
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T: Default> Default for TransactionalCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for TransactionalCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalCell").finish_non_exhaustive()
    }
}
