//! Per-thread registry of active call contexts.
//!
//! Each thread keeps, for every tag type, a stack of instance identities that
//! are currently "active" on that thread. An activation is opened with
//! [`CallContext::enter`] and closed when the returned [`ContextGuard`] drops,
//! so entries are popped on every exit path, unwinding included.
//!
//! The work queue uses this to answer "is this thread inside my `run()` loop",
//! and the strand to answer "is this thread currently draining me". Each uses
//! its own tag, so the two stacks never see each other's entries.
//!
//! ```
//! use strand::CallContext;
//!
//! enum Busy {}
//!
//! let resource = String::from("printer");
//! assert!(!CallContext::<Busy>::contains(&resource));
//! {
//!     let _guard = CallContext::<Busy>::enter(&resource);
//!     assert!(CallContext::<Busy>::contains(&resource));
//! }
//! assert!(!CallContext::<Busy>::contains(&resource));
//! ```

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::sync::thread_local;

thread_local! {
    static STACKS: RefCell<HashMap<TypeId, Vec<usize>>> = RefCell::new(HashMap::new());
}

/// Identity of an instance: its address. Stable for as long as the instance
/// is borrowed by an active guard. Zero-sized values may share an address, so
/// they do not have distinct identities.
fn identity<T: ?Sized>(instance: &T) -> usize {
    instance as *const T as *const () as usize
}

/// Namespace for the per-thread stacks of one tag type.
///
/// `Tag` is only used as a key; it is typically an uninhabited marker enum.
pub struct CallContext<Tag: 'static> {
    _tag: PhantomData<fn() -> Tag>,
}

impl<Tag: 'static> CallContext<Tag> {
    /// Mark `instance` active on the current thread until the guard drops.
    ///
    /// Instances are told apart by address. Distinct zero-sized values can
    /// share one, so `instance` should not be zero-sized.
    #[must_use = "the context is closed as soon as the guard is dropped"]
    pub fn enter<T: ?Sized>(instance: &T) -> ContextGuard<Tag> {
        let id = identity(instance);
        STACKS.with(|stacks| {
            stacks
                .borrow_mut()
                .entry(TypeId::of::<Tag>())
                .or_default()
                .push(id);
        });
        ContextGuard {
            id,
            _tag: PhantomData,
            _not_send: PhantomData,
        }
    }

    /// Whether `instance` is active anywhere on the current thread's stack.
    ///
    /// A zero-sized `instance` may match another value at the same address.
    pub fn contains<T: ?Sized>(instance: &T) -> bool {
        let id = identity(instance);
        STACKS.with(|stacks| {
            stacks
                .borrow()
                .get(&TypeId::of::<Tag>())
                .is_some_and(|stack| stack.contains(&id))
        })
    }

    /// Number of activations of this tag open on the current thread.
    pub fn depth() -> usize {
        STACKS.with(|stacks| {
            stacks
                .borrow()
                .get(&TypeId::of::<Tag>())
                .map_or(0, Vec::len)
        })
    }
}

/// Closes one activation when dropped.
///
/// Guards are tied to the thread that created them and must be dropped in
/// reverse order of creation, which scoping guarantees.
pub struct ContextGuard<Tag: 'static> {
    id: usize,
    _tag: PhantomData<fn() -> Tag>,
    _not_send: PhantomData<*const ()>,
}

impl<Tag: 'static> Drop for ContextGuard<Tag> {
    fn drop(&mut self) {
        STACKS.with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            let stack = stacks.entry(TypeId::of::<Tag>()).or_default();
            let popped = stack.pop();
            debug_assert_eq!(popped, Some(self.id), "call context closed out of order");
        });
    }
}

impl<Tag: 'static> fmt::Debug for ContextGuard<Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard")
            .field("tag", &std::any::type_name::<Tag>())
            .field("id", &format_args!("{:#x}", self.id))
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::thread;

    enum Outer {}
    enum Inner {}

    #[test]
    fn nested_contexts_form_a_stack() {
        let a = 1u8;
        let b = 2u8;
        {
            let _ga = CallContext::<Outer>::enter(&a);
            assert_eq!(CallContext::<Outer>::depth(), 1);
            {
                let _gb = CallContext::<Outer>::enter(&b);
                assert!(CallContext::<Outer>::contains(&a));
                assert!(CallContext::<Outer>::contains(&b));
                assert_eq!(CallContext::<Outer>::depth(), 2);
            }
            assert!(CallContext::<Outer>::contains(&a));
            assert!(!CallContext::<Outer>::contains(&b));
        }
        assert_eq!(CallContext::<Outer>::depth(), 0);
    }

    #[test]
    fn same_instance_can_be_entered_twice() {
        let a = 0u32;
        let _g1 = CallContext::<Outer>::enter(&a);
        {
            let _g2 = CallContext::<Outer>::enter(&a);
            assert_eq!(CallContext::<Outer>::depth(), 2);
        }
        assert!(CallContext::<Outer>::contains(&a));
    }

    #[test]
    fn adjacent_instances_are_distinct() {
        let slots = [0u8; 2];
        let _g = CallContext::<Outer>::enter(&slots[0]);
        assert!(CallContext::<Outer>::contains(&slots[0]));
        assert!(!CallContext::<Outer>::contains(&slots[1]));
    }

    #[test]
    fn tags_are_independent() {
        let a = 0u64;
        let _g = CallContext::<Outer>::enter(&a);
        assert!(CallContext::<Outer>::contains(&a));
        assert!(!CallContext::<Inner>::contains(&a));
        assert_eq!(CallContext::<Inner>::depth(), 0);
    }

    #[test]
    fn other_threads_do_not_see_entries() {
        let a = 42i32;
        let _g = CallContext::<Outer>::enter(&a);
        let seen = thread::scope(|s| {
            s.spawn(|| CallContext::<Outer>::contains(&a))
                .join()
                .unwrap()
        });
        assert!(!seen);
        assert!(CallContext::<Outer>::contains(&a));
    }

    #[test]
    fn unwinding_pops_the_entry() {
        let a = 7i32;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _g = CallContext::<Inner>::enter(&a);
            assert!(CallContext::<Inner>::contains(&a));
            panic!("handler failed");
        }));
        assert!(result.is_err());
        assert!(!CallContext::<Inner>::contains(&a));
        assert_eq!(CallContext::<Inner>::depth(), 0);
    }
}
