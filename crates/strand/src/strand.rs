//! Serialized handler execution on a shared processor.
//!
//! A [`Strand`] guarantees:
//! - no two of its handlers execute concurrently;
//! - handlers only execute on threads inside the bound processor's dispatch
//!   loop;
//! - no lock is held while a handler runs, so handlers may freely call back
//!   into this or any other strand.
//!
//! Handler execution order across submitting threads is not guaranteed.
//!
//! # Ownership
//!
//! A strand is either idle (`running == false`, queue empty) or owned by
//! exactly one thread that drains its queue until it is empty and then marks
//! it idle again. Ownership is claimed with a single transition on the state
//! cell and never handed directly to another thread.
//!
//! ```text
//!              post / dispatch claims
//!   ┌──────┐ ─────────────────────────▶ ┌──────────────┐
//!   │ Idle │                            │ Owned by T   │ ◀─┐ pop + run
//!   └──────┘ ◀───────────────────────── └──────────────┘ ──┘
//!              T observes empty queue
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::{error, trace};

use crate::call_context::CallContext;
use crate::cell::TransactionalCell;
use crate::work_queue::Job;

// =============================================================================
// Processor contract
// =============================================================================

/// What a strand needs from the pool it runs on.
pub trait Processor: Send + Sync + 'static {
    /// Schedule `work` to run on one of the processor's dispatching threads.
    fn push<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static;

    /// Whether the calling thread is currently inside the processor's
    /// dispatch loop.
    fn can_dispatch(&self) -> bool;
}

// =============================================================================
// Shared state
// =============================================================================

#[derive(Default)]
struct State {
    running: bool,
    queue: VecDeque<Job>,
}

/// Call-context tag for threads currently draining a strand.
enum Draining {}

struct Shared<P> {
    state: TransactionalCell<State>,
    processor: Arc<P>,
}

impl<P: Processor> Shared<P> {
    fn running_in_this_thread(&self) -> bool {
        CallContext::<Draining>::contains(self)
    }

    /// Schedule a drain on the processor. The caller must have set `running`
    /// and hands its ownership to the scheduled task.
    fn schedule_drain(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        self.processor.push(move || shared.drain());
    }

    /// Entry point of a scheduled drain task.
    fn drain(self: Arc<Self>) {
        let _ctx = CallContext::<Draining>::enter(&*self);
        self.drain_owned();
    }

    /// Run queued handlers until the queue is empty, then release ownership.
    ///
    /// Must be called by the owning thread with the draining context open.
    fn drain_owned(self: &Arc<Self>) {
        let resume = ResumeOnUnwind::arm(self);
        let mut ran = 0usize;

        loop {
            let next = self.state.apply(|state| {
                if !state.running {
                    error!("strand drained while not marked running");
                    std::process::abort();
                }
                let next = state.queue.pop_front();
                if next.is_none() {
                    state.running = false;
                }
                next
            });

            match next {
                Some(handler) => {
                    handler();
                    ran += 1;
                }
                None => break,
            }
        }

        resume.disarm();
        trace!(handlers = ran, "strand released");
    }
}

/// Keeps a strand owned when a handler unwinds out of a drain.
///
/// `running` is still set at that point and the queue may hold more handlers,
/// so ownership moves to a freshly scheduled drain task instead of being lost.
/// Dropped only on the unwinding path; normal completion calls `disarm`.
struct ResumeOnUnwind<'a, P: Processor> {
    shared: &'a Arc<Shared<P>>,
}

impl<'a, P: Processor> ResumeOnUnwind<'a, P> {
    fn arm(shared: &'a Arc<Shared<P>>) -> Self {
        Self { shared }
    }

    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<P: Processor> Drop for ResumeOnUnwind<'_, P> {
    fn drop(&mut self) {
        trace!("handler unwound, rescheduling drain");
        self.shared.schedule_drain();
    }
}

// =============================================================================
// Strand
// =============================================================================

/// Serializes handlers submitted from any thread onto a shared processor.
///
/// The strand keeps its processor alive. Dropping the strand while handlers
/// are still queued is fine: the pending drain task holds its own reference
/// to the queue and runs them.
pub struct Strand<P: Processor> {
    shared: Arc<Shared<P>>,
}

impl<P: Processor> Strand<P> {
    pub fn new(processor: Arc<P>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: TransactionalCell::default(),
                processor,
            }),
        }
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.shared.processor
    }

    /// Run `handler` before returning if the strand guarantees allow it,
    /// otherwise behave like [`post`](Self::post).
    ///
    /// `handler` runs inline when the caller is a dispatching thread of the
    /// processor and either already owns this strand or finds it idle. Deeply
    /// recursive inline dispatch grows the native stack without bound.
    pub fn dispatch<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = &self.shared;

        // Off-processor threads never run handlers.
        if !shared.processor.can_dispatch() {
            self.post(handler);
            return;
        }

        // Only this thread can be draining us, so nothing else can run.
        if shared.running_in_this_thread() {
            handler();
            return;
        }

        // Claim the idle strand, or leave the handler to the current owner.
        let claimed = shared.state.apply(|state| {
            if state.running {
                state.queue.push_back(Box::new(handler));
                None
            } else {
                state.running = true;
                Some(handler)
            }
        });

        if let Some(handler) = claimed {
            trace!("strand claimed by dispatch");
            let _ctx = CallContext::<Draining>::enter(&**shared);
            let resume = ResumeOnUnwind::arm(shared);
            handler();
            resume.disarm();
            shared.drain_owned();
        }
    }

    /// Queue `handler` and return. The handler never runs inside this call.
    pub fn post<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let claimed = self.shared.state.apply(|state| {
            state.queue.push_back(Box::new(handler));
            !std::mem::replace(&mut state.running, true)
        });

        if claimed {
            trace!("strand claimed by post");
            self.shared.schedule_drain();
        }
    }

    /// Whether the calling thread is currently draining this strand.
    pub fn running_in_this_thread(&self) -> bool {
        self.shared.running_in_this_thread()
    }
}

impl<P: Processor> fmt::Debug for Strand<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (running, queued) = self
            .shared
            .state
            .apply(|state| (state.running, state.queue.len()));
        f.debug_struct("Strand")
            .field("running", &running)
            .field("queued", &queued)
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::WorkQueue;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Drive `queue` to completion on the current thread.
    fn run_to_completion(queue: &WorkQueue) {
        queue.stop();
        queue.run();
    }

    #[test]
    fn post_defers_until_the_queue_runs() {
        let queue = Arc::new(WorkQueue::new());
        let strand = Strand::new(Arc::clone(&queue));
        let ran = Arc::new(AtomicBool::new(false));

        let r = Arc::clone(&ran);
        strand.post(move || r.store(true, Ordering::SeqCst));
        assert!(!ran.load(Ordering::SeqCst));
        // One drain task, not one task per handler.
        assert_eq!(queue.len(), 1);

        run_to_completion(&queue);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn posts_to_a_running_strand_share_one_drain() {
        let queue = Arc::new(WorkQueue::new());
        let strand = Strand::new(Arc::clone(&queue));
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            strand.post(move || order.lock().unwrap().push(i));
        }
        assert_eq!(queue.len(), 1);

        run_to_completion(&queue);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn dispatch_off_processor_is_deferred() {
        let queue = Arc::new(WorkQueue::new());
        let strand = Strand::new(Arc::clone(&queue));
        let ran = Arc::new(AtomicBool::new(false));

        let r = Arc::clone(&ran);
        strand.dispatch(move || r.store(true, Ordering::SeqCst));
        assert!(!ran.load(Ordering::SeqCst));

        run_to_completion(&queue);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn dispatch_on_idle_strand_from_worker_runs_inline() {
        let queue = Arc::new(WorkQueue::new());
        let strand = Arc::new(Strand::new(Arc::clone(&queue)));
        let observed = Arc::new(Mutex::new(None));

        let (s, o) = (Arc::clone(&strand), Arc::clone(&observed));
        queue.push(move || {
            let ran = Arc::new(AtomicBool::new(false));
            let (r, s2) = (Arc::clone(&ran), Arc::clone(&s));
            s.dispatch(move || {
                assert!(s2.running_in_this_thread());
                r.store(true, Ordering::SeqCst);
            });
            *o.lock().unwrap() = Some((ran.load(Ordering::SeqCst), s.running_in_this_thread()));
        });

        run_to_completion(&queue);
        // Ran before dispatch returned; ownership released afterwards.
        assert_eq!(*observed.lock().unwrap(), Some((true, false)));
    }

    #[test]
    fn reentrant_dispatch_runs_inline() {
        let queue = Arc::new(WorkQueue::new());
        let strand = Arc::new(Strand::new(Arc::clone(&queue)));
        let trace = Arc::new(Mutex::new(Vec::new()));

        let (s, t) = (Arc::clone(&strand), Arc::clone(&trace));
        strand.post(move || {
            t.lock().unwrap().push("outer:start");
            let t2 = Arc::clone(&t);
            s.dispatch(move || t2.lock().unwrap().push("nested"));
            t.lock().unwrap().push("outer:end");
        });

        run_to_completion(&queue);
        assert_eq!(*trace.lock().unwrap(), vec!["outer:start", "nested", "outer:end"]);
    }

    #[test]
    fn post_from_owner_runs_after_current_handler() {
        let queue = Arc::new(WorkQueue::new());
        let strand = Arc::new(Strand::new(Arc::clone(&queue)));
        let trace = Arc::new(Mutex::new(Vec::new()));

        let (s, t) = (Arc::clone(&strand), Arc::clone(&trace));
        strand.post(move || {
            let t2 = Arc::clone(&t);
            s.post(move || t2.lock().unwrap().push("posted"));
            t.lock().unwrap().push("handler");
        });

        run_to_completion(&queue);
        assert_eq!(*trace.lock().unwrap(), vec!["handler", "posted"]);
    }

    #[test]
    fn running_in_this_thread_is_false_outside_handlers() {
        let queue = Arc::new(WorkQueue::new());
        let strand = Strand::new(Arc::clone(&queue));
        assert!(!strand.running_in_this_thread());
    }

    #[test]
    fn strands_do_not_share_ownership() {
        let queue = Arc::new(WorkQueue::new());
        let a = Arc::new(Strand::new(Arc::clone(&queue)));
        let b = Arc::new(Strand::new(Arc::clone(&queue)));
        let seen = Arc::new(Mutex::new(None));

        let (a2, b2, s) = (Arc::clone(&a), Arc::clone(&b), Arc::clone(&seen));
        a.post(move || {
            *s.lock().unwrap() = Some((a2.running_in_this_thread(), b2.running_in_this_thread()));
        });

        run_to_completion(&queue);
        assert_eq!(*seen.lock().unwrap(), Some((true, false)));
    }

    #[test]
    fn dropping_the_strand_keeps_pending_handlers() {
        let queue = Arc::new(WorkQueue::new());
        let ran = Arc::new(AtomicBool::new(false));
        {
            let strand = Strand::new(Arc::clone(&queue));
            let r = Arc::clone(&ran);
            strand.post(move || r.store(true, Ordering::SeqCst));
        }
        run_to_completion(&queue);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn debug_reports_state() {
        let queue = Arc::new(WorkQueue::new());
        let strand = Strand::new(Arc::clone(&queue));
        strand.post(|| {});
        assert_eq!(format!("{strand:?}"), "Strand { running: true, queued: 1 }");
        run_to_completion(&queue);
        assert_eq!(format!("{strand:?}"), "Strand { running: false, queued: 0 }");
    }
}
