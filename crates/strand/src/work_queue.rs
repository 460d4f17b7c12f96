//! Multi-producer, multi-consumer FIFO work queue.
//!
//! Any number of threads push work; any number of worker threads call
//! [`WorkQueue::run`], which blocks until work arrives and executes it.
//!
//! # Shutdown relay
//!
//! [`WorkQueue::stop`] enqueues a single shutdown marker behind all work queued
//! so far. The first worker to pop it re-enqueues a marker and returns; the
//! next worker does the same, and so on. One `stop()` therefore terminates
//! every current and future `run()` caller, one hand-off at a time.
//!
//! ```text
//!   push(a) push(b) stop()
//!   ┌───┬───┬──────┐
//!   │ a │ b │ STOP │  → worker 1 runs a, worker 2 runs b,
//!   └───┴───┴──────┘    worker 1 pops STOP, re-pushes it, exits,
//!                       worker 2 pops STOP, re-pushes it, exits.
//! ```

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use crate::call_context::CallContext;
use crate::cell::TransactionalCell;
use crate::strand::Processor;
use crate::sync::Condvar;

/// A type-erased unit of deferred work, consumed exactly once.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Work {
    Job(Job),
    Shutdown,
}

/// Call-context tag for threads inside [`WorkQueue::run`].
enum Dispatching {}

pub struct WorkQueue {
    queue: TransactionalCell<VecDeque<Work>>,
    available: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            queue: TransactionalCell::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Enqueue `job` and wake one waiting worker. Never blocks on the queue
    /// being consumed.
    pub fn push<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_work(Work::Job(Box::new(job)));
    }

    fn push_work(&self, work: Work) {
        self.queue.apply(|q| q.push_back(work));
        self.available.notify_one();
    }

    /// Execute queued work on the calling thread until a shutdown marker is
    /// reached.
    ///
    /// A job that panics unwinds out of `run()`; the queue itself is left
    /// intact and other workers keep going.
    pub fn run(&self) {
        let _ctx = CallContext::<Dispatching>::enter(self);
        debug!("worker entered run loop");

        loop {
            let work = self
                .queue
                .apply_when(&self.available, |q| !q.is_empty(), VecDeque::pop_front);

            match work {
                Some(Work::Job(job)) => job(),
                Some(Work::Shutdown) => {
                    debug!("worker observed shutdown, relaying");
                    self.push_work(Work::Shutdown);
                    return;
                }
                None => {}
            }
        }
    }

    /// Ask every `run()` caller to return once the work queued so far is done.
    pub fn stop(&self) {
        debug!("shutdown requested");
        self.push_work(Work::Shutdown);
    }

    /// Whether the calling thread is inside this queue's `run()` loop.
    pub fn can_dispatch(&self) -> bool {
        CallContext::<Dispatching>::contains(self)
    }

    /// Queued entries, shutdown markers included.
    pub fn len(&self) -> usize {
        self.queue.apply(|q| q.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").field("len", &self.len()).finish()
    }
}

impl Processor for WorkQueue {
    fn push<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        WorkQueue::push(self, work);
    }

    fn can_dispatch(&self) -> bool {
        WorkQueue::can_dispatch(self)
    }
}
