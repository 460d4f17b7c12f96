//! Strand: serialized handler execution on a shared worker pool
//!
//! Many logical objects can share a small pool of OS threads while each
//! object's callbacks run one at a time, never concurrently with each other,
//! and without any lock held while user code runs.
//!
//! - [`TransactionalCell`]: closure-scoped access to mutex-guarded state
//! - [`CallContext`]: per-thread "which instances am I inside" stacks
//! - [`WorkQueue`]: FIFO queue drained by blocking worker loops
//! - [`Strand`]: the serializing primitive, generic over a [`Processor`]
//! - [`WorkerPool`], [`PoolConfig`]: spawning and joining worker threads
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use strand::{PoolConfig, Strand, WorkQueue, WorkerPool};
//!
//! let queue = Arc::new(WorkQueue::new());
//! let pool = WorkerPool::spawn(Arc::clone(&queue), &PoolConfig::default().with_workers(4))?;
//!
//! let strand = Strand::new(Arc::clone(&queue));
//! let count = Arc::new(AtomicUsize::new(0));
//! for _ in 0..20 {
//!     let count = Arc::clone(&count);
//!     strand.post(move || {
//!         count.fetch_add(1, Ordering::Relaxed);
//!     });
//! }
//!
//! pool.shutdown()?;
//! assert_eq!(count.load(Ordering::Relaxed), 20);
//! # Ok::<(), strand::Error>(())
//! ```

mod call_context;
mod cell;
mod error;
#[cfg(not(loom))]
mod pool;
mod strand;
mod sync;
mod work_queue;

pub use call_context::{CallContext, ContextGuard};
pub use cell::TransactionalCell;
pub use error::{Error, Result};
#[cfg(not(loom))]
pub use pool::{PoolConfig, WorkerPool};
pub use strand::{Processor, Strand};
pub use work_queue::{Job, WorkQueue};
