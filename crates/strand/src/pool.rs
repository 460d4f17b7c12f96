//! OS worker threads driving a [`WorkQueue`].
//!
//! The pool owns nothing but thread handles; the queue is shared, so strands
//! and other producers keep working with the same `Arc<WorkQueue>`.

use std::env;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::work_queue::WorkQueue;

// =============================================================================
// Configuration
// =============================================================================

/// Environment variable overriding the worker count.
pub const WORKERS_ENV: &str = "STRAND_WORKERS";

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_THREAD_NAME: &str = "strand-worker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of threads calling [`WorkQueue::run`].
    pub workers: usize,
    /// Thread name prefix; workers are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(DEFAULT_WORKERS, NonZeroUsize::get),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl PoolConfig {
    /// Defaults, with the worker count taken from `STRAND_WORKERS` when set.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Replace the worker count with `STRAND_WORKERS` when it is set and valid.
    pub fn with_env_overrides(self) -> Self {
        match env::var(WORKERS_ENV) {
            Ok(raw) => self.with_workers_override(&raw),
            Err(_) => self,
        }
    }

    fn with_workers_override(mut self, raw: &str) -> Self {
        match parse_workers(raw) {
            Some(workers) => self.workers = workers,
            None => warn!(value = %raw, "ignoring invalid {WORKERS_ENV}"),
        }
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

fn parse_workers(raw: &str) -> Option<usize> {
    raw.trim().parse::<NonZeroUsize>().ok().map(NonZeroUsize::get)
}

// =============================================================================
// WorkerPool
// =============================================================================

/// A fixed set of threads running [`WorkQueue::run`] on one queue.
///
/// Dropping the pool without calling [`shutdown`](Self::shutdown) or
/// [`join`](Self::join) detaches the workers.
#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(queue: Arc<WorkQueue>, config: &PoolConfig) -> Result<Self> {
        if config.workers == 0 {
            return Err(Error::NoWorkers);
        }

        let mut pool = Self {
            queue,
            workers: Vec::with_capacity(config.workers),
        };

        for index in 0..config.workers {
            let queue = Arc::clone(&pool.queue);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || queue.run());

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(source) => {
                    // Don't leave the workers that did start blocked forever.
                    if let Err(err) = pool.shutdown() {
                        warn!(%err, "while unwinding a failed pool start");
                    }
                    return Err(Error::Spawn { index, source });
                }
            }
        }

        info!(workers = config.workers, name = %config.thread_name, "worker pool started");
        Ok(pool)
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker to return from `run()`.
    ///
    /// All workers are joined even if some panicked; the first panicked
    /// worker is reported.
    pub fn join(self) -> Result<()> {
        let mut first_panic = None;
        for handle in self.workers {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            match handle.join() {
                Ok(()) => debug!(worker = %name, "worker exited"),
                Err(_) => {
                    warn!(worker = %name, "worker terminated by panic");
                    first_panic.get_or_insert(name);
                }
            }
        }
        match first_panic {
            Some(name) => Err(Error::WorkerPanicked { name }),
            None => Ok(()),
        }
    }

    /// Stop the queue and join every worker.
    ///
    /// Work queued before this call still runs.
    pub fn shutdown(self) -> Result<()> {
        self.queue.stop();
        let result = self.join();
        if result.is_ok() {
            info!("worker pool shut down");
        }
        result
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn parse_workers_accepts_positive_integers() {
        assert_eq!(parse_workers("8"), Some(8));
        assert_eq!(parse_workers(" 2\n"), Some(2));
        assert_eq!(parse_workers("0"), None);
        assert_eq!(parse_workers("-1"), None);
        assert_eq!(parse_workers("many"), None);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = PoolConfig::default().with_workers(3).with_thread_name("io");
        assert_eq!(config.workers, 3);
        assert_eq!(config.thread_name, "io");
        assert!(PoolConfig::default().workers >= 1);
    }

    #[test]
    fn workers_override_keeps_caller_default_when_invalid() {
        let base = PoolConfig::default().with_workers(4);
        assert_eq!(base.clone().with_workers_override("6").workers, 6);
        assert_eq!(base.clone().with_workers_override("0").workers, 4);
        assert_eq!(base.with_workers_override("lots").workers, 4);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let queue = Arc::new(WorkQueue::new());
        let err = WorkerPool::spawn(queue, &PoolConfig::default().with_workers(0)).unwrap_err();
        assert!(matches!(err, Error::NoWorkers));
    }

    #[test]
    fn workers_are_named_and_shut_down() {
        let queue = Arc::new(WorkQueue::new());
        let config = PoolConfig::default().with_workers(2).with_thread_name("test-pool");
        let pool = WorkerPool::spawn(Arc::clone(&queue), &config).unwrap();
        assert_eq!(pool.len(), 2);

        let (tx, rx) = mpsc::channel();
        queue.push(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        });
        let name = rx.recv().unwrap().unwrap();
        assert!(name.starts_with("test-pool-"), "unexpected worker name {name}");

        pool.shutdown().unwrap();
    }

    #[test]
    fn join_reports_panicked_worker() {
        let queue = Arc::new(WorkQueue::new());
        let config = PoolConfig::default().with_workers(1).with_thread_name("doomed");
        let pool = WorkerPool::spawn(Arc::clone(&queue), &config).unwrap();

        queue.push(|| panic!("handler failed"));
        let err = pool.join().unwrap_err();
        match err {
            Error::WorkerPanicked { name } => assert_eq!(name, "doomed-0"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
