//! Strand demo: many objects sharing a small worker pool
//!
//! The demo:
//! 1. Starts a work queue and a pool of worker threads
//! 2. Creates a set of objects, each owning a strand on that queue
//! 3. Posts work to randomly chosen objects from the main thread
//! 4. Shuts the pool down and checks that every piece of work ran
//!
//! Each object's work runs one item at a time, while different objects run in
//! parallel on different workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use strand::{PoolConfig, Strand, WorkQueue, WorkerPool};

const DEFAULT_WORKERS: usize = 4;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "strand-demo")]
#[command(about = "Post random work to objects that each own a strand", long_about = None)]
struct Cli {
    /// Worker threads (defaults to STRAND_WORKERS, or 4)
    #[arg(long)]
    workers: Option<usize>,

    /// Number of objects, each with its own strand
    #[arg(long, default_value_t = 8)]
    objects: usize,

    /// Pieces of work to post
    #[arg(long, default_value_t = 20)]
    tasks: usize,
}

// =============================================================================
// Sample object
// =============================================================================

struct Obj {
    name: String,
    strand: Strand<WorkQueue>,
}

impl Obj {
    fn new(n: usize, queue: &Arc<WorkQueue>) -> Self {
        Self {
            name: format!("Obj {n}"),
            strand: Strand::new(Arc::clone(queue)),
        }
    }

    fn do_something(&self, val: usize) {
        info!("{} : doing {}", self.name, val);
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let cli = Cli::parse();
    if cli.objects == 0 {
        bail!("--objects must be at least 1");
    }

    let mut config = PoolConfig::default()
        .with_workers(DEFAULT_WORKERS)
        .with_env_overrides();
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }

    let queue = Arc::new(WorkQueue::new());
    let pool = WorkerPool::spawn(Arc::clone(&queue), &config).context("starting worker pool")?;

    let objs: Vec<Arc<Obj>> = (0..cli.objects).map(|n| Arc::new(Obj::new(n, &queue))).collect();

    // Counter shared by all strands, so we can check all work was done
    let done_count = Arc::new(AtomicUsize::new(0));

    for i in 0..cli.tasks {
        let obj = Arc::clone(&objs[rand::random_range(0..objs.len())]);
        let done = Arc::clone(&done_count);
        let target = Arc::clone(&obj);
        obj.strand.post(move || {
            target.do_something(i);
            done.fetch_add(1, Ordering::Relaxed);
        });
    }

    pool.shutdown().context("shutting down worker pool")?;

    let done = done_count.load(Ordering::Relaxed);
    if done != cli.tasks {
        bail!("only {done} of {} tasks completed", cli.tasks);
    }
    info!(tasks = done, objects = cli.objects, workers = config.workers, "all work done");
    Ok(())
}
