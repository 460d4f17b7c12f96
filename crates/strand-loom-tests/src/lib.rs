//! Loom tests for strand concurrency primitives.
//!
//! These tests run the real `strand` types under the loom model checker: the
//! library's sync shim swaps its mutex, condition variable, and thread-local
//! storage for loom's when built with `--cfg loom`.
//!
//! Run with:
//! ```sh
//! RUSTFLAGS="--cfg loom" cargo test -p strand-loom-tests --release
//! ```
//!
//! For faster iteration with bounded preemptions:
//! ```sh
//! LOOM_MAX_PREEMPTIONS=2 RUSTFLAGS="--cfg loom" cargo test -p strand-loom-tests --release
//! ```

#[cfg(loom)]
mod tests {
    use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use loom::thread;
    use std::sync::Arc;

    use strand::{Strand, TransactionalCell, WorkQueue};

    // =========================================================================
    // TransactionalCell
    // =========================================================================

    #[test]
    fn cell_concurrent_applies() {
        loom::model(|| {
            let cell = Arc::new(TransactionalCell::new(0u32));
            let c2 = cell.clone();

            let h = thread::spawn(move || {
                c2.apply(|n| *n += 1);
            });
            cell.apply(|n| *n += 1);

            h.join().unwrap();
            assert_eq!(cell.apply(|n| *n), 2);
        });
    }

    // =========================================================================
    // WorkQueue
    // =========================================================================

    #[test]
    fn queue_push_before_stop_runs() {
        loom::model(|| {
            let queue = Arc::new(WorkQueue::new());
            let ran = Arc::new(AtomicBool::new(false));

            let q = queue.clone();
            let worker = thread::spawn(move || q.run());

            let r = ran.clone();
            queue.push(move || r.store(true, Ordering::Release));
            queue.stop();

            worker.join().unwrap();
            assert!(ran.load(Ordering::Acquire));
        });
    }

    #[test]
    fn queue_stop_relays_to_every_worker() {
        loom::model(|| {
            let queue = Arc::new(WorkQueue::new());

            let q1 = queue.clone();
            let w1 = thread::spawn(move || q1.run());
            let q2 = queue.clone();
            let w2 = thread::spawn(move || q2.run());

            queue.stop();

            w1.join().unwrap();
            w2.join().unwrap();
            // One marker is always left for late arrivals.
            assert_eq!(queue.len(), 1);
        });
    }

    // =========================================================================
    // Strand
    // =========================================================================

    #[test]
    fn strand_post_from_foreign_thread() {
        loom::model(|| {
            let queue = Arc::new(WorkQueue::new());
            let strand = Strand::new(queue.clone());
            let count = Arc::new(AtomicUsize::new(0));

            let q = queue.clone();
            let worker = thread::spawn(move || q.run());

            for _ in 0..2 {
                let c = count.clone();
                strand.post(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                });
            }
            queue.stop();

            worker.join().unwrap();
            assert_eq!(count.load(Ordering::Relaxed), 2);
        });
    }

    #[test]
    fn strand_concurrent_posters_are_serialized() {
        loom::model(|| {
            let queue = Arc::new(WorkQueue::new());
            let strand = Arc::new(Strand::new(queue.clone()));
            let active = Arc::new(AtomicUsize::new(0));
            let done = Arc::new(AtomicUsize::new(0));

            let handler = {
                let (active, done) = (active.clone(), done.clone());
                move || {
                    assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0, "handlers overlapped");
                    active.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                }
            };

            let q = queue.clone();
            let worker = thread::spawn(move || q.run());

            let s = strand.clone();
            let h2 = handler.clone();
            let poster = thread::spawn(move || s.post(h2));
            strand.post(handler);

            poster.join().unwrap();
            queue.stop();
            worker.join().unwrap();

            assert_eq!(done.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn strand_dispatch_from_two_workers() {
        loom::model(|| {
            let queue = Arc::new(WorkQueue::new());
            let strand = Arc::new(Strand::new(queue.clone()));
            let active = Arc::new(AtomicUsize::new(0));
            let done = Arc::new(AtomicUsize::new(0));

            for _ in 0..2 {
                let (s, active, done) = (strand.clone(), active.clone(), done.clone());
                queue.push(move || {
                    s.dispatch(move || {
                        assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0, "handlers overlapped");
                        active.fetch_sub(1, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                    });
                });
            }
            queue.stop();

            let q = queue.clone();
            let w = thread::spawn(move || q.run());
            queue.run();
            w.join().unwrap();

            assert_eq!(done.load(Ordering::SeqCst), 2);
        });
    }
}

// Placeholder for non-loom builds
#[cfg(not(loom))]
pub fn placeholder() {}
