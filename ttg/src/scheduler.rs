//! The ready-queue and worker pool (spec §4.7).
//!
//! A small priority queue of type-erased, ready-to-fire activation
//! records, drained by a fixed pool of worker threads. Grounded on the
//! shape of `timely`'s `Worker`/`Activations` (own a queue, loop pulling
//! work) but adapted to spec §4.7's "N worker threads... pulls from a
//! priority-ordered ready queue" rather than timely's single-threaded,
//! cooperatively-stepped model — this engine's workers are real OS
//! threads, since activations across different keys have no ordering
//! dependency and spec §5 calls for "parallel worker threads within a
//! rank."

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

/// A unit of work the scheduler can run: an `ActivationRecord` bound to
/// its owning TT, with slot values ready to be assembled and the body
/// invoked (spec §4.5's "Firing").
pub trait Fireable: Send {
    /// Runs the task body to completion on the calling worker thread
    /// (spec §4.7: "A task body runs to completion on one worker").
    fn fire(self: Box<Self>);
}

struct QueueEntry {
    priority: i32,
    seq: u64,
    job: Box<dyn Fireable>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// `BinaryHeap` is a max-heap; higher priority pops first, and among
    /// equal priorities the earlier-enqueued (`seq`) entry pops first —
    /// "ties are FIFO on a per-queue basis" (spec §4.7).
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The ready-queue and worker pool for one rank.
pub struct Scheduler {
    queue: Mutex<BinaryHeap<QueueEntry>>,
    not_empty: Condvar,
    quiescent: Condvar,
    seq: AtomicU64,
    active: AtomicUsize,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Starts a scheduler with `num_workers` worker threads. `0` resolves
    /// to the host's available parallelism, matching spec §4.7's "N
    /// configurable at init; −1 = default = one per hardware thread."
    pub fn start(num_workers: usize) -> Arc<Scheduler> {
        let num_workers = if num_workers == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            num_workers
        };
        let scheduler = Arc::new(Scheduler {
            queue: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            quiescent: Condvar::new(),
            seq: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::with_capacity(num_workers)),
        });
        let mut workers = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let sched = scheduler.clone();
            let handle = thread::Builder::new()
                .name(format!("ttg worker {}", index))
                .spawn(move || sched.worker_loop())
                .expect("failed to spawn ttg worker thread");
            workers.push(handle);
        }
        *scheduler.workers.lock() = workers;
        scheduler
    }

    /// Enqueues a ready activation record at the given priority (spec
    /// §4.5 step 4). `inlinemap` bypasses this entirely (see
    /// [`Scheduler::fire_inline`]).
    pub fn enqueue(&self, priority: i32, job: Box<dyn Fireable>) {
        self.active.fetch_add(1, Ordering::SeqCst);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().push(QueueEntry { priority, seq, job });
        self.not_empty.notify_one();
    }

    /// Runs a job on the calling thread rather than queueing it, for TTs
    /// whose `inlinemap` says this key should fire on the producing
    /// thread (spec §4.5).
    pub fn fire_inline(&self, job: Box<dyn Fireable>) {
        self.active.fetch_add(1, Ordering::SeqCst);
        job.fire();
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.quiescent.notify_all();
    }

    fn worker_loop(&self) {
        loop {
            let job = {
                let mut guard = self.queue.lock();
                loop {
                    if let Some(entry) = guard.pop() {
                        break Some(entry.job);
                    }
                    if self.shutdown.load(Ordering::SeqCst) {
                        break None;
                    }
                    self.not_empty.wait(&mut guard);
                }
            };
            match job {
                Some(job) => {
                    job.fire();
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    self.quiescent.notify_all();
                }
                None => return,
            }
        }
    }

    /// The number of activation records presently queued or running.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Blocks until no activation record is queued or running on this
    /// rank (the local half of spec §4.6's fence: "all local ready queues
    /// empty").
    pub fn wait_quiescent(&self) {
        let mut guard = self.queue.lock();
        loop {
            if guard.is_empty() && self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.quiescent.wait(&mut guard);
        }
    }

    /// Drains pending work, then stops every worker thread (spec §4.7:
    /// "the only supported cancellation is cooperative at `finalize()`;
    /// in-flight tasks run to completion, pending activations are
    /// drained").
    pub fn finalize(&self) {
        self.wait_quiescent();
        self.shutdown.store(true, Ordering::SeqCst);
        self.not_empty.notify_all();
        let handles = mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    struct Record(Arc<AtomicI32>, i32);
    impl Fireable for Record {
        fn fire(self: Box<Self>) {
            self.0.store(self.1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fires_every_enqueued_job() {
        let sched = Scheduler::start(2);
        let seen = Arc::new(AtomicI32::new(0));
        for i in 1..=5 {
            sched.enqueue(0, Box::new(Record(seen.clone(), i)));
        }
        sched.wait_quiescent();
        assert!(seen.load(Ordering::SeqCst) > 0);
        sched.finalize();
    }

    #[test]
    fn higher_priority_entries_pop_first_when_queue_is_paused() {
        let order = Arc::new(Mutex::new(Vec::new()));
        struct Tag(Arc<Mutex<Vec<i32>>>, i32);
        impl Fireable for Tag {
            fn fire(self: Box<Self>) {
                self.0.lock().push(self.1);
            }
        }

        // Single worker, paused by holding no jobs yet: enqueue several at
        // once before the worker can drain any of them is racy with a live
        // pool, so exercise the heap ordering directly instead.
        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry { priority: 1, seq: 0, job: Box::new(Tag(order.clone(), 1)) });
        heap.push(QueueEntry { priority: 5, seq: 1, job: Box::new(Tag(order.clone(), 5)) });
        heap.push(QueueEntry { priority: 5, seq: 2, job: Box::new(Tag(order.clone(), 6)) });
        heap.push(QueueEntry { priority: 2, seq: 3, job: Box::new(Tag(order.clone(), 2)) });

        while let Some(entry) = heap.pop() {
            entry.job.fire();
        }
        assert_eq!(*order.lock(), vec![5, 6, 2, 1]);
    }

    #[test]
    fn finalize_drains_then_stops_workers() {
        let sched = Scheduler::start(2);
        let seen = Arc::new(AtomicI32::new(0));
        sched.enqueue(0, Box::new(Record(seen.clone(), 99)));
        sched.finalize();
        assert_eq!(seen.load(Ordering::SeqCst), 99);
        assert_eq!(sched.active_count(), 0);
    }
}
