//! Bounded, time-ordered job queue with backpressure.
//!
//! Jobs are ordered by `not_before` (earliest first), then by enqueue sequence
//! (FIFO among equally eligible jobs). A job whose `not_before` lies in the
//! future stays invisible to `pop` until the clock reaches it, which is how
//! retry backoff is expressed without parking a worker thread.
//!
//! Capacity counts every queued job, eligible or delayed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use orderflow_core::SharedClock;

use super::types::Job;

/// Upper bound on a single wait while only delayed jobs are queued.
///
/// Logical time may be advanced externally (e.g. a manual clock), so a waiter
/// re-checks eligibility at least this often.
const DELAYED_RECHECK: Duration = Duration::from_millis(10);

/// Push rejected because the queue stayed full for the whole timeout.
///
/// The rejected job is handed back so the caller decides its fate.
#[derive(Debug, thiserror::Error)]
#[error("job queue is full (capacity {capacity})")]
pub struct QueueFull {
    pub capacity: usize,
    job: Box<Job>,
}

impl QueueFull {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        *self.job
    }
}

#[derive(Debug)]
struct QueuedJob {
    job: Job,
    sequence: u64,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.job.not_before == other.job.not_before && self.sequence == other.sequence
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap; reverse both keys so the earliest, oldest job is on top.
impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .job
            .not_before
            .cmp(&self.job.not_before)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    next_sequence: u64,
    /// Jobs handed out by `lease` and not yet released or requeued.
    leased: usize,
}

impl QueueState {
    fn insert(&mut self, job: Job) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedJob { job, sequence });
    }
}

/// Thread-safe bounded job queue.
///
/// Producers use `push`; workers take jobs with `lease` and must hand each one
/// back through exactly one of `release` (done) or `requeue` (retry later).
/// A requeue never fails: the job already held a slot before it was leased, so
/// the queue may briefly exceed `capacity` by at most the number of leases.
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    /// Signalled when a job is pushed.
    available: Condvar,
    /// Signalled when a job is popped.
    space: Condvar,
    capacity: usize,
    clock: SharedClock,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` jobs (minimum 1).
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            space: Condvar::new(),
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued jobs (eligible and delayed) at the time of the call.
    pub fn size(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Jobs currently leased to workers.
    pub fn leased(&self) -> usize {
        self.lock().leased
    }

    /// Nothing queued and nothing leased, observed under one lock.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.heap.is_empty() && state.leased == 0
    }

    /// Number of queued jobs eligible right now.
    pub fn ready_count(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .heap
            .iter()
            .filter(|q| q.job.is_ready(now))
            .count()
    }

    /// Enqueue a job, waiting up to `timeout` for space.
    ///
    /// A zero timeout never blocks.
    pub fn push(&self, job: Job, timeout: Duration) -> Result<(), QueueFull> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        while state.heap.len() >= self.capacity {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(QueueFull {
                    capacity: self.capacity,
                    job: Box::new(job),
                });
            }
            state = self
                .space
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        state.insert(job);
        drop(state);

        // Wake every waiter: a woken popper may find the new job is still delayed.
        self.available.notify_all();
        Ok(())
    }

    /// Non-blocking push.
    pub fn try_push(&self, job: Job) -> Result<(), QueueFull> {
        self.push(job, Duration::ZERO)
    }

    /// Dequeue the earliest eligible job, waiting up to `timeout` for one.
    ///
    /// Returns `None` when nothing became eligible in time.
    pub fn pop(&self, timeout: Duration) -> Option<Job> {
        self.take(timeout, false)
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<Job> {
        self.pop(Duration::ZERO)
    }

    /// Like `pop`, but the job counts as leased until released or requeued.
    pub fn lease(&self, timeout: Duration) -> Option<Job> {
        self.take(timeout, true)
    }

    pub fn try_lease(&self) -> Option<Job> {
        self.lease(Duration::ZERO)
    }

    /// Finish a leased job that will not come back.
    pub fn release(&self) {
        let mut state = self.lock();
        state.leased = state.leased.saturating_sub(1);
    }

    /// Put a leased job back for a later attempt, ignoring the capacity bound.
    pub fn requeue(&self, job: Job) {
        let mut state = self.lock();
        state.leased = state.leased.saturating_sub(1);
        state.insert(job);
        drop(state);
        self.available.notify_all();
    }

    /// Wake all blocked poppers so they re-check eligibility and shutdown flags.
    pub fn notify_waiters(&self) {
        self.available.notify_all();
    }

    fn take(&self, timeout: Duration, lease: bool) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            let now = self.clock.now();
            let head_not_before = state.heap.peek().map(|q| q.job.not_before);

            if let Some(not_before) = head_not_before {
                if not_before <= now {
                    let job = state.heap.pop().map(|q| q.job);
                    if lease && job.is_some() {
                        state.leased += 1;
                    }
                    drop(state);
                    self.space.notify_one();
                    return job;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            let wait = match head_not_before {
                Some(not_before) => remaining
                    .min(not_before.saturating_sub(now))
                    .min(DELAYED_RECHECK),
                None => remaining,
            };

            state = self
                .available
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
