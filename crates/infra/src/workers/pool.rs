//! Fixed-size pool of checkout worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::jobs::JobOutcome;

use super::checkout_worker::{CheckoutWorker, PoolStats, StatsCounters, WorkerContext};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// How long an idle worker blocks on the queue before re-checking shutdown
    pub poll_interval: Duration,
    /// Default deadline for `stop()`
    pub shutdown_timeout: Duration,
    /// Thread name prefix; threads are named `{prefix}-{index}`
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
            name: "checkout-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is already running")]
    AlreadyRunning,
    #[error("worker pool needs at least one worker")]
    NoWorkers,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("{still_running} worker(s) still running after {timeout:?}")]
    ShutdownTimeout {
        still_running: usize,
        timeout: Duration,
    },
}

struct Shared {
    ctx: WorkerContext,
    stats: StatsCounters,
    shutdown: AtomicBool,
    poll_interval: Duration,
}

struct PoolRuntime {
    handles: Vec<thread::JoinHandle<()>>,
    exited: mpsc::Receiver<usize>,
    remaining: usize,
}

/// Reports a worker's exit even if it unwinds.
struct ExitGuard {
    index: usize,
    tx: mpsc::Sender<usize>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(self.index);
    }
}

/// Background workers draining a shared job queue.
///
/// `start` spawns the threads, `stop` asks them to finish their current job and
/// exit. Queued jobs survive a stop; a later `start` keeps draining them.
pub struct WorkerPool {
    shared: Arc<Shared>,
    config: WorkerPoolConfig,
    runtime: Mutex<Option<PoolRuntime>>,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext, config: WorkerPoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                stats: StatsCounters::default(),
                shutdown: AtomicBool::new(false),
                poll_interval: config.poll_interval,
            }),
            config,
            runtime: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.shared.ctx
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats.snapshot(self.shared.ctx.queue.leased())
    }

    pub fn is_running(&self) -> bool {
        self.lock_runtime().is_some()
    }

    /// Spawn `worker_count` named worker threads.
    pub fn start(&self, worker_count: usize) -> Result<(), PoolError> {
        if worker_count == 0 {
            return Err(PoolError::NoWorkers);
        }

        let mut runtime = self.lock_runtime();
        if runtime.is_some() {
            return Err(PoolError::AlreadyRunning);
        }

        self.shared.shutdown.store(false, Ordering::Release);
        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let shared = self.shared.clone();
            let tx = tx.clone();
            let name = format!("{}-{index}", self.config.name);

            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(shared, name, ExitGuard { index, tx }));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!(pool = %self.config.name, error = %err, "failed to spawn worker");
                    self.shared.shutdown.store(true, Ordering::Release);
                    self.shared.ctx.queue.notify_waiters();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        info!(pool = %self.config.name, workers = worker_count, "worker pool started");
        *runtime = Some(PoolRuntime {
            handles,
            exited: rx,
            remaining: worker_count,
        });
        Ok(())
    }

    /// Stop using the configured shutdown timeout.
    pub fn stop(&self) -> Result<(), PoolError> {
        self.stop_within(self.config.shutdown_timeout)
    }

    /// Signal shutdown and wait up to `timeout` for every worker to exit.
    ///
    /// On timeout the pool stays registered as running so `stop` can be
    /// called again. Stopping an idle pool is a no-op.
    pub fn stop_within(&self, timeout: Duration) -> Result<(), PoolError> {
        let mut guard = self.lock_runtime();
        let Some(runtime) = guard.as_mut() else {
            return Ok(());
        };

        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.ctx.queue.notify_waiters();

        let deadline = Instant::now() + timeout;
        while runtime.remaining > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(PoolError::ShutdownTimeout {
                    still_running: runtime.remaining,
                    timeout,
                });
            }
            match runtime.exited.recv_timeout(left) {
                Ok(_) => runtime.remaining -= 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => runtime.remaining = 0,
            }
        }

        if let Some(runtime) = guard.take() {
            for handle in runtime.handles {
                if handle.join().is_err() {
                    error!(pool = %self.config.name, "worker thread panicked");
                }
            }
        }

        info!(pool = %self.config.name, "worker pool stopped");
        Ok(())
    }

    /// Process at most one eligible job on the calling thread.
    ///
    /// Returns `None` when nothing is eligible right now.
    pub fn process_one(&self) -> Option<JobOutcome> {
        let job = self.shared.ctx.queue.try_lease()?;
        Some(self.shared.worker("inline").process(job))
    }

    fn lock_runtime(&self) -> MutexGuard<'_, Option<PoolRuntime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.ctx.queue.notify_waiters();
    }
}

impl Shared {
    fn worker<'a>(&'a self, name: &'a str) -> CheckoutWorker<'a> {
        CheckoutWorker {
            ctx: &self.ctx,
            stats: &self.stats,
            name,
        }
    }
}

fn worker_loop(shared: Arc<Shared>, name: String, _exit: ExitGuard) {
    info!(worker = %name, "worker started");
    let worker = shared.worker(&name);

    while !shared.shutdown.load(Ordering::Acquire) {
        if let Some(job) = shared.ctx.queue.lease(shared.poll_interval) {
            worker.process(job);
        }
    }

    info!(worker = %name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use orderflow_core::{DomainError, DomainResult, ManualClock, OrderId, SharedClock};
    use orderflow_orders::{Order, OrderStatus};

    use crate::external::{
        FailingGateway, FakeGateway, FraudCheckGateway, Inventory, PaymentGateway,
        RecordingGateway, StockedInventory, UnlimitedInventory,
    };
    use crate::jobs::{DeadLetterSink, IdempotencyStore, Job, JobQueue, RetryPolicy};
    use crate::order_store::{InMemoryOrderStore, OrderStore};

    fn test_context(
        gateway: Arc<dyn PaymentGateway>,
        inventory: Arc<dyn Inventory>,
        clock: SharedClock,
        retry: RetryPolicy,
    ) -> WorkerContext {
        WorkerContext {
            queue: Arc::new(JobQueue::new(64, clock.clone())),
            orders: InMemoryOrderStore::arc(),
            gateway,
            inventory,
            idempotency: Arc::new(IdempotencyStore::new()),
            dead_letters: Arc::new(DeadLetterSink::new()),
            clock,
            retry,
        }
    }

    fn test_pool(gateway: Arc<dyn PaymentGateway>, clock: Arc<ManualClock>) -> WorkerPool {
        let retry = RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(60));
        WorkerPool::new(
            test_context(gateway, Arc::new(UnlimitedInventory), clock, retry),
            WorkerPoolConfig::default().with_poll_interval(Duration::from_millis(5)),
        )
    }

    fn submit(pool: &WorkerPool, order_id: &str) -> Job {
        let ctx = pool.context();
        let order = Order::new(order_id, "user-1", 1_000).unwrap();
        ctx.orders.insert_if_absent(order.clone());
        let job = Job::for_order(&order, ctx.clock.now());
        ctx.queue.try_push(job.clone()).unwrap();
        job
    }

    /// Order store that accepts inserts but refuses every status change.
    struct FrozenOrders(InMemoryOrderStore);

    impl OrderStore for FrozenOrders {
        fn get(&self, order_id: &OrderId) -> Option<Order> {
            self.0.get(order_id)
        }

        fn insert_if_absent(&self, order: Order) -> Option<Order> {
            self.0.insert_if_absent(order)
        }

        fn remove(&self, order_id: &OrderId) -> Option<Order> {
            self.0.remove(order_id)
        }

        fn transition(&self, _order_id: &OrderId, _next: OrderStatus) -> DomainResult<Order> {
            Err(DomainError::invariant("order table is read-only"))
        }

        fn list(&self) -> Vec<Order> {
            self.0.list()
        }
    }

    fn status_of(pool: &WorkerPool, order_id: &str) -> OrderStatus {
        pool.context()
            .orders
            .get(&OrderId::from(order_id))
            .unwrap()
            .status()
    }

    #[test]
    fn transient_failures_then_success_pays_order() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(FakeGateway::new().with_failures("o-1", 2));
        let pool = test_pool(gateway.clone(), clock.clone());
        submit(&pool, "o-1");
        let order_id = OrderId::from("o-1");

        assert_eq!(
            pool.process_one(),
            Some(JobOutcome::Retrying {
                order_id: order_id.clone(),
                attempt: 1,
                not_before: Duration::from_secs(1),
            })
        );
        // Not eligible until the clock reaches not_before.
        assert_eq!(pool.process_one(), None);

        clock.tick(Duration::from_secs(1));
        assert_eq!(
            pool.process_one(),
            Some(JobOutcome::Retrying {
                order_id: order_id.clone(),
                attempt: 2,
                not_before: Duration::from_secs(3),
            })
        );

        clock.tick(Duration::from_secs(2));
        assert_eq!(
            pool.process_one(),
            Some(JobOutcome::Completed { order_id: order_id.clone() })
        );

        assert_eq!(status_of(&pool, "o-1"), OrderStatus::Paid);
        assert_eq!(gateway.attempt_count(&order_id), 3);
        assert_eq!(gateway.charge_count(&order_id), 1);
        assert!(pool.context().dead_letters.is_empty());

        let stats = pool.stats();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[test]
    fn exhausted_retries_dead_letter_and_fail_order() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(FakeGateway::new().with_failures("o-1", 5));
        let pool = test_pool(gateway.clone(), clock.clone());
        submit(&pool, "o-1");

        let mut outcomes = Vec::new();
        while outcomes.len() < 3 {
            clock.tick(Duration::from_secs(10));
            if let Some(outcome) = pool.process_one() {
                outcomes.push(outcome);
            }
        }

        assert_eq!(
            outcomes.last(),
            Some(&JobOutcome::DeadLettered {
                order_id: OrderId::from("o-1"),
                attempts: 3,
            })
        );
        assert_eq!(pool.process_one(), None);

        let dead = pool.context().dead_letters.entries();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts(), 3);
        assert!(dead[0].reason.contains("gateway error"));
        assert_eq!(status_of(&pool, "o-1"), OrderStatus::Failed);
        assert_eq!(gateway.attempt_count(&OrderId::from("o-1")), 3);
        assert_eq!(gateway.charge_count(&OrderId::from("o-1")), 0);

        let stats = pool.stats();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn no_retry_policy_dead_letters_on_first_failure() {
        let clock = Arc::new(ManualClock::new());
        let pool = WorkerPool::new(
            test_context(
                Arc::new(FailingGateway),
                Arc::new(UnlimitedInventory),
                clock,
                RetryPolicy::no_retry(),
            ),
            WorkerPoolConfig::default(),
        );
        submit(&pool, "o-1");

        assert!(matches!(
            pool.process_one(),
            Some(JobOutcome::DeadLettered { attempts: 1, .. })
        ));
        assert_eq!(pool.context().dead_letters.len(), 1);
    }

    #[test]
    fn duplicate_job_for_same_order_charges_once() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(RecordingGateway::new(FakeGateway::new()));
        let pool = test_pool(gateway.clone(), clock);
        let job = submit(&pool, "o-1");
        pool.context()
            .queue
            .try_push(Job::new(job.order_id.clone(), job.amount_cents, job.not_before))
            .unwrap();

        assert!(matches!(pool.process_one(), Some(JobOutcome::Completed { .. })));
        assert!(matches!(pool.process_one(), Some(JobOutcome::Duplicate { .. })));
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(pool.stats().duplicates, 1);
        assert_eq!(status_of(&pool, "o-1"), OrderStatus::Paid);
    }

    #[test]
    fn failed_reservation_marks_order_failed() {
        let clock = Arc::new(ManualClock::new());
        let pool = WorkerPool::new(
            test_context(
                Arc::new(FakeGateway::new()),
                Arc::new(StockedInventory::new(1)),
                clock,
                RetryPolicy::default(),
            ),
            WorkerPoolConfig::default(),
        );
        submit(&pool, "o-1");
        submit(&pool, "o-2");

        assert!(matches!(pool.process_one(), Some(JobOutcome::Completed { .. })));
        assert!(matches!(pool.process_one(), Some(JobOutcome::ReservationFailed { .. })));
        assert_eq!(status_of(&pool, "o-1"), OrderStatus::Paid);
        assert_eq!(status_of(&pool, "o-2"), OrderStatus::Failed);
        assert!(pool.context().dead_letters.is_empty());
    }

    #[test]
    fn declined_charge_fails_without_retry() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(FraudCheckGateway::new(
            FakeGateway::new(),
            [OrderId::from("o-1")],
        ));
        let pool = test_pool(gateway, clock);
        submit(&pool, "o-1");

        assert!(matches!(pool.process_one(), Some(JobOutcome::Declined { .. })));
        assert_eq!(pool.process_one(), None);
        assert_eq!(status_of(&pool, "o-1"), OrderStatus::Failed);
        assert!(pool.context().dead_letters.is_empty());
    }

    #[test]
    fn start_twice_is_rejected_and_stop_when_idle_is_noop() {
        let pool = test_pool(Arc::new(FakeGateway::new()), Arc::new(ManualClock::new()));
        pool.stop().unwrap();
        assert!(matches!(pool.start(0), Err(PoolError::NoWorkers)));

        pool.start(2).unwrap();
        assert!(pool.is_running());
        assert!(matches!(pool.start(1), Err(PoolError::AlreadyRunning)));

        pool.stop().unwrap();
        assert!(!pool.is_running());
        pool.stop().unwrap();
    }

    #[test]
    fn background_workers_drain_queue() {
        let gateway = Arc::new(FakeGateway::new());
        let pool = test_pool(gateway.clone(), Arc::new(ManualClock::new()));
        for i in 0..10 {
            submit(&pool, &format!("o-{i}"));
        }

        pool.start(3).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.stats().completed < 10 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pool.stop().unwrap();

        assert_eq!(pool.stats().completed, 10);
        assert_eq!(gateway.total_charges(), 10);
        assert!(pool.context().queue.is_empty());
    }

    #[test]
    fn restart_resumes_draining_queued_jobs() {
        let gateway = Arc::new(FakeGateway::new());
        let pool = test_pool(gateway.clone(), Arc::new(ManualClock::new()));

        pool.start(1).unwrap();
        pool.stop().unwrap();

        submit(&pool, "late-1");
        submit(&pool, "late-2");
        assert_eq!(pool.context().queue.size(), 2);

        pool.start(1).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.stats().completed < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pool.stop().unwrap();

        assert_eq!(status_of(&pool, "late-1"), OrderStatus::Paid);
        assert_eq!(status_of(&pool, "late-2"), OrderStatus::Paid);
    }

    #[test]
    fn stop_times_out_while_job_is_in_flight() {
        let gateway = Arc::new(FakeGateway::new().with_latency(Duration::from_millis(300)));
        let pool = test_pool(gateway, Arc::new(ManualClock::new()));
        submit(&pool, "slow");

        pool.start(1).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.stats().in_flight == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        match pool.stop_within(Duration::from_millis(10)) {
            Err(PoolError::ShutdownTimeout { still_running, .. }) => assert_eq!(still_running, 1),
            other => panic!("Expected shutdown timeout, got {other:?}"),
        }
        assert!(pool.is_running());

        pool.stop_within(Duration::from_secs(5)).unwrap();
        assert!(!pool.is_running());
        assert_eq!(status_of(&pool, "slow"), OrderStatus::Paid);
    }

    #[test]
    fn retry_requeue_on_full_queue_does_not_wedge_worker() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(
            FakeGateway::new()
                .with_failures("o-1", 1)
                .with_latency(Duration::from_millis(100)),
        );
        let retry = RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(60));
        let mut ctx = test_context(
            gateway.clone(),
            Arc::new(UnlimitedInventory),
            clock.clone(),
            retry,
        );
        ctx.queue = Arc::new(JobQueue::new(1, clock));
        let pool = WorkerPool::new(
            ctx,
            WorkerPoolConfig::default().with_poll_interval(Duration::from_millis(5)),
        );
        submit(&pool, "o-1");

        pool.start(1).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.stats().in_flight == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(pool.stats().in_flight, 1);

        // Refill the only slot while o-1's failing charge is still running.
        submit(&pool, "o-2");

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.stats().completed < 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pool.stop().unwrap();

        assert_eq!(status_of(&pool, "o-2"), OrderStatus::Paid);
        assert_eq!(status_of(&pool, "o-1"), OrderStatus::Pending);
        let stats = pool.stats();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.in_flight, 0);

        // The retry is parked behind the manual clock, still queued.
        let queue = &pool.context().queue;
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.try_pop().unwrap().order_id, OrderId::from("o-1"));
    }

    #[test]
    fn second_copy_of_retried_job_is_discarded() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(FakeGateway::new().with_failures("o-1", 1));
        let pool = test_pool(gateway.clone(), clock.clone());
        let job = submit(&pool, "o-1");

        assert!(matches!(
            pool.process_one(),
            Some(JobOutcome::Retrying { attempt: 1, .. })
        ));

        // Same job id and attempt as the requeued retry.
        let mut copy = job;
        copy.schedule_retry(Duration::ZERO, Duration::from_secs(1));
        pool.context().queue.try_push(copy).unwrap();

        clock.tick(Duration::from_secs(1));
        assert!(matches!(pool.process_one(), Some(JobOutcome::Completed { .. })));
        assert!(matches!(pool.process_one(), Some(JobOutcome::Duplicate { .. })));
        assert_eq!(pool.process_one(), None);

        let order_id = OrderId::from("o-1");
        assert_eq!(gateway.attempt_count(&order_id), 2);
        assert_eq!(gateway.charge_count(&order_id), 1);
        assert_eq!(pool.stats().duplicates, 1);
    }

    #[test]
    fn later_attempt_of_completed_job_is_discarded() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(FakeGateway::new());
        let pool = test_pool(gateway.clone(), clock);
        let job = submit(&pool, "o-1");

        assert!(matches!(pool.process_one(), Some(JobOutcome::Completed { .. })));

        let mut copy = job;
        for _ in 0..3 {
            copy.schedule_retry(Duration::ZERO, Duration::ZERO);
        }
        pool.context().queue.try_push(copy).unwrap();

        assert!(matches!(pool.process_one(), Some(JobOutcome::Duplicate { .. })));
        assert_eq!(gateway.total_attempts(), 1);
        assert_eq!(gateway.charge_count(&OrderId::from("o-1")), 1);
    }

    #[test]
    fn job_without_stored_order_is_orphaned_before_charge() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(FakeGateway::new());
        let pool = test_pool(gateway.clone(), clock);
        let ctx = pool.context();
        ctx.queue
            .try_push(Job::new(OrderId::from("ghost"), 500, Duration::ZERO))
            .unwrap();

        assert_eq!(
            pool.process_one(),
            Some(JobOutcome::Orphaned { order_id: OrderId::from("ghost") })
        );
        assert_eq!(gateway.total_attempts(), 0);
        assert_eq!(pool.stats().orphaned, 1);
        assert!(ctx.queue.is_idle());
    }

    #[test]
    fn refused_status_write_is_not_counted_as_completed() {
        let clock = Arc::new(ManualClock::new());
        let gateway = Arc::new(FakeGateway::new());
        let retry = RetryPolicy::default();
        let mut ctx = test_context(gateway, Arc::new(UnlimitedInventory), clock, retry);
        ctx.orders = Arc::new(FrozenOrders(InMemoryOrderStore::new()));
        let pool = WorkerPool::new(ctx, WorkerPoolConfig::default());
        submit(&pool, "o-1");

        assert_eq!(
            pool.process_one(),
            Some(JobOutcome::Orphaned { order_id: OrderId::from("o-1") })
        );
        assert_eq!(status_of(&pool, "o-1"), OrderStatus::Pending);

        let stats = pool.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.orphaned, 1);
        assert_eq!(stats.in_flight, 0);
    }
}
