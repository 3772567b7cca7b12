//! Wiring: one queue, one order table, one checkout service, one worker pool.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use orderflow_core::{OrderId, SharedClock, SystemClock};
use orderflow_orders::Order;

use crate::checkout::{CheckoutError, CheckoutService};
use crate::config::{ConfigError, PipelineConfig};
use crate::external::{Inventory, PaymentGateway, UnlimitedInventory};
use crate::jobs::{DeadLetterEntry, DeadLetterSink, IdempotencyStore, JobQueue};
use crate::order_store::{InMemoryOrderStore, OrderStore};
use crate::workers::{PoolError, PoolStats, WorkerContext, WorkerPool};

/// Builder for [`CheckoutPipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    gateway: Arc<dyn PaymentGateway>,
    inventory: Arc<dyn Inventory>,
    clock: SharedClock,
    orders: Arc<dyn OrderStore>,
}

impl PipelineBuilder {
    pub fn with_inventory(mut self, inventory: Arc<dyn Inventory>) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_order_store(mut self, orders: Arc<dyn OrderStore>) -> Self {
        self.orders = orders;
        self
    }

    pub fn build(self) -> Result<CheckoutPipeline, ConfigError> {
        self.config.validate()?;

        let queue = Arc::new(JobQueue::new(self.config.queue_capacity, self.clock.clone()));
        let checkout = CheckoutService::new(
            self.orders.clone(),
            queue.clone(),
            self.clock.clone(),
            self.config.checkout_timeout,
        );
        let ctx = WorkerContext {
            queue,
            orders: self.orders,
            gateway: self.gateway,
            inventory: self.inventory,
            idempotency: Arc::new(IdempotencyStore::new()),
            dead_letters: Arc::new(DeadLetterSink::new()),
            clock: self.clock,
            retry: self.config.retry.clone(),
        };
        let pool = WorkerPool::new(ctx, self.config.pool_config());

        Ok(CheckoutPipeline {
            config: self.config,
            checkout,
            pool,
        })
    }
}

/// Checkout service plus the background pool that finalizes its orders.
pub struct CheckoutPipeline {
    config: PipelineConfig,
    checkout: CheckoutService,
    pool: WorkerPool,
}

impl CheckoutPipeline {
    /// Start building a pipeline charging through `gateway`.
    ///
    /// Defaults: unlimited inventory, system clock, in-memory order store.
    pub fn builder(config: PipelineConfig, gateway: Arc<dyn PaymentGateway>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            gateway,
            inventory: Arc::new(UnlimitedInventory),
            clock: SystemClock::shared(),
            orders: InMemoryOrderStore::arc(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn checkout(&self, order: Order) -> Result<Order, CheckoutError> {
        self.checkout.checkout(order)
    }

    pub fn get_order(&self, order_id: &OrderId) -> Result<Order, CheckoutError> {
        self.checkout.get_order(order_id)
    }

    pub fn orders(&self) -> Vec<Order> {
        self.checkout.orders()
    }

    /// Start the configured number of workers.
    pub fn start(&self) -> Result<(), PoolError> {
        self.pool.start(self.config.workers)
    }

    pub fn stop(&self) -> Result<(), PoolError> {
        self.pool.stop()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn queue(&self) -> &JobQueue {
        &self.pool.context().queue
    }

    pub fn idempotency(&self) -> &IdempotencyStore {
        &self.pool.context().idempotency
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.pool.context().dead_letters.entries()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Wait until the queue is empty and no job is in flight.
    ///
    /// Returns `false` if that did not happen within `timeout`. Jobs waiting
    /// out a retry delay keep the queue non-empty. Once this returns `true`
    /// every finished job has written its order status.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.queue().is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}
