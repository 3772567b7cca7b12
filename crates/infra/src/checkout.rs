//! Checkout entry point: accept an order, enqueue its charge, return at once.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use orderflow_core::{DomainError, OrderId, SharedClock};
use orderflow_orders::Order;

use crate::jobs::{Job, JobQueue};
use crate::order_store::OrderStore;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// The job queue stayed full for the whole checkout timeout.
    #[error("checkout queue is full (capacity {capacity}); try again later")]
    QueueFull { capacity: usize },
    #[error("order not found: {0}")]
    NotFound(OrderId),
    #[error(transparent)]
    Invalid(#[from] DomainError),
}

/// Accepts orders without ever touching the payment gateway.
///
/// Concurrent checkouts of one order id are serialized: a second caller waits
/// until the first has either enqueued the job or rolled the order back.
pub struct CheckoutService {
    orders: Arc<dyn OrderStore>,
    queue: Arc<JobQueue>,
    clock: SharedClock,
    push_timeout: Duration,
    accepting: Mutex<HashSet<OrderId>>,
    settled: Condvar,
}

/// Marks an order id as being accepted until dropped.
struct AcceptGuard<'a> {
    service: &'a CheckoutService,
    order_id: OrderId,
}

impl Drop for AcceptGuard<'_> {
    fn drop(&mut self) {
        self.service.lock_accepting().remove(&self.order_id);
        self.service.settled.notify_all();
    }
}

impl CheckoutService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        queue: Arc<JobQueue>,
        clock: SharedClock,
        push_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            queue,
            clock,
            push_timeout,
            accepting: Mutex::new(HashSet::new()),
            settled: Condvar::new(),
        }
    }

    /// Store `order` as pending and enqueue the job that will charge it.
    ///
    /// Re-submitting a known order id returns the stored order unchanged and
    /// enqueues nothing. If the queue stays full, the order is not kept.
    pub fn checkout(&self, order: Order) -> Result<Order, CheckoutError> {
        let pending = order.to_pending()?;
        let order_id = pending.order_id().clone();
        let _accepting = self.begin_accept(&order_id);

        if let Some(existing) = self.orders.insert_if_absent(pending.clone()) {
            debug!(order_id = %order_id, status = %existing.status(), "order already accepted");
            return Ok(existing);
        }

        let job = Job::for_order(&pending, self.clock.now());
        let job_id = job.id;

        match self.queue.push(job, self.push_timeout) {
            Ok(()) => {
                info!(
                    order_id = %order_id,
                    job_id = %job_id,
                    amount_cents = pending.amount_cents(),
                    "order accepted"
                );
                Ok(pending)
            }
            Err(full) => {
                self.orders.remove(&order_id);
                let timeout_ms = u64::try_from(self.push_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    order_id = %order_id,
                    capacity = full.capacity,
                    timeout_ms,
                    "checkout rejected: queue full"
                );
                Err(CheckoutError::QueueFull {
                    capacity: full.capacity,
                })
            }
        }
    }

    pub fn get_order(&self, order_id: &OrderId) -> Result<Order, CheckoutError> {
        self.orders
            .get(order_id)
            .ok_or_else(|| CheckoutError::NotFound(order_id.clone()))
    }

    /// Snapshot of every accepted order, sorted by id.
    pub fn orders(&self) -> Vec<Order> {
        self.orders.list()
    }

    /// Wait until no other checkout holds `order_id`, then hold it.
    fn begin_accept(&self, order_id: &OrderId) -> AcceptGuard<'_> {
        let mut accepting = self.lock_accepting();
        while accepting.contains(order_id) {
            accepting = self
                .settled
                .wait(accepting)
                .unwrap_or_else(PoisonError::into_inner);
        }
        accepting.insert(order_id.clone());
        AcceptGuard {
            service: self,
            order_id: order_id.clone(),
        }
    }

    fn lock_accepting(&self) -> MutexGuard<'_, HashSet<OrderId>> {
        self.accepting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
