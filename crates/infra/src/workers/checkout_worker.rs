//! Per-job processing: idempotency gate, charge, reserve, retry or dead-letter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use orderflow_core::SharedClock;
use orderflow_orders::OrderStatus;

use crate::external::{Inventory, PaymentGateway};
use crate::jobs::{DeadLetterSink, IdempotencyStore, Job, JobOutcome, JobQueue, RetryPolicy};
use crate::order_store::OrderStore;

/// Everything a worker touches while processing a job.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub orders: Arc<dyn OrderStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub inventory: Arc<dyn Inventory>,
    pub idempotency: Arc<IdempotencyStore>,
    pub dead_letters: Arc<DeadLetterSink>,
    pub clock: SharedClock,
    pub retry: RetryPolicy,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Jobs taken off the queue and handled (every attempt counts)
    pub processed: u64,
    /// Orders marked paid
    pub completed: u64,
    /// Orders marked failed (reservation failure, decline, exhaustion)
    pub failed: u64,
    /// Attempts that were re-queued
    pub retried: u64,
    /// Jobs moved to the dead-letter sink
    pub dead_lettered: u64,
    /// Jobs discarded by the idempotency gate or because the order was final
    pub duplicates: u64,
    /// Jobs whose order row was missing or refused the status update
    pub orphaned: u64,
    /// Jobs leased to workers right now
    pub in_flight: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    processed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    duplicates: AtomicU64,
    orphaned: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn snapshot(&self, in_flight: usize) -> PoolStats {
        PoolStats {
            processed: self.processed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
            in_flight,
        }
    }

    // `completed` and `failed` follow successful status writes, see `finalize`.
    fn record(&self, outcome: &JobOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            JobOutcome::Retrying { .. } => &self.retried,
            JobOutcome::DeadLettered { .. } => &self.dead_lettered,
            JobOutcome::Duplicate { .. } => &self.duplicates,
            JobOutcome::Orphaned { .. } => &self.orphaned,
            JobOutcome::Completed { .. }
            | JobOutcome::ReservationFailed { .. }
            | JobOutcome::Declined { .. } => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_status(&self, status: OrderStatus) {
        match status {
            OrderStatus::Paid => self.completed.fetch_add(1, Ordering::Relaxed),
            OrderStatus::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
            OrderStatus::Pending => return,
        };
    }
}

/// Stateless job processor over a shared [`WorkerContext`].
///
/// Every job handed to `process` must come from `JobQueue::lease`; the worker
/// either requeues it (retry) or releases the lease once the job is done.
pub(crate) struct CheckoutWorker<'a> {
    pub(crate) ctx: &'a WorkerContext,
    pub(crate) stats: &'a StatsCounters,
    pub(crate) name: &'a str,
}

impl CheckoutWorker<'_> {
    pub(crate) fn process(&self, job: Job) -> JobOutcome {
        let outcome = self.handle(job);
        self.stats.record(&outcome);
        if outcome.is_terminal() {
            self.ctx.queue.release();
        }
        outcome
    }

    fn handle(&self, job: Job) -> JobOutcome {
        let order_id = job.order_id.clone();

        if !self.ctx.idempotency.claim(&order_id, job.id, job.attempt) {
            debug!(
                worker = self.name,
                job_id = %job.id,
                order_id = %order_id,
                attempt = job.attempt,
                "duplicate job discarded"
            );
            return JobOutcome::Duplicate { order_id };
        }

        let (outcome, retry) = self.attempt(job);
        // Settle before requeue so the retry is admissible once it is leased.
        self.ctx.idempotency.settle(&order_id);
        if let Some(job) = retry {
            self.ctx.queue.requeue(job);
        }
        outcome
    }

    /// Run one admitted attempt. Returns the job to requeue when retrying.
    fn attempt(&self, mut job: Job) -> (JobOutcome, Option<Job>) {
        let order_id = job.order_id.clone();

        match self.ctx.orders.get(&order_id) {
            None => {
                warn!(
                    worker = self.name,
                    job_id = %job.id,
                    order_id = %order_id,
                    "no stored order for job; skipping charge"
                );
                return (JobOutcome::Orphaned { order_id }, None);
            }
            Some(order) if order.is_terminal() => {
                debug!(
                    worker = self.name,
                    job_id = %job.id,
                    order_id = %order_id,
                    status = %order.status(),
                    "order already final; job discarded"
                );
                return (JobOutcome::Duplicate { order_id }, None);
            }
            Some(_) => {}
        }

        let outcome = match self.ctx.gateway.charge(&order_id, job.amount_cents) {
            Ok(receipt) if receipt.charged => {
                if self.ctx.inventory.reserve(&order_id) {
                    if !self.finalize(&job, OrderStatus::Paid) {
                        return (JobOutcome::Orphaned { order_id }, None);
                    }
                    info!(
                        worker = self.name,
                        job_id = %job.id,
                        order_id = %order_id,
                        attempt = job.attempt,
                        "order paid"
                    );
                    JobOutcome::Completed { order_id }
                } else {
                    if !self.finalize(&job, OrderStatus::Failed) {
                        return (JobOutcome::Orphaned { order_id }, None);
                    }
                    warn!(
                        worker = self.name,
                        job_id = %job.id,
                        order_id = %order_id,
                        "inventory reservation failed after charge"
                    );
                    JobOutcome::ReservationFailed { order_id }
                }
            }
            Ok(receipt) => {
                if !self.finalize(&job, OrderStatus::Failed) {
                    return (JobOutcome::Orphaned { order_id }, None);
                }
                warn!(
                    worker = self.name,
                    job_id = %job.id,
                    order_id = %order_id,
                    attempt = receipt.attempt,
                    "charge declined"
                );
                JobOutcome::Declined { order_id }
            }
            Err(err) if self.ctx.retry.should_retry(job.attempt) => {
                let delay = self.ctx.retry.next_delay(job.attempt);
                job.schedule_retry(self.ctx.clock.now(), delay);
                warn!(
                    worker = self.name,
                    job_id = %job.id,
                    order_id = %order_id,
                    attempt = job.attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "charge failed, retrying"
                );

                let outcome = JobOutcome::Retrying {
                    order_id,
                    attempt: job.attempt,
                    not_before: job.not_before,
                };
                return (outcome, Some(job));
            }
            Err(err) => {
                let attempts = job.attempt.saturating_add(1);
                // The job is dead-lettered even if the status write fails.
                self.finalize(&job, OrderStatus::Failed);
                self.ctx.dead_letters.push(job, err.to_string());
                JobOutcome::DeadLettered { order_id, attempts }
            }
        };
        (outcome, None)
    }

    /// Write the final status. Returns `false` if the store refused it.
    fn finalize(&self, job: &Job, status: OrderStatus) -> bool {
        match self.ctx.orders.transition(&job.order_id, status) {
            Ok(_) => {
                self.stats.record_status(status);
                true
            }
            Err(err) => {
                warn!(
                    worker = self.name,
                    job_id = %job.id,
                    order_id = %job.order_id,
                    status = %status,
                    error = %err,
                    "order status not updated"
                );
                false
            }
        }
    }
}
