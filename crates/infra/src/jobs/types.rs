//! Core job records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{JobId, OrderId};
use orderflow_orders::Order;

/// A deferred charge-and-finalize unit of work for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Order this job finalizes
    pub order_id: OrderId,
    /// Amount to charge, in cents
    pub amount_cents: u64,
    /// Current attempt number (starts at 0)
    pub attempt: u32,
    /// Logical time at or after which the job may be dequeued
    pub not_before: Duration,
    /// Wall-clock time the job was first created
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job, eligible at `not_before`.
    pub fn new(order_id: OrderId, amount_cents: u64, not_before: Duration) -> Self {
        Self {
            id: JobId::new(),
            order_id,
            amount_cents,
            attempt: 0,
            not_before,
            enqueued_at: Utc::now(),
        }
    }

    /// Create the job that charges `order`, eligible immediately at `now`.
    pub fn for_order(order: &Order, now: Duration) -> Self {
        Self::new(order.order_id().clone(), order.amount_cents(), now)
    }

    /// Check if the job is eligible at logical time `now`.
    pub fn is_ready(&self, now: Duration) -> bool {
        self.not_before <= now
    }

    /// Record a failed attempt and push eligibility out by `delay` from `now`.
    pub fn schedule_retry(&mut self, now: Duration, delay: Duration) {
        self.attempt += 1;
        self.not_before = now.saturating_add(delay);
    }
}

/// What a worker did with one dequeued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Charged and reserved; order is paid
    Completed { order_id: OrderId },
    /// Charged but inventory could not be reserved; order is failed
    ReservationFailed { order_id: OrderId },
    /// Gateway declined the charge; order is failed
    Declined { order_id: OrderId },
    /// Transient failure; job re-queued for a later attempt
    Retrying {
        order_id: OrderId,
        attempt: u32,
        not_before: Duration,
    },
    /// Attempts exhausted; job moved to the dead-letter sink, order is failed
    DeadLettered { order_id: OrderId, attempts: u32 },
    /// Another job already owns this order, or it is already final; discarded
    Duplicate { order_id: OrderId },
    /// The order row is missing or would not take the new status
    Orphaned { order_id: OrderId },
}

impl JobOutcome {
    pub fn order_id(&self) -> &OrderId {
        match self {
            JobOutcome::Completed { order_id }
            | JobOutcome::ReservationFailed { order_id }
            | JobOutcome::Declined { order_id }
            | JobOutcome::Retrying { order_id, .. }
            | JobOutcome::DeadLettered { order_id, .. }
            | JobOutcome::Duplicate { order_id }
            | JobOutcome::Orphaned { order_id } => order_id,
        }
    }

    /// The job left the pipeline (it will not be seen again).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::Retrying { .. })
    }
}

/// Entry in the dead-letter sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: impl Into<String>) -> Self {
        Self {
            job,
            dead_lettered_at: Utc::now(),
            reason: reason.into(),
        }
    }

    /// Total attempts the job made before being dead-lettered.
    pub fn attempts(&self) -> u32 {
        self.job.attempt + 1
    }
}
