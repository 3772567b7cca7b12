//! Order-level idempotency gate.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};

use orderflow_core::{JobId, OrderId};

/// The job that owns an order and the latest attempt it was admitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub job_id: JobId,
    pub attempt: u32,
    /// An admitted attempt has not been settled yet.
    pub active: bool,
}

/// Records which job owns each order.
///
/// The first job to claim an order owns it for good. Later attempts of that
/// job are admitted once each, in increasing order, and never while another
/// attempt is active. Any other job, or a second copy of an attempt already
/// admitted, is refused.
#[derive(Debug, Default)]
pub struct IdempotencyStore {
    claims: Mutex<HashMap<OrderId, Claim>>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `attempt` of job `job_id` for `order_id`.
    ///
    /// Check-and-set under one lock, so concurrent callers see one winner. An
    /// admitted attempt stays active until `settle` is called for the order.
    pub fn claim(&self, order_id: &OrderId, job_id: JobId, attempt: u32) -> bool {
        self.admit(order_id, job_id, attempt, true)
    }

    /// End the active attempt for `order_id`.
    pub fn settle(&self, order_id: &OrderId) {
        if let Some(claim) = self.lock().get_mut(order_id) {
            claim.active = false;
        }
    }

    /// Claim `order_id` for an anonymous owner. Returns `true` only for the first caller.
    pub fn mark_processed(&self, order_id: &OrderId) -> bool {
        self.admit(order_id, JobId::new(), 0, false)
    }

    pub fn owner(&self, order_id: &OrderId) -> Option<Claim> {
        self.lock().get(order_id).copied()
    }

    pub fn is_processed(&self, order_id: &OrderId) -> bool {
        self.lock().contains_key(order_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn admit(&self, order_id: &OrderId, job_id: JobId, attempt: u32, active: bool) -> bool {
        let mut claims = self.lock();
        match claims.entry(order_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Claim {
                    job_id,
                    attempt,
                    active,
                });
                true
            }
            Entry::Occupied(mut slot) => {
                let owner = slot.get_mut();
                if !owner.active && owner.job_id == job_id && attempt > owner.attempt {
                    owner.attempt = attempt;
                    owner.active = active;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OrderId, Claim>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
