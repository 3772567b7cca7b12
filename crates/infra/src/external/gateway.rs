//! Payment gateway port and in-process implementations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::debug;

use orderflow_core::OrderId;
use orderflow_orders::Receipt;

/// Gateway call failure.
///
/// Every failure is treated as transient: the worker retries it per the retry
/// policy. A definitive refusal is a successful call returning a receipt with
/// `charged == false`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("transient gateway failure: {0}")]
    Transient(String),
}

impl GatewayError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }
}

/// Charges orders.
pub trait PaymentGateway: Send + Sync {
    fn charge(&self, order_id: &OrderId, amount_cents: u64) -> Result<Receipt, GatewayError>;
}

impl<G> PaymentGateway for Arc<G>
where
    G: PaymentGateway + ?Sized,
{
    fn charge(&self, order_id: &OrderId, amount_cents: u64) -> Result<Receipt, GatewayError> {
        (**self).charge(order_id, amount_cents)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct FakeLedger {
    attempts: HashMap<OrderId, u32>,
    charges: HashMap<OrderId, u32>,
}

/// Deterministic gateway that fails the first N attempts per order.
///
/// Per-order failure counts override the default count. Attempts and
/// successful charges are tallied per order.
#[derive(Debug, Default)]
pub struct FakeGateway {
    default_failures: u32,
    failures: HashMap<OrderId, u32>,
    latency: Option<Duration>,
    ledger: Mutex<FakeLedger>,
}

impl FakeGateway {
    /// A gateway that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` attempts of every order.
    pub fn failing_first(n: u32) -> Self {
        Self {
            default_failures: n,
            ..Self::default()
        }
    }

    /// Fail the first `n` attempts of `order_id`.
    pub fn with_failures(mut self, order_id: impl Into<OrderId>, n: u32) -> Self {
        self.failures.insert(order_id.into(), n);
        self
    }

    /// Sleep for `latency` on every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Calls made for `order_id`, successful or not.
    pub fn attempt_count(&self, order_id: &OrderId) -> u32 {
        lock(&self.ledger).attempts.get(order_id).copied().unwrap_or(0)
    }

    /// Successful charges made for `order_id`.
    pub fn charge_count(&self, order_id: &OrderId) -> u32 {
        lock(&self.ledger).charges.get(order_id).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        lock(&self.ledger).attempts.values().sum()
    }

    pub fn total_charges(&self) -> u32 {
        lock(&self.ledger).charges.values().sum()
    }

    fn failures_for(&self, order_id: &OrderId) -> u32 {
        self.failures
            .get(order_id)
            .copied()
            .unwrap_or(self.default_failures)
    }
}

impl PaymentGateway for FakeGateway {
    fn charge(&self, order_id: &OrderId, amount_cents: u64) -> Result<Receipt, GatewayError> {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }

        let mut ledger = lock(&self.ledger);
        let attempt = {
            let count = ledger.attempts.entry(order_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if attempt <= self.failures_for(order_id) {
            debug!(order_id = %order_id, attempt, "fake gateway failing attempt");
            return Err(GatewayError::transient(format!(
                "gateway error for order {order_id} (attempt {attempt})"
            )));
        }

        *ledger.charges.entry(order_id.clone()).or_insert(0) += 1;
        debug!(order_id = %order_id, attempt, amount_cents, "fake gateway charged");
        Ok(Receipt::charged(order_id.clone(), attempt))
    }
}

/// Gateway that is always down.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingGateway;

impl PaymentGateway for FailingGateway {
    fn charge(&self, _order_id: &OrderId, _amount_cents: u64) -> Result<Receipt, GatewayError> {
        Err(GatewayError::transient("payment gateway is down"))
    }
}

/// One recorded `charge` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeCall {
    pub order_id: OrderId,
    pub amount_cents: u64,
    pub succeeded: bool,
}

/// Decorator recording every call made to the wrapped gateway.
#[derive(Debug)]
pub struct RecordingGateway<G> {
    inner: G,
    calls: Mutex<Vec<ChargeCall>>,
}

impl<G> RecordingGateway<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn calls(&self) -> Vec<ChargeCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls_for(&self, order_id: &OrderId) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| &c.order_id == order_id)
            .count()
    }
}

impl<G: PaymentGateway> PaymentGateway for RecordingGateway<G> {
    fn charge(&self, order_id: &OrderId, amount_cents: u64) -> Result<Receipt, GatewayError> {
        let result = self.inner.charge(order_id, amount_cents);
        lock(&self.calls).push(ChargeCall {
            order_id: order_id.clone(),
            amount_cents,
            succeeded: result.is_ok(),
        });
        result
    }
}

/// Decorator declining block-listed orders without calling the wrapped gateway.
#[derive(Debug)]
pub struct FraudCheckGateway<G> {
    inner: G,
    blocked: HashSet<OrderId>,
    /// Calls seen per blocked order, so each receipt carries its real attempt.
    declines: Mutex<HashMap<OrderId, u32>>,
}

impl<G> FraudCheckGateway<G> {
    pub fn new(inner: G, blocked: impl IntoIterator<Item = OrderId>) -> Self {
        Self {
            inner,
            blocked: blocked.into_iter().collect(),
            declines: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

impl<G: PaymentGateway> PaymentGateway for FraudCheckGateway<G> {
    fn charge(&self, order_id: &OrderId, amount_cents: u64) -> Result<Receipt, GatewayError> {
        if self.blocked.contains(order_id) {
            let attempt = {
                let mut declines = lock(&self.declines);
                let count = declines.entry(order_id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            debug!(order_id = %order_id, attempt, "fraud check declined charge");
            return Ok(Receipt::declined(order_id.clone(), attempt));
        }
        self.inner.charge(order_id, amount_cents)
    }
}
