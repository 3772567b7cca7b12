use serde::{Deserialize, Serialize};

use orderflow_core::{DomainError, DomainResult, Entity, OrderId, UserId};

/// Order status lifecycle.
///
/// `Pending` is the only non-terminal state. `Paid` and `Failed` never change
/// once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer order awaiting (or done with) payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    order_id: OrderId,
    user_id: UserId,
    /// Price in smallest currency unit (cents).
    amount_cents: u64,
    status: OrderStatus,
}

impl Order {
    /// Create a validated order in `Pending` state.
    pub fn new(
        order_id: impl Into<OrderId>,
        user_id: impl Into<UserId>,
        amount_cents: u64,
    ) -> DomainResult<Self> {
        let order_id = order_id.into();
        let user_id = user_id.into();

        if order_id.is_blank() {
            return Err(DomainError::validation("order_id must not be blank"));
        }
        if user_id.is_blank() {
            return Err(DomainError::validation("user_id must not be blank"));
        }
        if amount_cents == 0 {
            return Err(DomainError::validation("amount_cents must be positive"));
        }

        Ok(Self {
            order_id,
            user_id,
            amount_cents,
            status: OrderStatus::Pending,
        })
    }

    /// Re-validate this order's fields and return a fresh `Pending` copy.
    ///
    /// Callers may hand in an order carrying any status (e.g. deserialized from
    /// a request body); acceptance always starts from `Pending`.
    pub fn to_pending(&self) -> DomainResult<Self> {
        Self::new(self.order_id.clone(), self.user_id.clone(), self.amount_cents)
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn amount_cents(&self) -> u64 {
        self.amount_cents
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_paid(&mut self) -> DomainResult<()> {
        self.transition_to(OrderStatus::Paid)
    }

    pub fn mark_failed(&mut self) -> DomainResult<()> {
        self.transition_to(OrderStatus::Failed)
    }

    /// Move a pending order to a terminal status.
    pub fn transition_to(&mut self, next: OrderStatus) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "order {} is already {}",
                self.order_id, self.status
            )));
        }
        if !next.is_terminal() {
            return Err(DomainError::invariant(format!(
                "order {} can only leave pending for paid or failed",
                self.order_id
            )));
        }

        self.status = next;
        Ok(())
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.order_id
    }
}
