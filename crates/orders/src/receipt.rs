use serde::{Deserialize, Serialize};

use orderflow_core::OrderId;

/// Outcome reported by a payment gateway for a single charge call.
///
/// `charged == false` is a definitive decline (no money moved), distinct from
/// a transient gateway error which is reported through `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub order_id: OrderId,
    pub charged: bool,
    /// Gateway-side attempt counter for this order (1-based).
    pub attempt: u32,
}

impl Receipt {
    pub fn charged(order_id: OrderId, attempt: u32) -> Self {
        Self {
            order_id,
            charged: true,
            attempt,
        }
    }

    pub fn declined(order_id: OrderId, attempt: u32) -> Self {
        Self {
            order_id,
            charged: false,
            attempt,
        }
    }
}
