//! Inventory reservation port.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use orderflow_core::OrderId;

/// Reserves stock for a charged order.
pub trait Inventory: Send + Sync {
    /// Returns `false` when stock could not be reserved.
    fn reserve(&self, order_id: &OrderId) -> bool;
}

impl<I> Inventory for Arc<I>
where
    I: Inventory + ?Sized,
{
    fn reserve(&self, order_id: &OrderId) -> bool {
        (**self).reserve(order_id)
    }
}

/// Inventory that never runs out.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedInventory;

impl Inventory for UnlimitedInventory {
    fn reserve(&self, _order_id: &OrderId) -> bool {
        true
    }
}

#[derive(Debug)]
struct Stock {
    remaining: u32,
    reserved: HashSet<OrderId>,
}

/// Finite stock; each order takes one unit.
///
/// Reserving the same order twice is a no-op that succeeds.
#[derive(Debug)]
pub struct StockedInventory {
    stock: Mutex<Stock>,
}

impl StockedInventory {
    pub fn new(units: u32) -> Self {
        Self {
            stock: Mutex::new(Stock {
                remaining: units,
                reserved: HashSet::new(),
            }),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.stock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining
    }
}

impl Inventory for StockedInventory {
    fn reserve(&self, order_id: &OrderId) -> bool {
        let mut stock = self.stock.lock().unwrap_or_else(PoisonError::into_inner);
        if stock.reserved.contains(order_id) {
            return true;
        }
        if stock.remaining == 0 {
            return false;
        }
        stock.remaining -= 1;
        stock.reserved.insert(order_id.clone());
        true
    }
}
