//! Order table shared by the checkout service and the workers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use orderflow_core::{DomainError, DomainResult, Entity, OrderId};
use orderflow_orders::{Order, OrderStatus};

/// Keyed order storage.
///
/// Each order has a single writer at a time: the checkout service while it is
/// pending creation, then the worker holding its job.
pub trait OrderStore: Send + Sync {
    fn get(&self, order_id: &OrderId) -> Option<Order>;

    /// Insert `order` unless one with the same id exists.
    ///
    /// Returns the already-stored order when nothing was inserted.
    fn insert_if_absent(&self, order: Order) -> Option<Order>;

    fn remove(&self, order_id: &OrderId) -> Option<Order>;

    /// Apply a status transition and return the updated order.
    fn transition(&self, order_id: &OrderId, next: OrderStatus) -> DomainResult<Order>;

    /// Snapshot of every stored order, sorted by id.
    fn list(&self) -> Vec<Order>;
}

impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    fn get(&self, order_id: &OrderId) -> Option<Order> {
        (**self).get(order_id)
    }

    fn insert_if_absent(&self, order: Order) -> Option<Order> {
        (**self).insert_if_absent(order)
    }

    fn remove(&self, order_id: &OrderId) -> Option<Order> {
        (**self).remove(order_id)
    }

    fn transition(&self, order_id: &OrderId, next: OrderStatus) -> DomainResult<Order> {
        (**self).transition(order_id, next)
    }

    fn list(&self) -> Vec<Order> {
        (**self).list()
    }
}

/// In-memory order store.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    inner: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl OrderStore for InMemoryOrderStore {
    fn get(&self, order_id: &OrderId) -> Option<Order> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(order_id).cloned()
    }

    fn insert_if_absent(&self, order: Order) -> Option<Order> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map.get(order.id()) {
            return Some(existing.clone());
        }
        map.insert(order.id().clone(), order);
        None
    }

    fn remove(&self, order_id: &OrderId) -> Option<Order> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(order_id)
    }

    fn transition(&self, order_id: &OrderId, next: OrderStatus) -> DomainResult<Order> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let order = map.get_mut(order_id).ok_or_else(DomainError::not_found)?;
        order.transition_to(next)?;
        Ok(order.clone())
    }

    fn list(&self) -> Vec<Order> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut orders: Vec<Order> = map.values().cloned().collect();
        orders.sort_by(|a, b| a.order_id().cmp(b.order_id()));
        orders
    }
}
