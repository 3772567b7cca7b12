//! Checkout workers and the pool that runs them.

pub mod checkout_worker;
pub mod pool;

pub use checkout_worker::{PoolStats, WorkerContext};
pub use pool::{PoolError, WorkerPool, WorkerPoolConfig};
