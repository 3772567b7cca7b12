//! Orders domain module.
//!
//! This crate contains the order record and its status lifecycle, implemented
//! purely as deterministic domain logic (no IO, no threads, no storage).

pub mod order;
pub mod receipt;

pub use order::{Order, OrderStatus};
pub use receipt::Receipt;
