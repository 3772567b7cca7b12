//! `orderflow-core`: shared building blocks for the checkout pipeline.
//!
//! This crate contains **pure** primitives (no threads, no IO): identifiers,
//! the domain error model, and the clock abstraction used to schedule retries.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{JobId, OrderId, UserId};
