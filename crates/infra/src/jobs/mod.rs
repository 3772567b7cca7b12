//! Background job primitives for the checkout pipeline.
//!
//! ## Components
//!
//! - `Job`: one deferred charge for an order, with attempt and eligibility time
//! - `JobQueue`: bounded, time-ordered queue shared by producers and workers
//! - `IdempotencyStore`: per-order owner gate, one admission per attempt
//! - `RetryPolicy`: attempt bound and backoff schedule
//! - `DeadLetterSink`: jobs that exhausted their attempts

pub mod dead_letter;
pub mod idempotency;
pub mod queue;
pub mod retry;
pub mod types;

pub use dead_letter::DeadLetterSink;
pub use idempotency::{Claim, IdempotencyStore};
pub use queue::{JobQueue, QueueFull};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use types::{DeadLetterEntry, Job, JobOutcome};
