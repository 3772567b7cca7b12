//! Logical time source used to schedule retries.
//!
//! Time is expressed as a `Duration` elapsed since the clock's own epoch. Jobs
//! carry a `not_before` value in the same units, so a retry delay is data on the
//! job rather than a sleeping thread.
//!
//! - `SystemClock` follows the monotonic wall clock (production).
//! - `ManualClock` only moves when told to (deterministic tests).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of "now" for retry scheduling.
pub trait Clock: Send + Sync + core::fmt::Debug {
    /// Current logical time, measured from the clock's epoch.
    fn now(&self) -> Duration;
}

/// Shared, injectable clock handle.
pub type SharedClock = Arc<dyn Clock>;

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Monotonic clock anchored at construction time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock advanced explicitly via `tick`/`set`; never moves on its own.
///
/// Stored as whole nanoseconds in an atomic so readers on worker threads never
/// observe a torn value.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at an arbitrary offset.
    pub fn starting_at(start: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(to_nanos(start)),
        }
    }

    /// Advance the clock.
    pub fn tick(&self, by: Duration) {
        let by = to_nanos(by);
        // fetch_update never fails with a closure that always returns Some.
        let _ = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(by))
            });
    }

    /// Jump to an absolute time (may move backwards).
    pub fn set(&self, to: Duration) {
        self.nanos.store(to_nanos(to), Ordering::Release);
    }

    /// Return to the epoch.
    pub fn reset(&self) {
        self.set(Duration::ZERO);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

fn to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
