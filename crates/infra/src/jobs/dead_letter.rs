//! Append-only sink for jobs that exhausted their attempts.

use std::sync::{PoisonError, RwLock};

use tracing::warn;

use orderflow_core::OrderId;

use super::types::{DeadLetterEntry, Job};

/// In-memory dead-letter queue.
///
/// Entries are kept in arrival order for inspection; nothing here replays them.
#[derive(Debug, Default)]
pub struct DeadLetterSink {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl DeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job that will not be retried.
    pub fn push(&self, job: Job, reason: impl Into<String>) {
        let entry = DeadLetterEntry::new(job, reason);
        warn!(
            job_id = %entry.job.id,
            order_id = %entry.job.order_id,
            attempts = entry.attempts(),
            reason = %entry.reason,
            "job dead-lettered"
        );
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains_order(&self, order_id: &OrderId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| &e.job.order_id == order_id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
