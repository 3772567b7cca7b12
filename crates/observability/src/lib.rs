//! Tracing/logging setup shared by the binaries.

/// Initialize process-wide logging with the default `info` level.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}

/// Tracing configuration (filters, formatting).
pub mod tracing;
