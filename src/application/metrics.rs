//! Observability metrics for guarded attempts.
//!
//! Provides counters about gate outcomes for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking guard outcomes.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct GuardMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Attempts admitted without recording a failure
    allowed: AtomicU64,
    /// Attempts admitted with a failure recorded
    failures_recorded: AtomicU64,
    /// Attempts refused
    denied: AtomicU64,
    /// Store failures reported to the error handler
    store_errors: AtomicU64,
}

impl GuardMetrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                allowed: AtomicU64::new(0),
                failures_recorded: AtomicU64::new(0),
                denied: AtomicU64::new(0),
                store_errors: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn record_allowed(&self) {
        self.inner.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.inner.failures_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.inner.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_error(&self) {
        self.inner.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Attempts admitted without recording a failure.
    pub fn allowed(&self) -> u64 {
        self.inner.allowed.load(Ordering::Relaxed)
    }

    /// Attempts admitted with a failure recorded.
    pub fn failures_recorded(&self) -> u64 {
        self.inner.failures_recorded.load(Ordering::Relaxed)
    }

    /// Attempts refused.
    pub fn denied(&self) -> u64 {
        self.inner.denied.load(Ordering::Relaxed)
    }

    /// Store failures seen, whether or not the handler swallowed them.
    pub fn store_errors(&self) -> u64 {
        self.inner.store_errors.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allowed: self.allowed(),
            failures_recorded: self.failures_recorded(),
            denied: self.denied(),
            store_errors: self.store_errors(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.allowed.store(0, Ordering::Relaxed);
        self.inner.failures_recorded.store(0, Ordering::Relaxed);
        self.inner.denied.store(0, Ordering::Relaxed);
        self.inner.store_errors.store(0, Ordering::Relaxed);
    }
}

impl Default for GuardMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Attempts admitted without recording a failure
    pub allowed: u64,
    /// Attempts admitted with a failure recorded
    pub failures_recorded: u64,
    /// Attempts refused
    pub denied: u64,
    /// Store failures reported to the error handler
    pub store_errors: u64,
}

impl MetricsSnapshot {
    /// Total attempts that reached a decision.
    pub fn total_attempts(&self) -> u64 {
        self.allowed
            .saturating_add(self.failures_recorded)
            .saturating_add(self.denied)
    }

    /// Ratio of denied attempts to all decided attempts (0.0 to 1.0).
    ///
    /// Returns 0.0 if no attempts have been decided.
    pub fn denial_rate(&self) -> f64 {
        let total = self.total_attempts();
        if total == 0 {
            0.0
        } else {
            self.denied as f64 / total as f64
        }
    }
}
