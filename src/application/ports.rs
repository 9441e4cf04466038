//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::policy::CounterOptions;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// Port for obtaining current time.
///
/// Wall-clock time is used because denials carry an absolute retry
/// timestamp. Infrastructure provides concrete implementations
/// (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current time.
    fn now(&self) -> SystemTime;
}

/// Snapshot of one counter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterState {
    /// Points consumed in the current window
    pub consumed_points: u32,
    /// Milliseconds until the window expires (0 if it never does)
    pub ms_before_next: u64,
}

impl CounterState {
    /// Create a counter snapshot.
    pub fn new(consumed_points: u32, ms_before_next: u64) -> Self {
        Self {
            consumed_points,
            ms_before_next,
        }
    }
}

/// Failure of the backing store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Generic backend failure
    #[error("store backend error: {0}")]
    Backend(String),
    /// The store replied with something it should not have
    #[error("malformed store reply: {0}")]
    MalformedReply(String),
    /// Redis command failure
    #[cfg(feature = "redis-storage")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Rejection of a `consume` call.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// The namespace has no points left in this window. Expected, not a fault.
    #[error("capacity exhausted ({} points consumed)", .0.consumed_points)]
    Exhausted(CounterState),
    /// The store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Port for one counter namespace.
///
/// Each instance is configured with its own capacity, window and key prefix
/// (`CounterOptions`). `consume` and `penalty` must be atomic per key with
/// respect to concurrent callers: the attempt gate relies on it to resolve
/// races without locks of its own.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Consume one point. Rejects with `ConsumeError::Exhausted` once more
    /// than `points` have been consumed in the current window.
    async fn consume(&self, key: &str) -> Result<CounterState, ConsumeError>;

    /// Add `points` without any capacity check.
    ///
    /// A new entry expires after `custom_duration_secs` when given, otherwise
    /// after the namespace window. An existing entry keeps its expiry.
    async fn penalty(
        &self,
        key: &str,
        points: u32,
        custom_duration_secs: Option<u64>,
    ) -> Result<CounterState, StoreError>;

    /// Read an entry without changing it. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<CounterState>, StoreError>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// The namespace configuration.
    fn options(&self) -> &CounterOptions;
}

/// Port for creating one store per counter namespace.
///
/// Backends are injected through this factory; the gate only ever sees
/// `CounterStore`.
pub trait StoreFactory: Send + Sync + Debug {
    /// Create the store for a namespace.
    fn create(&self, options: CounterOptions) -> Arc<dyn CounterStore>;
}
