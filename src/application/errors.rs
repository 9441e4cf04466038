//! Store failure reporting.
//!
//! Store failures are never retried or swallowed by the core. They are handed
//! to an injectable `StoreErrorHandler`; the default one re-raises them as a
//! fatal `BruteError::Store`.

use crate::application::ports::StoreError;
use crate::domain::policy::ConfigError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Message attached to failures while gating an attempt.
pub const INCREMENT_FAILED: &str = "Cannot increment request count";
/// Message attached to failures while resetting a key.
pub const RESET_FAILED: &str = "Cannot reset request count";

/// A store failure with the context it happened in.
#[derive(Debug)]
pub struct StoreFailure {
    /// Fixed message identifying gating or reset
    pub message: &'static str,
    /// Caller-supplied sub-key, if any
    pub key: Option<String>,
    /// Client address, if any
    pub ip: Option<String>,
    /// The underlying store error
    pub source: StoreError,
}

impl StoreFailure {
    /// Failure while gating an attempt.
    pub fn increment(source: StoreError, key: Option<String>, ip: Option<String>) -> Self {
        Self {
            message: INCREMENT_FAILED,
            key,
            ip,
            source,
        }
    }

    /// Failure while resetting a key.
    pub fn reset(source: StoreError, key: Option<String>, ip: Option<String>) -> Self {
        Self {
            message: RESET_FAILED,
            key,
            ip,
            source,
        }
    }

    /// Whether this failure happened during a reset.
    pub fn is_reset(&self) -> bool {
        self.message == RESET_FAILED
    }
}

impl fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.source)
    }
}

/// Errors surfaced to the host.
#[derive(Debug, Error)]
pub enum BruteError {
    /// Invalid configuration at construction
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A store failure re-raised by the store error handler
    #[error("{message}")]
    Store {
        /// Fixed message identifying gating or reset
        message: &'static str,
        /// Caller-supplied sub-key, if any
        key: Option<String>,
        /// Client address, if any
        ip: Option<String>,
        /// The underlying store error
        #[source]
        source: StoreError,
    },
}

impl From<StoreFailure> for BruteError {
    fn from(failure: StoreFailure) -> Self {
        BruteError::Store {
            message: failure.message,
            key: failure.key,
            ip: failure.ip,
            source: failure.source,
        }
    }
}

/// Sink for store failures.
///
/// Returning `Ok(())` swallows the failure; returning an error surfaces it to
/// the caller of the failed operation.
pub type StoreErrorHandler = Arc<dyn Fn(StoreFailure) -> Result<(), BruteError> + Send + Sync>;

/// Default handler: re-raise every failure.
pub fn propagate_store_errors() -> StoreErrorHandler {
    Arc::new(|failure| Err(failure.into()))
}
