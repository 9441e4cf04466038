//! Lockout policy configuration.
//!
//! `PolicyConfig` is the loadable, serde-friendly form. Validation turns it
//! into a `ValidatedPolicy`, which carries the derived lifetime, the delay
//! schedule and the options for each of the three counter namespaces.

use crate::domain::schedule::DelaySchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default number of attempts allowed before any delay applies.
pub const DEFAULT_FREE_RETRIES: u32 = 2;
/// Default first lockout delay (ms).
pub const DEFAULT_MIN_WAIT_MS: u64 = 500;
/// Default plateau lockout delay (ms): 15 minutes.
pub const DEFAULT_MAX_WAIT_MS: u64 = 15 * 60 * 1000;

/// Key prefix of the free-attempt budget namespace.
pub const FREE_PREFIX: &str = "free";
/// Key prefix of the active-block namespace.
pub const BLOCK_PREFIX: &str = "block";
/// Key prefix of the failure-tally namespace.
pub const COUNTER_PREFIX: &str = "counter";

/// Error returned when a policy or backend selection is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Backend name did not match any supported store
    #[error("Unknown limiter type. Use one of the supported backends: memory, redis (got {0:?})")]
    UnknownBackend(String),
    /// `max_wait` is below the (floored) `min_wait`
    #[error("max_wait ({max_wait_ms}ms) must not be below min_wait ({min_wait_ms}ms)")]
    MaxWaitBelowMinWait {
        /// Effective minimum wait
        min_wait_ms: u64,
        /// Configured maximum wait
        max_wait_ms: u64,
    },
    /// The backend needs an injected store factory
    #[error("backend {0} requires a store factory")]
    MissingStoreFactory(Backend),
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Backend {
    /// Process-local counters
    #[default]
    Memory,
    /// Counters shared through Redis
    Redis,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "redis" => Ok(Backend::Redis),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Backend> for String {
    fn from(backend: Backend) -> Self {
        backend.to_string()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Memory => f.write_str("memory"),
            Backend::Redis => f.write_str("redis"),
        }
    }
}

/// Loadable lockout policy.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use brute_throttle::PolicyConfig;
///
/// let config: PolicyConfig = serde_json::from_str(r#"{ "freeRetries": 5 }"#).unwrap();
/// assert_eq!(config.free_retries, 5);
/// assert_eq!(config.min_wait_ms, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Attempts allowed before any delay applies
    pub free_retries: u32,
    /// First lockout delay in milliseconds (floored at 1)
    #[serde(alias = "minWait")]
    pub min_wait_ms: u64,
    /// Plateau lockout delay in milliseconds
    #[serde(alias = "maxWait")]
    pub max_wait_ms: u64,
    /// How long failure history is remembered, in seconds.
    /// Derived from the schedule when unset.
    #[serde(alias = "lifetime")]
    pub lifetime_secs: Option<u64>,
    /// Whether allowed requests get a reset handle for their key
    pub attach_reset_to_request: bool,
    /// Which store backend holds the counters
    pub backend: Backend,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            free_retries: DEFAULT_FREE_RETRIES,
            min_wait_ms: DEFAULT_MIN_WAIT_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            lifetime_secs: None,
            attach_reset_to_request: true,
            backend: Backend::Memory,
        }
    }
}

impl PolicyConfig {
    /// Validate the configuration and derive the schedule and lifetime.
    ///
    /// # Errors
    /// Returns `ConfigError::MaxWaitBelowMinWait` if `max_wait_ms` is below
    /// the floored `min_wait_ms`.
    pub fn validate(&self) -> Result<ValidatedPolicy, ConfigError> {
        let min_wait_ms = self.min_wait_ms.max(1);
        if self.max_wait_ms < min_wait_ms {
            return Err(ConfigError::MaxWaitBelowMinWait {
                min_wait_ms,
                max_wait_ms: self.max_wait_ms,
            });
        }

        let schedule = DelaySchedule::build(min_wait_ms, self.max_wait_ms);
        let lifetime_secs = self.lifetime_secs.unwrap_or_else(|| {
            let steps = schedule.len() as u64 + u64::from(self.free_retries);
            self.max_wait_ms.saturating_mul(steps).div_ceil(1000)
        });

        Ok(ValidatedPolicy {
            free_retries: self.free_retries,
            min_wait_ms,
            max_wait_ms: self.max_wait_ms,
            lifetime_secs,
            attach_reset_to_request: self.attach_reset_to_request,
            backend: self.backend,
            schedule,
        })
    }
}

/// Capacity and window of one counter namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterOptions {
    /// Points that may be consumed within one window
    pub points: u32,
    /// Window length in seconds; 0 means entries never expire
    pub duration_secs: u64,
    /// Namespace prefix prepended to every key
    pub key_prefix: String,
}

impl CounterOptions {
    /// Create options for a namespace.
    pub fn new(key_prefix: impl Into<String>, points: u32, duration_secs: u64) -> Self {
        Self {
            points,
            duration_secs,
            key_prefix: key_prefix.into(),
        }
    }

    /// Storage key for an identity key within this namespace.
    pub fn prefixed(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

/// Immutable policy with derived values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPolicy {
    free_retries: u32,
    min_wait_ms: u64,
    max_wait_ms: u64,
    lifetime_secs: u64,
    attach_reset_to_request: bool,
    backend: Backend,
    schedule: DelaySchedule,
}

impl ValidatedPolicy {
    /// Attempts allowed before any delay applies.
    pub fn free_retries(&self) -> u32 {
        self.free_retries
    }

    /// Effective first delay (ms).
    pub fn min_wait_ms(&self) -> u64 {
        self.min_wait_ms
    }

    /// Plateau delay (ms).
    pub fn max_wait_ms(&self) -> u64 {
        self.max_wait_ms
    }

    /// Failure history lifetime (s).
    pub fn lifetime_secs(&self) -> u64 {
        self.lifetime_secs
    }

    /// Whether reset handles are attached to allowed requests.
    pub fn attach_reset_to_request(&self) -> bool {
        self.attach_reset_to_request
    }

    /// Selected backend.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The escalating delay schedule.
    pub fn schedule(&self) -> &DelaySchedule {
        &self.schedule
    }

    /// Free-attempt budget: `max(free_retries - 1, 0)` points over the lifetime.
    pub fn free_options(&self) -> CounterOptions {
        CounterOptions::new(
            FREE_PREFIX,
            self.free_retries.saturating_sub(1),
            self.lifetime_secs,
        )
    }

    /// Active block: one point over `min(lifetime, ceil(max_wait / 1000))`.
    pub fn block_options(&self) -> CounterOptions {
        let max_wait_secs = self.max_wait_ms.div_ceil(1000);
        CounterOptions::new(BLOCK_PREFIX, 1, self.lifetime_secs.min(max_wait_secs))
    }

    /// Failure tally: one point over the lifetime, advanced only via penalty.
    pub fn counter_options(&self) -> CounterOptions {
        CounterOptions::new(COUNTER_PREFIX, 1, self.lifetime_secs)
    }
}
