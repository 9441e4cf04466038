//! # brute-throttle
//!
//! Progressive-delay brute-force protection for request endpoints.
//!
//! Failed attempts are tracked per identity key. A few free attempts are let
//! through untouched, then every further attempt opens a lockout window whose
//! length grows along a Fibonacci-like schedule up to a maximum wait. While a
//! window is open, attempts are denied with the time the next one will be
//! considered.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brute_throttle::{AttemptRequest, BruteGuard, KeySource, MiddlewareOptions, Verdict};
//! use std::net::IpAddr;
//!
//! # async fn handle(ip: IpAddr, user: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let guard = BruteGuard::builder("login")
//!     .with_free_retries(3)
//!     .with_min_wait(500)
//!     .with_max_wait(15 * 60 * 1000)
//!     .build()?;
//!
//! let login = guard.middleware(MiddlewareOptions {
//!     key: KeySource::Identity,
//!     ..Default::default()
//! });
//!
//! match login.prevent(AttemptRequest::new(ip).with_identity(user)).await? {
//!     Verdict::Proceed(proceed) => {
//!         // ... check the password ...
//!         let password_ok = true;
//!         if password_ok {
//!             // Forget this user's failures
//!             proceed.resets.reset_all().await?;
//!         }
//!     }
//!     Verdict::Respond(response) => {
//!         // 429 with Retry-After and a JSON body; send it as is
//!         let _ = response;
//!     }
//!     Verdict::Halted => {
//!         // The store failed and the error handler swallowed it
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## How Attempts Are Counted
//!
//! Every guard keeps three counters per key:
//!
//! - **free**: budget of `free_retries - 1` attempts per lifetime
//! - **block**: open while the key is locked out
//! - **counter**: number of failures recorded so far
//!
//! An attempt first draws from the free budget. Once that is spent, an open
//! block denies the attempt; otherwise a new block is opened for the delay
//! of the next failure, the failure is recorded, and the attempt proceeds.
//! With the default `free_retries = 2` the first attempt is allowed, the
//! second is allowed with a failure recorded, and the third is denied.
//!
//! Concurrent attempts on the same key race on opening the block. Exactly
//! one wins and proceeds; the others are denied with the winner's expiry.
//!
//! ## Delay Schedule
//!
//! ```
//! use brute_throttle::DelaySchedule;
//!
//! let schedule = DelaySchedule::build(500, 5_000);
//! assert_eq!(schedule.delays(), &[500, 500, 1_000, 1_500, 2_500, 4_000, 5_000]);
//!
//! // Past the end of the schedule the delay stays at the maximum
//! assert_eq!(schedule.delay_for_attempt(20), 5_000);
//! ```
//!
//! ## Configuration
//!
//! `PolicyConfig` deserializes from any serde format. Every field has a
//! default and the JavaScript-style names are accepted:
//!
//! ```
//! use brute_throttle::PolicyConfig;
//!
//! let config: PolicyConfig = serde_json::from_str(
//!     r#"{ "freeRetries": 5, "minWait": 1000, "maxWait": 60000, "backend": "memory" }"#,
//! ).unwrap();
//!
//! let policy = config.validate().unwrap();
//! assert_eq!(policy.free_retries(), 5);
//! assert_eq!(policy.schedule().max_wait(), 60_000);
//! ```
//!
//! ## Stores
//!
//! Counters live behind the [`CounterStore`] trait. The guard uses the
//! in-process [`MemoryStoreFactory`] by default; enable the `redis-storage`
//! feature for `RedisStoreFactory`, or inject any [`StoreFactory`] with
//! `with_store_factory`.
//!
//! ## Store Failures
//!
//! A failing store is never treated as a lockout. The failure goes to the
//! store error handler, which by default turns it into
//! [`BruteError::Store`]. A handler that returns `Ok(())` makes the guard
//! return [`Verdict::Halted`] instead.
//!
//! ## Observability
//!
//! ```rust,no_run
//! # use brute_throttle::BruteGuard;
//! # let guard = BruteGuard::builder("login").build().unwrap();
//! let snapshot = guard.metrics().snapshot();
//! println!("Denied: {}", snapshot.denied);
//! println!("Denial rate: {:.2}%", snapshot.denial_rate() * 100.0);
//! ```
//!
//! Decisions are logged at `DEBUG` and store failures at `WARN` through
//! `tracing`. The library never installs a subscriber.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    decision::GateDecision,
    key::BruteKey,
    policy::{Backend, ConfigError, CounterOptions, PolicyConfig, ValidatedPolicy},
    schedule::{delay_for_attempt, DelaySchedule},
};

pub use application::{
    errors::{propagate_store_errors, BruteError, StoreErrorHandler, StoreFailure},
    gate::{AttemptGate, CounterSet, GateError, GateStep},
    metrics::{GuardMetrics, MetricsSnapshot},
    ports::{Clock, ConsumeError, CounterState, CounterStore, StoreError, StoreFactory},
    reset::{ResetChain, ResetController, ResetHandle},
};

pub use infrastructure::{
    clock::SystemClock,
    fail::{DenialMark, DenyContext, FailAction, FailPolicy},
    guard::{
        AttemptRequest, BruteGuard, BruteGuardBuilder, KeyExtractor, KeySource, Middleware,
        MiddlewareOptions, Proceed, Verdict,
    },
    memory_store::{MemoryCounterStore, MemoryStoreFactory},
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisCounterStore, RedisStoreConfig, RedisStoreFactory};
