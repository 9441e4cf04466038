//! Attempt gate.
//!
//! Composes the three counter namespaces of a key into one decision:
//!
//! 1. consume a point from **free**; success means the attempt is allowed
//! 2. otherwise read **block** and **counter**
//!    - an active block denies until it expires
//!    - no block: penalize block with the delay for the next failure ordinal;
//!      the caller that opens the window (block consumed == 1) advances
//!      **counter** and is allowed through, every concurrent loser is denied
//!      with the winner's expiry
//!
//! The gate holds no locks. Per-key atomicity of `consume` and `penalty` in
//! the store is the only ordering it relies on.

use crate::application::ports::{Clock, ConsumeError, CounterStore, StoreError};
use crate::domain::{
    decision::GateDecision, key::BruteKey, policy::ValidatedPolicy, schedule::DelaySchedule,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Store operation that failed while gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStep {
    /// Consuming from the free budget
    ConsumeFree,
    /// Reading block or counter state
    ReadState,
    /// Opening the block window
    PenalizeBlock,
    /// Advancing the failure tally
    PenalizeCounter,
}

/// Error returned when the store fails during gating.
#[derive(Debug, Error)]
#[error("store failed during {step:?}")]
pub struct GateError {
    /// Which step failed
    pub step: GateStep,
    /// The underlying store error
    #[source]
    pub source: StoreError,
}

impl GateError {
    fn new(step: GateStep, source: StoreError) -> Self {
        Self { step, source }
    }
}

/// The three counter namespaces of one guard.
#[derive(Debug, Clone)]
pub struct CounterSet {
    /// Free-attempt budget
    pub free: Arc<dyn CounterStore>,
    /// Active block window
    pub block: Arc<dyn CounterStore>,
    /// Failure tally
    pub counter: Arc<dyn CounterStore>,
}

/// Decision engine over the free / block / counter namespaces.
#[derive(Debug, Clone)]
pub struct AttemptGate {
    counters: CounterSet,
    schedule: Arc<DelaySchedule>,
    clock: Arc<dyn Clock>,
}

impl AttemptGate {
    /// Create a gate over the given counters.
    pub fn new(counters: CounterSet, policy: &ValidatedPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            counters,
            schedule: Arc::new(policy.schedule().clone()),
            clock,
        }
    }

    /// Decide the outcome of one attempt for `key`.
    ///
    /// # Errors
    /// Returns `GateError` if any store operation fails for a reason other
    /// than the free budget being exhausted. Nothing is retried.
    pub async fn check(&self, key: &BruteKey) -> Result<GateDecision, GateError> {
        let key = key.as_str();

        match self.counters.free.consume(key).await {
            Ok(_) => return Ok(GateDecision::Allow),
            Err(ConsumeError::Exhausted(_)) => {}
            Err(ConsumeError::Store(e)) => return Err(GateError::new(GateStep::ConsumeFree, e)),
        }

        let (block, counter) =
            tokio::join!(self.counters.block.get(key), self.counters.counter.get(key));
        let block = block.map_err(|e| GateError::new(GateStep::ReadState, e))?;
        let counter = counter.map_err(|e| GateError::new(GateStep::ReadState, e))?;

        if let Some(block) = block {
            return Ok(self.deny_after(block.ms_before_next));
        }

        let ordinal = counter.map_or(1, |c| c.consumed_points.saturating_add(1));
        let ms_delay = self.schedule.delay_for_attempt(ordinal);

        let opened = self
            .counters
            .block
            .penalty(key, 1, Some(ms_delay.div_ceil(1000)))
            .await
            .map_err(|e| GateError::new(GateStep::PenalizeBlock, e))?;

        if opened.consumed_points == 1 {
            self.counters
                .counter
                .penalty(key, 1, None)
                .await
                .map_err(|e| GateError::new(GateStep::PenalizeCounter, e))?;
            Ok(GateDecision::AllowAndRecordFailure)
        } else {
            Ok(self.deny_after(opened.ms_before_next))
        }
    }

    /// The counters this gate operates on.
    pub fn counters(&self) -> &CounterSet {
        &self.counters
    }

    /// The delay schedule in use.
    pub fn schedule(&self) -> &DelaySchedule {
        &self.schedule
    }

    fn deny_after(&self, ms_before_next: u64) -> GateDecision {
        GateDecision::Deny {
            retry_not_before: self.clock.now() + Duration::from_millis(ms_before_next),
        }
    }
}
