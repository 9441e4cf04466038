//! Clearing the counters of a key.
//!
//! `ResetController` deletes all three namespaces for a key. `ResetHandle`
//! binds a controller to one key so it can be handed to the host after an
//! attempt, and `ResetChain` collects the handles of every guard that
//! protected the same request.

use crate::application::errors::{BruteError, StoreErrorHandler, StoreFailure};
use crate::application::gate::CounterSet;
use crate::application::ports::StoreError;
use crate::domain::key::BruteKey;

/// Deletes the free, block and counter entries of a key.
#[derive(Debug, Clone)]
pub struct ResetController {
    counters: CounterSet,
}

impl ResetController {
    /// Create a controller over the given counters.
    pub fn new(counters: CounterSet) -> Self {
        Self { counters }
    }

    /// Delete all three entries for `key`.
    ///
    /// The deletions run concurrently and all of them are attempted even if
    /// one fails. Deletions already applied are not rolled back.
    ///
    /// # Errors
    /// Returns the first `StoreError` in free, block, counter order.
    pub async fn reset(&self, key: &BruteKey) -> Result<(), StoreError> {
        let key = key.as_str();
        let (free, block, counter) = tokio::join!(
            self.counters.free.delete(key),
            self.counters.block.delete(key),
            self.counters.counter.delete(key),
        );
        free.and(block).and(counter)
    }
}

/// Reset bound to the key of one attempt.
#[derive(Clone)]
pub struct ResetHandle {
    controller: ResetController,
    key: BruteKey,
    sub_key: Option<String>,
    ip: Option<String>,
    on_error: StoreErrorHandler,
}

impl ResetHandle {
    /// Bind a controller to a derived key.
    ///
    /// `sub_key` and `ip` are only used as context when reporting failures.
    pub fn new(
        controller: ResetController,
        key: BruteKey,
        sub_key: Option<String>,
        ip: Option<String>,
        on_error: StoreErrorHandler,
    ) -> Self {
        Self {
            controller,
            key,
            sub_key,
            ip,
            on_error,
        }
    }

    /// Clear the counters for this handle's key.
    ///
    /// # Errors
    /// Store failures are routed through the store error handler; whatever
    /// it returns is returned here.
    pub async fn reset(&self) -> Result<(), BruteError> {
        match self.controller.reset(&self.key).await {
            Ok(()) => Ok(()),
            Err(source) => (self.on_error)(StoreFailure::reset(
                source,
                self.sub_key.clone(),
                self.ip.clone(),
            )),
        }
    }

    /// The derived key this handle clears.
    pub fn key(&self) -> &BruteKey {
        &self.key
    }
}

impl std::fmt::Debug for ResetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetHandle")
            .field("key", &self.key)
            .field("sub_key", &self.sub_key)
            .field("ip", &self.ip)
            .finish_non_exhaustive()
    }
}

/// Reset handles of every guard that admitted one request.
///
/// Handles run oldest first. A failing handle does not stop later ones.
#[derive(Debug, Clone, Default)]
pub struct ResetChain {
    handles: Vec<ResetHandle>,
}

impl ResetChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handle.
    pub fn push(&mut self, handle: ResetHandle) {
        self.handles.push(handle);
    }

    /// Number of handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Iterate over the handles, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ResetHandle> {
        self.handles.iter()
    }

    /// Run every handle in order.
    ///
    /// # Errors
    /// Returns the first error after all handles have been attempted.
    pub async fn reset_all(&self) -> Result<(), BruteError> {
        let mut first_error = None;

        for handle in &self.handles {
            if let Err(e) = handle.reset().await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::propagate_store_errors;
    use crate::application::ports::StoreFactory;
    use crate::domain::policy::PolicyConfig;
    use crate::infrastructure::memory_store::MemoryStoreFactory;
    use crate::infrastructure::mocks::{FaultyStore, MockClock, StoreOp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::SystemTime;

    fn counters(clock: Arc<MockClock>) -> CounterSet {
        let policy = PolicyConfig::default().validate().unwrap();
        let factory = MemoryStoreFactory::new(clock);
        CounterSet {
            free: factory.create(policy.free_options()),
            block: factory.create(policy.block_options()),
            counter: factory.create(policy.counter_options()),
        }
    }

    async fn seed(counters: &CounterSet, key: &BruteKey) {
        let key = key.as_str();
        counters.free.penalty(key, 1, None).await.unwrap();
        counters.block.penalty(key, 1, Some(5)).await.unwrap();
        counters.counter.penalty(key, 1, None).await.unwrap();
    }

    async fn is_cleared(counters: &CounterSet, key: &BruteKey) -> bool {
        let key = key.as_str();
        counters.free.get(key).await.unwrap().is_none()
            && counters.block.get(key).await.unwrap().is_none()
            && counters.counter.get(key).await.unwrap().is_none()
    }

    #[tokio::test]
    async fn test_reset_clears_all_counters() {
        let counters = counters(Arc::new(MockClock::new(SystemTime::now())));
        let controller = ResetController::new(counters.clone());
        let key = BruteKey::derive([Some("reset")]);

        seed(&counters, &key).await;
        controller.reset(&key).await.unwrap();

        assert!(is_cleared(&counters, &key).await);
    }

    #[tokio::test]
    async fn test_reset_of_unknown_key_is_noop() {
        let counters = counters(Arc::new(MockClock::new(SystemTime::now())));
        let controller = ResetController::new(counters);

        assert!(controller
            .reset(&BruteKey::derive([Some("never-seen")]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_partial_failure_still_attempts_all() {
        let clock = Arc::new(MockClock::new(SystemTime::now()));
        let healthy = counters(clock);
        let counters = CounterSet {
            free: healthy.free.clone(),
            block: Arc::new(FaultyStore::failing(healthy.block.clone(), StoreOp::Delete)),
            counter: healthy.counter.clone(),
        };
        let controller = ResetController::new(counters.clone());
        let key = BruteKey::derive([Some("partial")]);

        seed(&healthy, &key).await;
        assert!(controller.reset(&key).await.is_err());

        // Free and counter deletions were applied and stay applied
        assert!(healthy.free.get(key.as_str()).await.unwrap().is_none());
        assert!(healthy.counter.get(key.as_str()).await.unwrap().is_none());
        assert!(healthy.block.get(key.as_str()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_handle_routes_failure_to_handler() {
        let clock = Arc::new(MockClock::new(SystemTime::now()));
        let healthy = counters(clock);
        let counters = CounterSet {
            free: Arc::new(FaultyStore::failing(healthy.free.clone(), StoreOp::Delete)),
            ..healthy
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let handler: StoreErrorHandler = Arc::new(move |failure| {
            assert!(failure.is_reset());
            assert_eq!(failure.key.as_deref(), Some("alice"));
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let handle = ResetHandle::new(
            ResetController::new(counters),
            BruteKey::derive([Some("alice")]),
            Some("alice".to_string()),
            None,
            handler,
        );

        // Swallowed by the handler
        assert!(handle.reset().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chain_runs_every_handle() {
        let clock = Arc::new(MockClock::new(SystemTime::now()));
        let first = counters(clock.clone());
        let second = counters(clock);
        let key_a = BruteKey::derive([Some("a")]);
        let key_b = BruteKey::derive([Some("b")]);
        seed(&first, &key_a).await;
        seed(&second, &key_b).await;

        let failing = CounterSet {
            counter: Arc::new(FaultyStore::failing(first.counter.clone(), StoreOp::Delete)),
            ..first.clone()
        };

        let mut chain = ResetChain::new();
        chain.push(ResetHandle::new(
            ResetController::new(failing),
            key_a.clone(),
            None,
            None,
            propagate_store_errors(),
        ));
        chain.push(ResetHandle::new(
            ResetController::new(second.clone()),
            key_b.clone(),
            None,
            None,
            propagate_store_errors(),
        ));
        assert_eq!(chain.len(), 2);

        let err = chain.reset_all().await.unwrap_err();
        assert!(matches!(err, BruteError::Store { message, .. } if message == "Cannot reset request count"));

        // The second handle ran despite the first failing
        assert!(is_cleared(&second, &key_b).await);
    }

    #[tokio::test]
    async fn test_empty_chain_succeeds() {
        assert!(ResetChain::new().reset_all().await.is_ok());
    }
}
