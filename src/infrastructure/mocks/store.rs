//! Counter store doubles.

use crate::application::ports::{ConsumeError, CounterState, CounterStore, StoreError};
use crate::domain::policy::CounterOptions;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A `CounterStore` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `consume`
    Consume,
    /// `penalty`
    Penalty,
    /// `get`
    Get,
    /// `delete`
    Delete,
}

/// Store that fails selected operations and forwards the rest.
///
/// ```
/// use brute_throttle::infrastructure::mocks::{FaultyStore, MockClock, StoreOp};
/// use brute_throttle::infrastructure::memory_store::MemoryCounterStore;
/// use brute_throttle::application::ports::CounterStore;
/// use brute_throttle::domain::policy::CounterOptions;
/// use std::sync::Arc;
/// use std::time::SystemTime;
///
/// # block_on(async {
/// let inner = Arc::new(MemoryCounterStore::new(
///     CounterOptions::new("test", 1, 60),
///     Arc::new(MockClock::new(SystemTime::now())),
/// ));
/// let store = FaultyStore::failing(inner, StoreOp::Get);
///
/// assert!(store.get("k").await.is_err());
/// assert!(store.penalty("k", 1, None).await.is_ok());
/// # });
/// # fn block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug)]
pub struct FaultyStore {
    inner: Arc<dyn CounterStore>,
    failing: HashSet<StoreOp>,
    healthy: AtomicBool,
    failures: AtomicUsize,
}

impl FaultyStore {
    /// Fail only `op`.
    pub fn failing(inner: Arc<dyn CounterStore>, op: StoreOp) -> Self {
        Self::failing_ops(inner, [op])
    }

    /// Fail every operation in `ops`.
    pub fn failing_ops(inner: Arc<dyn CounterStore>, ops: impl IntoIterator<Item = StoreOp>) -> Self {
        Self {
            inner,
            failing: ops.into_iter().collect(),
            healthy: AtomicBool::new(false),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail every operation.
    pub fn always_failing(inner: Arc<dyn CounterStore>) -> Self {
        Self::failing_ops(
            inner,
            [StoreOp::Consume, StoreOp::Penalty, StoreOp::Get, StoreOp::Delete],
        )
    }

    /// Stop (or resume) injecting failures.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of failures injected so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        if self.healthy.load(Ordering::SeqCst) || !self.failing.contains(&op) {
            return Ok(());
        }
        self.failures.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Backend(format!("injected {:?} failure", op)))
    }
}

#[async_trait]
impl CounterStore for FaultyStore {
    async fn consume(&self, key: &str) -> Result<CounterState, ConsumeError> {
        self.check(StoreOp::Consume)?;
        self.inner.consume(key).await
    }

    async fn penalty(
        &self,
        key: &str,
        points: u32,
        custom_duration_secs: Option<u64>,
    ) -> Result<CounterState, StoreError> {
        self.check(StoreOp::Penalty)?;
        self.inner.penalty(key, points, custom_duration_secs).await
    }

    async fn get(&self, key: &str) -> Result<Option<CounterState>, StoreError> {
        self.check(StoreOp::Get)?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check(StoreOp::Delete)?;
        self.inner.delete(key).await
    }

    fn options(&self) -> &CounterOptions {
        self.inner.options()
    }
}

/// Store that yields to the executor before every operation.
///
/// Two futures joined on one task advance in lock step through it, which
/// makes interleavings such as "both read, then both write" reproducible.
#[derive(Debug)]
pub struct YieldingStore {
    inner: Arc<dyn CounterStore>,
}

impl YieldingStore {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn CounterStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CounterStore for YieldingStore {
    async fn consume(&self, key: &str) -> Result<CounterState, ConsumeError> {
        tokio::task::yield_now().await;
        self.inner.consume(key).await
    }

    async fn penalty(
        &self,
        key: &str,
        points: u32,
        custom_duration_secs: Option<u64>,
    ) -> Result<CounterState, StoreError> {
        tokio::task::yield_now().await;
        self.inner.penalty(key, points, custom_duration_secs).await
    }

    async fn get(&self, key: &str) -> Result<Option<CounterState>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.delete(key).await
    }

    fn options(&self) -> &CounterOptions {
        self.inner.options()
    }
}
