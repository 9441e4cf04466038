//! Host-facing brute-force guard.
//!
//! `BruteGuard` owns one set of free / block / counter stores and turns an
//! incoming `AttemptRequest` into a `Verdict`. A guard hands out any number
//! of `Middleware` values that differ in how the caller sub-key is found,
//! whether the client address is part of the key, and how denials are
//! answered.

use crate::application::errors::{
    propagate_store_errors, BruteError, StoreErrorHandler, StoreFailure,
};
use crate::application::gate::{AttemptGate, CounterSet, GateError};
use crate::application::metrics::GuardMetrics;
use crate::application::ports::{Clock, StoreFactory};
use crate::application::reset::{ResetChain, ResetController, ResetHandle};
use crate::domain::decision::GateDecision;
use crate::domain::key::BruteKey;
use crate::domain::policy::{Backend, ConfigError, PolicyConfig, ValidatedPolicy};
use crate::domain::schedule::DelaySchedule;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::fail::{DenialMark, DenyContext, FailAction, FailPolicy};
use crate::infrastructure::memory_store::MemoryStoreFactory;
use http::Response;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// One incoming attempt as seen by the guard.
#[derive(Debug, Clone, Default)]
pub struct AttemptRequest {
    /// Client address
    pub client_ip: Option<IpAddr>,
    /// Identity the host pulled out of the request (user name, e-mail, ...)
    pub identity: Option<String>,
    /// Reset handles attached by guards that already admitted this request
    pub resets: ResetChain,
}

impl AttemptRequest {
    /// Create a request from a client address.
    pub fn new(client_ip: impl Into<Option<IpAddr>>) -> Self {
        Self {
            client_ip: client_ip.into(),
            ..Default::default()
        }
    }

    /// Attach the identity used by `KeySource::Identity`.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Carry the reset chain returned by an earlier guard.
    pub fn with_resets(mut self, resets: ResetChain) -> Self {
        self.resets = resets;
        self
    }
}

/// Extracts the caller sub-key from a request.
pub type KeyExtractor = Arc<dyn Fn(&AttemptRequest) -> Option<String> + Send + Sync>;

/// Where the caller sub-key comes from.
#[derive(Clone, Default)]
pub enum KeySource {
    /// No sub-key: the client address and guard name alone
    #[default]
    None,
    /// The same sub-key for every request
    Fixed(String),
    /// `AttemptRequest::identity`
    Identity,
    /// A closure over the request
    Extract(KeyExtractor),
}

impl KeySource {
    /// Wrap a closure as a key source.
    pub fn extract<F>(f: F) -> Self
    where
        F: Fn(&AttemptRequest) -> Option<String> + Send + Sync + 'static,
    {
        KeySource::Extract(Arc::new(f))
    }

    fn resolve(&self, request: &AttemptRequest) -> Option<String> {
        match self {
            KeySource::None => None,
            KeySource::Fixed(key) => Some(key.clone()),
            KeySource::Identity => request.identity.clone(),
            KeySource::Extract(f) => f(request),
        }
    }
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::None => f.write_str("None"),
            KeySource::Fixed(key) => f.debug_tuple("Fixed").field(key).finish(),
            KeySource::Identity => f.write_str("Identity"),
            KeySource::Extract(_) => f.debug_tuple("Extract").field(&"<fn>").finish(),
        }
    }
}

/// Per-middleware options.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareOptions {
    /// Where the sub-key comes from
    pub key: KeySource,
    /// Leave the client address out of the key
    pub ignore_ip: bool,
    /// Overrides the guard's fail policy
    pub fail_policy: Option<FailPolicy>,
}

/// An admitted request.
#[derive(Debug)]
pub struct Proceed {
    /// Reset handles to run once the attempt succeeded
    pub resets: ResetChain,
    /// Whether this attempt was counted as a failure
    pub failure_recorded: bool,
    /// Set when a `Mark` fail policy let a denied request through
    pub mark: Option<DenialMark>,
}

/// Outcome of guarding a request.
#[derive(Debug)]
pub enum Verdict {
    /// Let the request through
    Proceed(Proceed),
    /// Answer with this response instead
    Respond(Response<String>),
    /// A store failure was swallowed by the error handler; the guard
    /// neither admits nor answers the request
    Halted,
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_proceed(&self) -> bool {
        matches!(self, Verdict::Proceed(_))
    }

    /// The admitted request, if any.
    pub fn into_proceed(self) -> Option<Proceed> {
        match self {
            Verdict::Proceed(p) => Some(p),
            _ => None,
        }
    }

    /// The response, if the request was answered.
    pub fn into_response(self) -> Option<Response<String>> {
        match self {
            Verdict::Respond(r) => Some(r),
            _ => None,
        }
    }
}

struct GuardInner {
    name: String,
    policy: ValidatedPolicy,
    gate: AttemptGate,
    resets: ResetController,
    fail_policy: FailPolicy,
    on_store_error: StoreErrorHandler,
    clock: Arc<dyn Clock>,
    metrics: GuardMetrics,
}

/// Brute-force protection for one kind of attempt.
///
/// Cloning is cheap; clones share stores and metrics.
#[derive(Clone)]
pub struct BruteGuard {
    inner: Arc<GuardInner>,
}

impl std::fmt::Debug for BruteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BruteGuard")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy)
            .field("fail_policy", &self.inner.fail_policy)
            .finish_non_exhaustive()
    }
}

/// Builder for `BruteGuard`.
pub struct BruteGuardBuilder {
    name: String,
    config: PolicyConfig,
    fail_policy: FailPolicy,
    on_store_error: StoreErrorHandler,
    clock: Option<Arc<dyn Clock>>,
    store_factory: Option<Arc<dyn StoreFactory>>,
}

impl BruteGuardBuilder {
    /// Replace the whole policy configuration.
    pub fn with_config(mut self, config: PolicyConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of attempts allowed before delays start.
    pub fn with_free_retries(mut self, free_retries: u32) -> Self {
        self.config.free_retries = free_retries;
        self
    }

    /// Set the first delay in milliseconds.
    pub fn with_min_wait(mut self, min_wait_ms: u64) -> Self {
        self.config.min_wait_ms = min_wait_ms;
        self
    }

    /// Set the longest delay in milliseconds.
    pub fn with_max_wait(mut self, max_wait_ms: u64) -> Self {
        self.config.max_wait_ms = max_wait_ms;
        self
    }

    /// Set how long failures are remembered, in seconds.
    pub fn with_lifetime(mut self, lifetime_secs: u64) -> Self {
        self.config.lifetime_secs = Some(lifetime_secs);
        self
    }

    /// Whether admitted requests carry a reset handle.
    pub fn with_attach_reset(mut self, attach: bool) -> Self {
        self.config.attach_reset_to_request = attach;
        self
    }

    /// Set the default fail policy.
    pub fn with_fail_policy(mut self, policy: FailPolicy) -> Self {
        self.fail_policy = policy;
        self
    }

    /// Set the store error handler.
    pub fn with_store_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(StoreFailure) -> Result<(), BruteError> + Send + Sync + 'static,
    {
        self.on_store_error = Arc::new(handler);
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Inject the store backend.
    ///
    /// Required for `Backend::Redis`. Without it the memory backend creates
    /// its own process-local stores.
    pub fn with_store_factory(mut self, factory: Arc<dyn StoreFactory>) -> Self {
        self.store_factory = Some(factory);
        self
    }

    /// Build the guard.
    ///
    /// # Errors
    /// Returns `ConfigError` if the policy is invalid or the configured
    /// backend needs a store factory that was not provided.
    pub fn build(self) -> Result<BruteGuard, ConfigError> {
        let policy = self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        let factory: Arc<dyn StoreFactory> = match (self.store_factory, policy.backend()) {
            (Some(factory), _) => factory,
            (None, Backend::Memory) => Arc::new(MemoryStoreFactory::new(Arc::clone(&clock))),
            (None, backend) => return Err(ConfigError::MissingStoreFactory(backend)),
        };

        let counters = CounterSet {
            free: factory.create(policy.free_options()),
            block: factory.create(policy.block_options()),
            counter: factory.create(policy.counter_options()),
        };

        Ok(BruteGuard {
            inner: Arc::new(GuardInner {
                name: self.name,
                gate: AttemptGate::new(counters.clone(), &policy, Arc::clone(&clock)),
                resets: ResetController::new(counters),
                policy,
                fail_policy: self.fail_policy,
                on_store_error: self.on_store_error,
                clock,
                metrics: GuardMetrics::new(),
            }),
        })
    }
}

impl BruteGuard {
    /// Start building a guard.
    ///
    /// `name` is part of every derived key, so guards with different names
    /// never share counters even on a shared store.
    pub fn builder(name: impl Into<String>) -> BruteGuardBuilder {
        BruteGuardBuilder {
            name: name.into(),
            config: PolicyConfig::default(),
            fail_policy: FailPolicy::default(),
            on_store_error: propagate_store_errors(),
            clock: None,
            store_factory: None,
        }
    }

    /// Guard name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The validated policy in use.
    pub fn policy(&self) -> &ValidatedPolicy {
        &self.inner.policy
    }

    /// The delay schedule in use.
    pub fn schedule(&self) -> &DelaySchedule {
        self.inner.gate.schedule()
    }

    /// Outcome counters.
    pub fn metrics(&self) -> &GuardMetrics {
        &self.inner.metrics
    }

    /// Create a middleware with its own key source and fail policy.
    pub fn middleware(&self, options: MiddlewareOptions) -> Middleware {
        Middleware {
            guard: self.clone(),
            options,
        }
    }

    /// Guard a request with default middleware options.
    ///
    /// # Errors
    /// See [`Middleware::prevent`].
    pub async fn prevent(&self, request: AttemptRequest) -> Result<Verdict, BruteError> {
        self.middleware(MiddlewareOptions::default())
            .prevent(request)
            .await
    }

    /// Derive the key a middleware would use for `ip` and `key`.
    pub fn derive_key(&self, ip: Option<IpAddr>, key: Option<&str>) -> BruteKey {
        let ip = ip.map(|ip| ip.to_string());
        BruteKey::derive([ip.as_deref(), Some(self.inner.name.as_str()), key])
    }

    /// Clear the counters for a client address and sub-key.
    ///
    /// Pass `None` for `ip` to reset keys guarded with `ignore_ip`.
    ///
    /// # Errors
    /// Store failures go through the store error handler; whatever it
    /// returns is returned here.
    pub async fn reset(&self, ip: Option<IpAddr>, key: Option<&str>) -> Result<(), BruteError> {
        let handle = ResetHandle::new(
            self.inner.resets.clone(),
            self.derive_key(ip, key),
            key.map(str::to_string),
            ip.map(|ip| ip.to_string()),
            self.report_to_handler(),
        );
        handle.reset().await
    }

    /// The configured store error handler, logging and counting first.
    fn report_to_handler(&self) -> StoreErrorHandler {
        self.reporting(Arc::clone(&self.inner.on_store_error))
    }

    /// Wrap `handler` so failures are logged and counted before it runs.
    fn reporting(&self, handler: StoreErrorHandler) -> StoreErrorHandler {
        let guard = self.inner.name.clone();
        let metrics = self.inner.metrics.clone();

        Arc::new(move |failure: StoreFailure| {
            metrics.record_store_error();
            warn!(
                guard = %guard,
                key = failure.key.as_deref().unwrap_or(""),
                ip = failure.ip.as_deref().unwrap_or(""),
                error = %failure.source,
                "{}",
                failure.message
            );
            handler(failure)
        })
    }
}

/// A guard bound to one set of middleware options.
#[derive(Debug, Clone)]
pub struct Middleware {
    guard: BruteGuard,
    options: MiddlewareOptions,
}

impl Middleware {
    /// The guard behind this middleware.
    pub fn guard(&self) -> &BruteGuard {
        &self.guard
    }

    /// Decide what happens to `request`.
    ///
    /// When the guard attaches resets, an admitted request carries the
    /// incoming reset chain plus a handle for this guard's key. Those handles
    /// log and count failures, then return them to their caller instead of
    /// the store error handler.
    ///
    /// # Errors
    /// A store failure is passed to the store error handler. If the handler
    /// returns an error it is returned here; if it swallows the failure the
    /// verdict is `Verdict::Halted`.
    pub async fn prevent(&self, request: AttemptRequest) -> Result<Verdict, BruteError> {
        let inner = &self.guard.inner;

        let sub_key = self.options.key.resolve(&request);
        let client_ip = if self.options.ignore_ip {
            None
        } else {
            request.client_ip
        };
        let key = self.guard.derive_key(client_ip, sub_key.as_deref());
        let ip = client_ip.map(|ip| ip.to_string());

        let mut resets = request.resets;
        if inner.policy.attach_reset_to_request() {
            resets.push(ResetHandle::new(
                inner.resets.clone(),
                key.clone(),
                sub_key.clone(),
                ip.clone(),
                self.guard.reporting(propagate_store_errors()),
            ));
        }

        let decision = match inner.gate.check(&key).await {
            Ok(decision) => decision,
            Err(GateError { step, source }) => {
                debug!(guard = %inner.name, ?step, "Store failed while gating");
                let handler = self.guard.report_to_handler();
                handler(StoreFailure::increment(source, sub_key, ip))?;
                return Ok(Verdict::Halted);
            }
        };

        match decision {
            GateDecision::Allow => {
                inner.metrics.record_allowed();
                debug!(guard = %inner.name, "Attempt allowed");
                Ok(Verdict::Proceed(Proceed {
                    resets,
                    failure_recorded: false,
                    mark: None,
                }))
            }
            GateDecision::AllowAndRecordFailure => {
                inner.metrics.record_failure();
                debug!(guard = %inner.name, "Attempt allowed, failure recorded");
                Ok(Verdict::Proceed(Proceed {
                    resets,
                    failure_recorded: true,
                    mark: None,
                }))
            }
            GateDecision::Deny { retry_not_before } => {
                inner.metrics.record_denied();
                self.deny(&key, sub_key.as_deref(), client_ip, retry_not_before, resets)
            }
        }
    }

    fn deny(
        &self,
        key: &BruteKey,
        sub_key: Option<&str>,
        client_ip: Option<IpAddr>,
        retry_not_before: SystemTime,
        resets: ResetChain,
    ) -> Result<Verdict, BruteError> {
        let inner = &self.guard.inner;
        let ctx = DenyContext {
            guard: &inner.name,
            key,
            sub_key,
            client_ip,
            now: inner.clock.now(),
            retry_not_before,
        };
        debug!(
            guard = %inner.name,
            retry_after_secs = ctx.retry_after_secs(),
            "Attempt denied"
        );

        let policy = self
            .options
            .fail_policy
            .as_ref()
            .unwrap_or(&inner.fail_policy);

        Ok(match policy.apply(&ctx) {
            FailAction::Respond(response) => Verdict::Respond(response),
            FailAction::Mark(mark) => Verdict::Proceed(Proceed {
                resets,
                failure_recorded: false,
                mark: Some(mark),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::{FaultyStore, MockCaptureLayer, MockClock, StoreOp};
    use crate::application::ports::CounterStore;
    use crate::domain::policy::CounterOptions;
    use http::StatusCode;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    fn start() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn guard(clock: Arc<MockClock>) -> BruteGuard {
        BruteGuard::builder("login")
            .with_free_retries(2)
            .with_min_wait(1_000)
            .with_max_wait(60_000)
            .with_clock(clock)
            .build()
            .unwrap()
    }

    /// Factory that wraps every namespace in a `FaultyStore`.
    #[derive(Debug)]
    struct FaultyFactory {
        inner: MemoryStoreFactory,
        op: StoreOp,
    }

    impl StoreFactory for FaultyFactory {
        fn create(&self, options: CounterOptions) -> Arc<dyn CounterStore> {
            Arc::new(FaultyStore::failing(self.inner.create(options), self.op))
        }
    }

    #[test]
    fn test_redis_backend_requires_factory() {
        let err = BruteGuard::builder("login")
            .with_config(PolicyConfig {
                backend: Backend::Redis,
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingStoreFactory(Backend::Redis));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let err = BruteGuard::builder("login")
            .with_min_wait(10_000)
            .with_max_wait(1_000)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MaxWaitBelowMinWait { .. }));
    }

    #[tokio::test]
    async fn test_third_attempt_gets_429() {
        let clock = Arc::new(MockClock::new(start()));
        let guard = guard(clock);

        let first = guard.prevent(AttemptRequest::new(IP)).await.unwrap();
        assert!(!first.into_proceed().unwrap().failure_recorded);

        let second = guard.prevent(AttemptRequest::new(IP)).await.unwrap();
        assert!(second.into_proceed().unwrap().failure_recorded);

        let third = guard.prevent(AttemptRequest::new(IP)).await.unwrap();
        let response = third.into_response().unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "1");

        let snapshot = guard.metrics().snapshot();
        assert_eq!(snapshot.allowed, 1);
        assert_eq!(snapshot.failures_recorded, 1);
        assert_eq!(snapshot.denied, 1);
    }

    #[tokio::test]
    async fn test_ignore_ip_shares_counters_across_addresses() {
        let clock = Arc::new(MockClock::new(start()));
        let guard = guard(clock);
        let mw = guard.middleware(MiddlewareOptions {
            key: KeySource::Fixed("alice".to_string()),
            ignore_ip: true,
            fail_policy: None,
        });

        let other = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7));
        assert!(mw.prevent(AttemptRequest::new(IP)).await.unwrap().is_proceed());
        assert!(mw.prevent(AttemptRequest::new(other)).await.unwrap().is_proceed());
        assert!(!mw.prevent(AttemptRequest::new(IP)).await.unwrap().is_proceed());

        // Reset without the address clears the shared key
        guard.reset(None, Some("alice")).await.unwrap();
        let after = mw.prevent(AttemptRequest::new(other)).await.unwrap();
        assert!(!after.into_proceed().unwrap().failure_recorded);
    }

    #[tokio::test]
    async fn test_middleware_fail_policy_overrides_guard() {
        let clock = Arc::new(MockClock::new(start()));
        let guard = guard(clock);
        let mw = guard.middleware(MiddlewareOptions {
            fail_policy: Some(FailPolicy::Forbidden),
            ..Default::default()
        });

        mw.prevent(AttemptRequest::new(IP)).await.unwrap();
        mw.prevent(AttemptRequest::new(IP)).await.unwrap();
        let response = mw
            .prevent(AttemptRequest::new(IP))
            .await
            .unwrap()
            .into_response()
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_swallowed_store_error_halts() {
        let clock = Arc::new(MockClock::new(start()));
        let factory = FaultyFactory {
            inner: MemoryStoreFactory::new(clock.clone()),
            op: StoreOp::Consume,
        };
        let guard = BruteGuard::builder("login")
            .with_clock(clock)
            .with_store_factory(Arc::new(factory))
            .with_store_error_handler(|_| Ok(()))
            .build()
            .unwrap();

        let capture = MockCaptureLayer::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let _default = tracing::subscriber::set_default(subscriber);

        let verdict = guard
            .prevent(AttemptRequest::new(IP).with_identity("alice"))
            .await
            .unwrap();
        assert!(matches!(verdict, Verdict::Halted));
        assert_eq!(guard.metrics().store_errors(), 1);

        let warnings = capture.at_level(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "Cannot increment request count");
        assert_eq!(warnings[0].field("guard"), Some("login"));
        assert_eq!(warnings[0].field("ip"), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_attached_reset_clears_key() {
        let clock = Arc::new(MockClock::new(start()));
        let guard = guard(clock);
        let mw = guard.middleware(MiddlewareOptions {
            key: KeySource::Identity,
            ..Default::default()
        });
        let request = || AttemptRequest::new(IP).with_identity("alice");

        mw.prevent(request()).await.unwrap();
        let proceed = mw.prevent(request()).await.unwrap().into_proceed().unwrap();
        assert!(proceed.failure_recorded);
        assert_eq!(proceed.resets.len(), 1);

        proceed.resets.reset_all().await.unwrap();

        let fresh = mw.prevent(request()).await.unwrap().into_proceed().unwrap();
        assert!(!fresh.failure_recorded);
    }

    #[tokio::test]
    async fn test_attached_reset_failure_is_counted_and_logged() {
        let clock = Arc::new(MockClock::new(start()));
        let factory = FaultyFactory {
            inner: MemoryStoreFactory::new(clock.clone()),
            op: StoreOp::Delete,
        };
        let guard = BruteGuard::builder("login")
            .with_clock(clock)
            .with_store_factory(Arc::new(factory))
            .build()
            .unwrap();

        let capture = MockCaptureLayer::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let _default = tracing::subscriber::set_default(subscriber);

        let proceed = guard
            .prevent(AttemptRequest::new(IP).with_identity("alice"))
            .await
            .unwrap()
            .into_proceed()
            .unwrap();
        let err = proceed.resets.reset_all().await.unwrap_err();

        assert!(matches!(err, BruteError::Store { .. }));
        assert_eq!(guard.metrics().store_errors(), 1);

        let warnings = capture.at_level(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "Cannot reset request count");
        assert_eq!(warnings[0].field("ip"), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_no_reset_attached_when_disabled() {
        let clock = Arc::new(MockClock::new(start()));
        let guard = BruteGuard::builder("login")
            .with_attach_reset(false)
            .with_clock(clock)
            .build()
            .unwrap();

        let proceed = guard
            .prevent(AttemptRequest::new(IP))
            .await
            .unwrap()
            .into_proceed()
            .unwrap();
        assert!(proceed.resets.is_empty());
    }
}
