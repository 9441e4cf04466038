use brute_throttle::infrastructure::mocks::{FaultyStore, MockClock, StoreOp};
use brute_throttle::{
    AttemptRequest, BruteError, BruteGuard, CounterOptions, CounterStore, KeySource,
    MemoryStoreFactory, MiddlewareOptions, StoreFactory,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 44));

fn start() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

fn guard(name: &str, clock: &Arc<MockClock>) -> BruteGuard {
    BruteGuard::builder(name)
        .with_free_retries(1)
        .with_min_wait(1_000)
        .with_max_wait(60_000)
        .with_clock(clock.clone())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_guard_reset_behaves_like_new_key() {
    let clock = Arc::new(MockClock::new(start()));
    let guard = guard("login", &clock);

    // Build up two recorded failures
    guard.prevent(AttemptRequest::new(IP)).await.unwrap();
    clock.advance(Duration::from_secs(1));
    guard.prevent(AttemptRequest::new(IP)).await.unwrap();
    assert!(!guard
        .prevent(AttemptRequest::new(IP))
        .await
        .unwrap()
        .is_proceed());

    guard.reset(Some(IP), None).await.unwrap();

    let fresh = guard.prevent(AttemptRequest::new(IP)).await.unwrap();
    assert!(fresh.into_proceed().unwrap().failure_recorded);
    let denied = guard
        .prevent(AttemptRequest::new(IP))
        .await
        .unwrap()
        .into_response()
        .unwrap();
    // First delay again, not the third
    assert_eq!(denied.headers()["retry-after"], "1");
}

#[tokio::test]
async fn test_reset_of_unknown_key_succeeds() {
    let clock = Arc::new(MockClock::new(start()));
    let guard = guard("login", &clock);

    assert!(guard.reset(Some(IP), Some("nobody")).await.is_ok());
}

#[tokio::test]
async fn test_chain_resets_every_guard() {
    let clock = Arc::new(MockClock::new(start()));
    let global = guard("global", &clock);
    let per_user = guard("per-user", &clock);
    let per_user = per_user.middleware(MiddlewareOptions {
        key: KeySource::Identity,
        ..Default::default()
    });

    let request = AttemptRequest::new(IP).with_identity("alice");
    let first = global
        .prevent(request.clone())
        .await
        .unwrap()
        .into_proceed()
        .unwrap();
    let second = per_user
        .prevent(request.with_resets(first.resets))
        .await
        .unwrap()
        .into_proceed()
        .unwrap();

    assert_eq!(second.resets.len(), 2);
    second.resets.reset_all().await.unwrap();

    // Both guards forgot the failure
    let again = AttemptRequest::new(IP).with_identity("alice");
    assert!(global.prevent(again.clone()).await.unwrap().is_proceed());
    assert!(per_user.prevent(again).await.unwrap().is_proceed());
}

#[derive(Debug)]
struct FailingDeletes(MemoryStoreFactory);

impl StoreFactory for FailingDeletes {
    fn create(&self, options: CounterOptions) -> Arc<dyn CounterStore> {
        Arc::new(FaultyStore::failing(self.0.create(options), StoreOp::Delete))
    }
}

#[tokio::test]
async fn test_guard_reset_failure_reaches_handler() {
    let clock = Arc::new(MockClock::new(start()));
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_by_handler = seen.clone();

    let guard = BruteGuard::builder("login")
        .with_clock(clock.clone())
        .with_store_factory(Arc::new(FailingDeletes(MemoryStoreFactory::new(clock))))
        .with_store_error_handler(move |failure| {
            assert_eq!(failure.message, "Cannot reset request count");
            assert_eq!(failure.key.as_deref(), Some("alice"));
            assert_eq!(failure.ip.as_deref(), Some("192.0.2.44"));
            seen_by_handler.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();

    assert!(guard.reset(Some(IP), Some("alice")).await.is_ok());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(guard.metrics().store_errors(), 1);
}

#[tokio::test]
async fn test_guard_reset_failure_propagates_by_default() {
    let clock = Arc::new(MockClock::new(start()));
    let guard = BruteGuard::builder("login")
        .with_clock(clock.clone())
        .with_store_factory(Arc::new(FailingDeletes(MemoryStoreFactory::new(clock))))
        .build()
        .unwrap();

    let err = guard.reset(Some(IP), Some("alice")).await.unwrap_err();
    match err {
        BruteError::Store { message, key, .. } => {
            assert_eq!(message, "Cannot reset request count");
            assert_eq!(key.as_deref(), Some("alice"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_attached_reset_failure_returned_to_caller() {
    let clock = Arc::new(MockClock::new(start()));
    let handled = Arc::new(AtomicUsize::new(0));
    let handled_by_handler = handled.clone();

    let guard = BruteGuard::builder("login")
        .with_clock(clock.clone())
        .with_store_factory(Arc::new(FailingDeletes(MemoryStoreFactory::new(clock))))
        .with_store_error_handler(move |_| {
            handled_by_handler.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();

    let proceed = guard
        .prevent(AttemptRequest::new(IP))
        .await
        .unwrap()
        .into_proceed()
        .unwrap();

    assert!(proceed.resets.reset_all().await.is_err());
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    // Still counted as a store failure of this guard
    assert_eq!(guard.metrics().store_errors(), 1);
}
