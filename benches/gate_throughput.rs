use brute_throttle::{
    AttemptGate, AttemptRequest, BruteGuard, BruteKey, CounterSet, DelaySchedule,
    MemoryStoreFactory, PolicyConfig, StoreFactory, SystemClock,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Benchmark key derivation speed
fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");

    group.bench_function("ip_name_key", |b| {
        b.iter(|| {
            BruteKey::derive([
                Some(black_box("203.0.113.9")),
                Some(black_box("login")),
                Some(black_box("alice@example.com")),
            ])
        })
    });

    group.bench_function("long_identity", |b| {
        let identity = "x".repeat(4096);
        b.iter(|| BruteKey::derive([Some("login"), Some(black_box(identity.as_str()))]))
    });

    group.finish();
}

/// Benchmark schedule construction and lookup
fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");

    group.bench_function("build_default", |b| {
        b.iter(|| DelaySchedule::build(black_box(500), black_box(900_000)))
    });

    let schedule = DelaySchedule::build(500, 900_000);
    group.bench_function("delay_for_attempt", |b| {
        b.iter(|| schedule.delay_for_attempt(black_box(17)))
    });

    group.finish();
}

fn memory_gate(free_retries: u32) -> AttemptGate {
    let policy = PolicyConfig {
        free_retries,
        min_wait_ms: 900_000,
        ..Default::default()
    }
    .validate()
    .unwrap();
    let clock = Arc::new(SystemClock::new());
    let factory = MemoryStoreFactory::new(clock.clone());
    let counters = CounterSet {
        free: factory.create(policy.free_options()),
        block: factory.create(policy.block_options()),
        counter: factory.create(policy.counter_options()),
    };
    AttemptGate::new(counters, &policy, clock)
}

/// Benchmark gate decisions on the memory store
fn bench_gate(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("gate_check");
    group.throughput(Throughput::Elements(1));

    // Free budget never runs out
    let gate = memory_gate(u32::MAX);
    let key = BruteKey::derive([Some("allowed")]);
    group.bench_function("allow", |b| {
        b.to_async(&runtime).iter(|| gate.check(black_box(&key)))
    });

    // Locked out after the first attempt
    let gate = memory_gate(0);
    let key = BruteKey::derive([Some("denied")]);
    runtime.block_on(gate.check(&key)).unwrap();
    group.bench_function("deny", |b| {
        b.to_async(&runtime).iter(|| gate.check(black_box(&key)))
    });

    group.finish();
}

/// Benchmark the full guard path across many distinct clients
fn bench_guard_distinct_clients(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("guard_prevent");

    for clients in [1u32, 100, 10_000] {
        let guard = BruteGuard::builder("bench")
            .with_free_retries(u32::MAX)
            .build()
            .unwrap();
        let ips: Vec<IpAddr> = (0..clients)
            .map(|i| IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i)))
            .collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(clients), &ips, |b, ips| {
            let mut next = 0usize;
            b.to_async(&runtime).iter(|| {
                let ip = ips[next % ips.len()];
                next = next.wrapping_add(1);
                let guard = guard.clone();
                async move { guard.prevent(AttemptRequest::new(ip)).await.unwrap() }
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_key_derivation,
    bench_schedule,
    bench_gate,
    bench_guard_distinct_clients
);
criterion_main!(benches);
