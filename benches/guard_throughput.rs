use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use tripwire::{
    CoordinatedGuard, Guard, GuardConfig, GuardRegistry, MemoryCoordinator, SharedGuard,
    StateSnapshot,
};

fn benchmark_guard_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard_throughput");
    group.throughput(Throughput::Elements(1));

    let mut guard = Guard::new("bench", GuardConfig::default());
    group.bench_function("guard_call_closed", |b| {
        b.iter(|| black_box(guard.call(|| Ok::<_, ()>(black_box(1u64)))).unwrap());
    });

    let mut open = Guard::new("bench-open", GuardConfig::default().with_failure_threshold(1));
    open.record_failure();
    group.bench_function("guard_call_rejected", |b| {
        b.iter(|| black_box(open.call(|| Ok::<_, ()>(1u64))).unwrap_err());
    });

    let shared = SharedGuard::new(Guard::new("bench-shared", GuardConfig::default()));
    group.bench_function("shared_guard_call", |b| {
        b.iter(|| black_box(shared.call(|| Ok::<_, ()>(1u64))).unwrap());
    });

    let coordinated = CoordinatedGuard::new(
        "bench-coordinated",
        GuardConfig::default(),
        Arc::new(MemoryCoordinator::new()),
    );
    group.bench_function("coordinated_guard_call", |b| {
        b.iter(|| black_box(coordinated.call(|| Ok::<_, ()>(1u64))).unwrap());
    });

    let registry = GuardRegistry::default();
    registry.get("bench-registry");
    group.bench_function("registry_lookup", |b| {
        b.iter(|| black_box(registry.get(black_box("bench-registry"))));
    });

    group.finish();
}

fn benchmark_snapshot_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_codec");

    let mut guard = Guard::new("bench-codec", GuardConfig::default().with_failure_threshold(1));
    guard.record_failure();
    let snapshot = guard.snapshot();
    let json = snapshot.to_json();

    group.bench_function("encode", |b| {
        b.iter(|| black_box(black_box(&snapshot).to_json()));
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(StateSnapshot::from_json(black_box(&json))).unwrap());
    });

    group.finish();
}

criterion_group!(benches, benchmark_guard_calls, benchmark_snapshot_codec);
criterion_main!(benches);
