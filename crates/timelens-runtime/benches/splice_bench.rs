//! Benchmarks for sequence splice decomposition and snapshot reads.
//!
//! Run with: cargo bench -p timelens-runtime --bench splice_bench

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use timelens_runtime::{
    DeliveryMode, PropKey, ReadContext, Runtime, RuntimeConfig, Target, Value, Wrapper,
};

fn sequence(rt: &Runtime, len: i64) -> Wrapper {
    rt.wrap(&Target::sequence((0..len).map(Value::Int)))
}

fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default().with_delivery(DeliveryMode::Immediate))
}

// =============================================================================
// Splice shapes
// =============================================================================

fn bench_splice(c: &mut Criterion) {
    let mut group = c.benchmark_group("splice/decompose");

    for len in [16i64, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("insert_front", len), &len, |b, &len| {
            b.iter_batched(
                || {
                    let rt = runtime();
                    let w = sequence(&rt, len);
                    (rt, w)
                },
                |(_rt, w)| black_box(w.splice(0, 0, [Value::Int(-1)])),
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("replace_middle", len), &len, |b, &len| {
            b.iter_batched(
                || {
                    let rt = runtime();
                    let w = sequence(&rt, len);
                    (rt, w)
                },
                |(_rt, w)| {
                    let mid = (len / 2) as usize;
                    black_box(w.splice(mid, 1, [Value::Int(-1)]))
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_reverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("splice/reverse");

    for len in [16i64, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter_batched(
                || {
                    let rt = runtime();
                    let w = sequence(&rt, len);
                    (rt, w)
                },
                |(_rt, w)| black_box(w.reverse()),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// =============================================================================
// Historical reads
// =============================================================================

fn bench_snapshot_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot/read");
    let rt = runtime();
    let w = sequence(&rt, 256);
    let first = rt.create_snapshot();
    let mut held = vec![first.clone()];
    for i in 0..64 {
        let _ = w.set(PropKey::Index(i), -1);
        held.push(rt.create_snapshot());
    }

    group.bench_function("to_vec_oldest", |b| {
        b.iter(|| {
            rt.with_read_context(ReadContext::new().with_snapshot(first.clone()), || {
                black_box(w.to_vec())
            })
        })
    });

    group.bench_function("to_vec_live", |b| b.iter(|| black_box(w.to_vec())));

    group.finish();
    drop(held);
}

criterion_group!(benches, bench_splice, bench_reverse, bench_snapshot_read);
criterion_main!(benches);
