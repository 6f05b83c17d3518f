//! Interpreter benchmark suite for Fibra.
//!
//! Benchmarks the hot paths of the fiber interpreter:
//! - flat_map chains: continuation stack push/pop per step
//! - fork/join: fiber creation, scheduling and exit delivery
//! - STM commit: journal bookkeeping, validation and publish
//!
//! All benchmarks run on the lab runtime so numbers are free of thread
//! wake-up noise, except `threaded/*`.

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use fibra::effect::Effect;
use fibra::fiber::Fiber;
use fibra::lab::{LabConfig, LabRuntime};
use fibra::runtime::RuntimeBuilder;
use fibra::stm::TRef;
use std::convert::Infallible;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn lab() -> LabRuntime {
    LabRuntime::new(LabConfig::new(42).no_step_limit())
}

fn chain(depth: u64) -> Effect<u64> {
    (0..depth).fold(Effect::succeed(0), |acc, _| {
        acc.flat_map(|n| Effect::succeed(n + 1))
    })
}

fn recursive_count(n: u64) -> Effect<u64> {
    Effect::suspend(move || {
        if n == 0 {
            Effect::succeed(0)
        } else {
            recursive_count(n - 1).map(|m| m + 1)
        }
    })
}

// =============================================================================
// FLAT_MAP CHAINS
// =============================================================================

fn bench_flat_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter/flat_map");

    for depth in [100_u64, 1_000, 10_000] {
        let effect = chain(depth);
        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::new("chain", depth), &effect, |b, effect| {
            b.iter(|| black_box(lab().run(effect.clone())))
        });
    }

    group.bench_function("recursive_10k", |b| {
        let effect = recursive_count(10_000);
        b.iter(|| black_box(lab().run(effect.clone())))
    });

    group.finish();
}

// =============================================================================
// FORK / JOIN
// =============================================================================

fn bench_fork_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreter/fork_join");

    group.bench_function("single", |b| {
        let effect: Effect<u8> = Effect::<u8>::succeed(1)
            .fork()
            .flat_map(|fiber: Fiber<u8, Infallible>| fiber.join());
        b.iter(|| black_box(lab().run(effect.clone())))
    });

    for count in [10_u64, 100, 1_000] {
        group.throughput(Throughput::Elements(count));
        let effect: Effect<Vec<u64>> = Effect::for_each_par(0..count, Effect::succeed);
        group.bench_with_input(BenchmarkId::new("for_each_par", count), &effect, |b, effect| {
            b.iter(|| black_box(lab().run(effect.clone())))
        });
    }

    group.finish();
}

// =============================================================================
// STM
// =============================================================================

fn bench_stm(c: &mut Criterion) {
    let mut group = c.benchmark_group("stm/commit");

    group.bench_function("single_ref_update", |b| {
        let counter = TRef::new(0_u64);
        let effect: Effect<()> = counter.update(|n| n + 1).commit();
        let mut runtime = lab();
        b.iter(|| black_box(runtime.run(effect.clone())))
    });

    for refs in [2_usize, 8, 32] {
        let cells: Vec<TRef<u64>> = (0..refs).map(|_| TRef::new(0)).collect();
        let tx = cells
            .iter()
            .fold(fibra::stm::Stm::<(), Infallible>::unit(), |acc, cell| {
                acc.and_then(cell.update(|n| n + 1))
            });
        let effect = tx.commit();
        group.throughput(Throughput::Elements(refs as u64));
        group.bench_with_input(BenchmarkId::new("multi_ref", refs), &effect, |b, effect| {
            let mut runtime = lab();
            b.iter(|| black_box(runtime.run(effect.clone())))
        });
    }

    group.finish();
}

// =============================================================================
// THREADED
// =============================================================================

fn bench_threaded(c: &mut Criterion) {
    let mut group = c.benchmark_group("threaded/run_sync");
    let Ok(runtime) = RuntimeBuilder::new().worker_threads(4).build() else {
        return;
    };

    group.bench_function("succeed", |b| {
        let effect: Effect<u8> = Effect::succeed(1);
        b.iter(|| black_box(runtime.run_sync(effect.clone())))
    });

    group.bench_function("for_each_par_100", |b| {
        let effect: Effect<Vec<u64>> = Effect::for_each_par(0..100_u64, Effect::succeed);
        b.iter(|| black_box(runtime.run_sync(effect.clone())))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_flat_map,
    bench_fork_join,
    bench_stm,
    bench_threaded
);
criterion_main!(benches);
