//! Scheduler fairness: operation budgets force cooperative yields without
//! losing updates.

#[macro_use]
mod common;

use common::*;
use fibra::effect::Effect;
use fibra::fiber::Fiber;
use fibra::fiber_ref::FiberRef;
use fibra::lab::{LabConfig, LabRuntime};
use fibra::sync::Ref;
use fibra::types::Exit;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::Arc;

const INCREMENTS: u32 = 10_000;

/// Increments `counter` `remaining` times, one step per recursive call.
fn count(counter: Ref<u32>, trail: Arc<Mutex<Vec<u8>>>, tag: u8, remaining: u32) -> Effect<()> {
    if remaining == 0 {
        return Effect::unit();
    }
    let t = Arc::clone(&trail);
    counter
        .update(|n| n + 1)
        .and_then(Effect::sync(move || t.lock().push(tag)))
        .flat_map(move |()| count(counter.clone(), Arc::clone(&trail), tag, remaining - 1))
}

fn switches(trail: &[u8]) -> usize {
    trail.windows(2).filter(|w| w[0] != w[1]).count()
}

fn two_counters(counter: &Ref<u32>, trail: &Arc<Mutex<Vec<u8>>>) -> Effect<u32> {
    let (c, t) = (counter.clone(), Arc::clone(trail));
    let result = counter.clone();
    count(counter.clone(), Arc::clone(trail), 1, INCREMENTS)
        .fork()
        .zip(Effect::suspend(move || count(c.clone(), Arc::clone(&t), 2, INCREMENTS)).fork())
        .flat_map(move |(a, b): (Fiber<(), Infallible>, Fiber<(), Infallible>)| {
            a.join().and_then(b.join()).and_then(result.get())
        })
}

#[test]
fn small_budget_interleaves_without_dropping_increments() {
    init_test_logging();
    test_phase!("small_budget_interleaves_without_dropping_increments");
    let counter = Ref::new(0_u32);
    let trail = Arc::new(Mutex::new(Vec::new()));
    let mut lab = LabRuntime::new(LabConfig::new(DEFAULT_TEST_SEED).max_ops_before_yield(16));
    let exit = lab.run(two_counters(&counter, &trail));
    assert_eq!(exit, Exit::succeed(2 * INCREMENTS));
    let switched = switches(&trail.lock());
    assert_with_log!(
        switched > 100,
        "fibers should alternate many times",
        "> 100",
        switched
    );
    test_complete!("small_budget_interleaves_without_dropping_increments", switches = switched);
}

#[test]
fn budget_set_through_fiber_ref_applies_locally() {
    init_test_logging();
    test_phase!("budget_set_through_fiber_ref_applies_locally");
    let counter = Ref::new(0_u32);
    let trail = Arc::new(Mutex::new(Vec::new()));
    let program = FiberRef::max_ops_before_yield().locally(8, two_counters(&counter, &trail));
    let exit = test_lab().run(program);
    assert_eq!(exit, Exit::succeed(2 * INCREMENTS));
    assert!(switches(&trail.lock()) > 100);
    test_complete!("budget_set_through_fiber_ref_applies_locally");
}

#[test]
fn large_budget_still_completes_both_fibers() {
    init_test_logging();
    test_phase!("large_budget_still_completes_both_fibers");
    let counter = Ref::new(0_u32);
    let trail = Arc::new(Mutex::new(Vec::new()));
    let mut lab = LabRuntime::new(LabConfig::new(1).max_ops_before_yield(1 << 20));
    assert_eq!(lab.run(two_counters(&counter, &trail)), Exit::succeed(2 * INCREMENTS));
    test_complete!("large_budget_still_completes_both_fibers");
}

#[test]
fn threaded_runtime_keeps_every_increment() {
    init_test_logging();
    test_phase!("threaded_runtime_keeps_every_increment");
    let runtime = fibra::runtime::RuntimeBuilder::new()
        .worker_threads(4)
        .max_ops_before_yield(16)
        .build()
        .expect("runtime builds");
    let counter = Ref::new(0_u32);
    let trail = Arc::new(Mutex::new(Vec::new()));
    let exit = runtime.run_sync(two_counters(&counter, &trail));
    assert_eq!(exit, Exit::succeed(2 * INCREMENTS));
    assert_eq!(trail.lock().len(), 2 * INCREMENTS as usize);
    test_complete!("threaded_runtime_keeps_every_increment");
}
