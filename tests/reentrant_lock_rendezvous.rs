//! Reentrant lock scenarios coordinated through `Deferred` rendezvous
//! points.

#[macro_use]
mod common;

use common::*;
use fibra::effect::Effect;
use fibra::fiber::Fiber;
use fibra::stm::TReentrantLock;
use fibra::sync::{Deferred, Ref};
use fibra::types::Exit;
use std::convert::Infallible;

type Gate = Deferred<(), Infallible>;

#[test]
fn writer_suspends_until_reader_releases() {
    init_test_logging();
    test_phase!("writer_suspends_until_reader_releases");
    let lock = TReentrantLock::new();
    let reader_holds: Gate = Deferred::new();
    let reader_may_release: Gate = Deferred::new();
    let writer_acquired = Ref::new(false);

    let reader = lock.with_read_lock(
        reader_holds
            .succeed::<Infallible>(())
            .and_then(reader_may_release.await_()),
    );
    let writer = lock.with_write_lock(writer_acquired.set(true));

    let (holds, release, acquired) = (
        reader_holds.clone(),
        reader_may_release.clone(),
        writer_acquired.clone(),
    );
    let program: Effect<(bool, bool)> = reader.fork().flat_map(move |a: Fiber<(), Infallible>| {
        let (release, acquired, writer) = (release.clone(), acquired.clone(), writer.clone());
        holds.await_().and_then(writer.fork()).flat_map(move |b: Fiber<(), Infallible>| {
            let (release, acquired, a) = (release.clone(), acquired.clone(), a.clone());
            Effect::<(), Infallible>::yield_now()
                .repeat_n(20)
                .and_then(acquired.get())
                .flat_map(move |before_release| {
                    release
                        .succeed(())
                        .and_then(a.join())
                        .and_then(b.join())
                        .and_then(acquired.get())
                        .map(move |after| (before_release, after))
                })
        })
    });
    let mut lab = test_lab();
    assert_eq!(lab.run(program), Exit::succeed((false, true)));
    assert_eq!(lab.run(lock.is_locked::<Infallible>().commit()), Exit::succeed(false));
    test_complete!("writer_suspends_until_reader_releases");
}

#[test]
fn readers_share_while_no_writer_holds() {
    init_test_logging();
    test_phase!("readers_share_while_no_writer_holds");
    let lock = TReentrantLock::new();
    let both_in: Gate = Deferred::new();
    let l = lock.clone();
    let gate = both_in.clone();
    let read_one = move || {
        let (l, gate) = (l.clone(), gate.clone());
        let count = l.read_locks().commit();
        lock_and_wait(&l, count, gate)
    };
    let (first, second) = (read_one(), read_one());
    let observed = lock.clone();
    let program: Effect<usize> = first
        .zip_par(second)
        .fork()
        .flat_map(move |readers: Fiber<(usize, usize), Infallible>| {
            let both_in = both_in.clone();
            Effect::<(), Infallible>::yield_now()
                .repeat_n(5)
                .and_then(observed.read_locks().commit())
                .flat_map(move |held| {
                    both_in
                        .succeed(())
                        .and_then(readers.join())
                        .map(move |_| held)
                })
        });
    assert_eq!(test_lab().run(program), Exit::succeed(2));
    test_complete!("readers_share_while_no_writer_holds");
}

fn lock_and_wait(lock: &TReentrantLock, count: Effect<usize>, gate: Gate) -> Effect<usize> {
    lock.with_read_lock(count.zip_left(gate.await_()))
}

#[test]
fn write_lock_is_reentrant_across_nested_scopes() {
    init_test_logging();
    test_phase!("write_lock_is_reentrant_across_nested_scopes");
    let lock = TReentrantLock::new();
    let (l1, l2) = (lock.clone(), lock.clone());
    let inner = l1.with_write_lock(l2.write_locks().commit());
    let program: Effect<(usize, usize)> = lock
        .with_write_lock(inner)
        .zip(lock.write_locks().commit());
    assert_eq!(test_lab().run(program), Exit::succeed((2, 0)));
    test_complete!("write_lock_is_reentrant_across_nested_scopes");
}

#[test]
fn waiting_writer_can_be_interrupted() {
    init_test_logging();
    test_phase!("waiting_writer_can_be_interrupted");
    let lock = TReentrantLock::new();
    let hold: Gate = Deferred::new();
    let release = hold.clone();
    let reader = lock.with_read_lock(hold.await_());
    let writer = lock.with_write_lock(Effect::<(), Infallible>::unit());
    let program: Effect<bool> = reader.fork().flat_map(move |a: Fiber<(), Infallible>| {
        let (writer, release) = (writer.clone(), release.clone());
        Effect::<(), Infallible>::yield_now()
            .and_then(writer.fork())
            .flat_map(move |b: Fiber<(), Infallible>| {
                let (release, a) = (release.clone(), a.clone());
                Effect::<(), Infallible>::yield_now()
                    .and_then(b.interrupt())
                    .flat_map(move |exit| {
                        release
                            .succeed(())
                            .and_then(a.join())
                            .map(move |()| exit.is_interrupted())
                    })
            })
    });
    let mut lab = test_lab();
    assert_eq!(lab.run(program), Exit::succeed(true));
    assert_eq!(lab.run(lock.is_locked::<Infallible>().commit()), Exit::succeed(false));
    test_complete!("waiting_writer_can_be_interrupted");
}
