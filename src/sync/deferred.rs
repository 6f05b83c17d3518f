//! A one-shot cell fibers can wait on.
//!
//! [`Deferred`] starts empty and is completed once with an [`Exit`]. Fibers
//! that [`await_`](Deferred::await_) it before completion suspend without
//! holding a worker; completing wakes all of them in arrival order.
//!
//! # Cancel Safety
//!
//! - Interrupting a waiter removes it from the wait list.
//! - Completing twice is a no-op that reports `false`.

use crate::effect::{Data, Effect, Resume};
use crate::types::{Cause, Exit};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

enum State<A, E> {
    Pending {
        waiters: Vec<(u64, Resume<A, E>)>,
        next_key: u64,
    },
    Done(Exit<A, E>),
}

/// A value that becomes available exactly once.
pub struct Deferred<A, E = std::convert::Infallible> {
    state: Arc<Mutex<State<A, E>>>,
}

impl<A, E> Clone for Deferred<A, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<A, E> fmt::Debug for Deferred<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            State::Pending { waiters, .. } => format!("Pending({} waiters)", waiters.len()),
            State::Done(_) => "Done".to_string(),
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<A: Data, E: Data> Default for Deferred<A, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Data, E: Data> Deferred<A, E> {
    /// Creates an empty deferred outside of any fiber.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending {
                waiters: Vec::new(),
                next_key: 0,
            })),
        }
    }

    /// Creates an empty deferred.
    pub fn make<E2: Data>() -> Effect<Self, E2> {
        Effect::sync(Self::new)
    }

    /// Completes with `exit`. Succeeds with `false` if already completed.
    pub fn complete<E2: Data>(&self, exit: Exit<A, E>) -> Effect<bool, E2> {
        let this = self.clone();
        Effect::sync(move || this.complete_now(exit.clone()))
    }

    /// Completes with a value.
    pub fn succeed<E2: Data>(&self, a: A) -> Effect<bool, E2> {
        self.complete(Exit::succeed(a))
    }

    /// Completes with a typed failure.
    pub fn fail<E2: Data>(&self, e: E) -> Effect<bool, E2> {
        self.complete(Exit::fail(e))
    }

    /// Completes with an arbitrary cause.
    pub fn fail_cause<E2: Data>(&self, cause: Cause<E>) -> Effect<bool, E2> {
        self.complete(Exit::fail_cause(cause))
    }

    /// Waits for completion and continues with the stored outcome.
    pub fn await_(&self) -> Effect<A, E> {
        let state = Arc::clone(&self.state);
        Effect::async_interruptible(move |resume: Resume<A, E>| {
            let key = {
                let mut guard = state.lock();
                match &mut *guard {
                    State::Done(exit) => {
                        let exit = exit.clone();
                        drop(guard);
                        resume.resume(Effect::from_exit(exit));
                        return None;
                    }
                    State::Pending { waiters, next_key } => {
                        let key = *next_key;
                        *next_key += 1;
                        waiters.push((key, resume));
                        key
                    }
                }
            };
            let state = Arc::clone(&state);
            Some(Effect::sync(move || {
                if let State::Pending { waiters, .. } = &mut *state.lock() {
                    waiters.retain(|(k, _)| *k != key);
                }
            }))
        })
    }

    /// The outcome, if completed.
    pub fn poll<E2: Data>(&self) -> Effect<Option<Exit<A, E>>, E2> {
        let state = Arc::clone(&self.state);
        Effect::sync(move || match &*state.lock() {
            State::Done(exit) => Some(exit.clone()),
            State::Pending { .. } => None,
        })
    }

    /// Whether the deferred has been completed.
    pub fn is_done<E2: Data>(&self) -> Effect<bool, E2> {
        let state = Arc::clone(&self.state);
        Effect::sync(move || matches!(&*state.lock(), State::Done(_)))
    }

    fn complete_now(&self, exit: Exit<A, E>) -> bool {
        let waiters = {
            let mut guard = self.state.lock();
            match &mut *guard {
                State::Done(_) => return false,
                State::Pending { waiters, .. } => {
                    let waiters = std::mem::take(waiters);
                    *guard = State::Done(exit.clone());
                    waiters
                }
            }
        };
        for (_, resume) in waiters {
            resume.resume(Effect::from_exit(exit.clone()));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::Fiber;
    use crate::lab::LabRuntime;
    use crate::test_utils::init_test_logging;
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn waiters_resume_with_the_completed_value() {
        init_test("waiters_resume_with_the_completed_value");
        let program: Effect<(u32, u32, bool)> =
            Deferred::<u32, ()>::make().flat_map(|deferred: Deferred<u32, ()>| {
                let (d1, d2, d3) = (deferred.clone(), deferred.clone(), deferred.clone());
                deferred
                    .await_()
                    .zip_par(d1.await_())
                    .fork::<()>()
                    .flat_map(move |waiters| {
                        let d2 = d2.clone();
                        let d3 = d3.clone();
                        Effect::<(), ()>::sleep(Duration::from_millis(1))
                            .and_then(d2.succeed(5))
                            .and_then(waiters.join())
                            .zip(d3.succeed(6))
                            .map(|((a, b), second)| (a, b, second))
                    })
                    .catch_all(|()| Effect::succeed((0, 0, true)))
            });
        assert_eq!(
            LabRuntime::default().run(program),
            Exit::succeed((5, 5, false))
        );
        crate::test_complete!("waiters_resume_with_the_completed_value");
    }

    #[test]
    fn await_after_completion_returns_immediately() {
        init_test("await_after_completion_returns_immediately");
        let deferred: Deferred<&str, &str> = Deferred::new();
        let program = deferred
            .fail::<&str>("closed")
            .and_then(deferred.is_done())
            .flat_map(move |done| {
                assert!(done);
                deferred.await_()
            });
        assert_eq!(LabRuntime::default().run(program), Exit::fail("closed"));
        crate::test_complete!("await_after_completion_returns_immediately");
    }

    #[test]
    fn interrupted_waiter_leaves_the_wait_list() {
        init_test("interrupted_waiter_leaves_the_wait_list");
        let deferred: Deferred<u8> = Deferred::new();
        let waiting = deferred.clone();
        let program: Effect<String> = deferred
            .await_()
            .fork()
            .flat_map(move |fiber: Fiber<u8, _>| {
                let waiting = waiting.clone();
                Effect::<(), _>::yield_now()
                    .and_then(fiber.interrupt())
                    .map(move |_| format!("{waiting:?}"))
            });
        let exit = LabRuntime::default().run(program);
        assert_eq!(exit, Exit::succeed("Deferred { state: \"Pending(0 waiters)\" }".to_string()));
        crate::test_complete!("interrupted_waiter_leaves_the_wait_list");
    }

    #[test]
    fn poll_reflects_completion() {
        init_test("poll_reflects_completion");
        let deferred: Deferred<u8> = Deferred::new();
        let program: Effect<(Option<Exit<u8, _>>, Option<Exit<u8, _>>)> = deferred
            .poll()
            .zip_left(deferred.succeed(1))
            .zip(deferred.poll());
        assert_eq!(
            LabRuntime::default().run(program),
            Exit::succeed((None, Some(Exit::succeed(1))))
        );
        crate::test_complete!("poll_reflects_completion");
    }
}
