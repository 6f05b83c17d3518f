//! Handles to running fibers.
//!
//! [`Fiber`] is the in-runtime handle returned by
//! [`Effect::fork`](crate::effect::Effect::fork): waiting on it suspends the
//! waiting fiber, never a worker thread. [`RuntimeFiber`] is the handle an
//! outside caller gets from `run_fork`; it can block an OS thread.

use crate::effect::node::{
    async_node, clone_value, flat_map_node, from_exit_node, succeed_node, sync_node, typed_exit,
    unit_node, unit_value, value, with_fiber_node, ErasedExit, NodeRef,
};
use crate::effect::{Data, Effect};
use crate::record::FiberShared;
use crate::types::{Exit, FiberId};
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Suspends until `fiber` is done and succeeds with its erased exit.
/// Interrupting the wait removes the observer; the fiber keeps running.
pub(crate) fn await_exit_node(fiber: Arc<FiberShared>) -> NodeRef {
    async_node(move |resume| {
        let key = fiber.add_observer(Box::new(move |exit: &ErasedExit| {
            resume.resume(succeed_node(value(exit.clone())));
        }));
        let fiber = Arc::clone(&fiber);
        key.map(|key| {
            sync_node(move || {
                fiber.remove_observer(key);
                Ok(unit_value())
            })
        })
    })
}

/// Suspends until every fiber in `fibers` is done.
pub(crate) fn await_all_node(fibers: Arc<[Arc<FiberShared>]>) -> NodeRef {
    if fibers.is_empty() {
        return unit_node();
    }
    async_node(move |resume| {
        let remaining = Arc::new(AtomicUsize::new(fibers.len()));
        let keys: Vec<Option<u64>> = fibers
            .iter()
            .map(|fiber| {
                let remaining = Arc::clone(&remaining);
                let resume = resume.clone();
                fiber.add_observer(Box::new(move |_: &ErasedExit| {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        resume.resume(unit_node());
                    }
                }))
            })
            .collect();
        let fibers = Arc::clone(&fibers);
        Some(sync_node(move || {
            for (fiber, key) in fibers.iter().zip(&keys) {
                if let Some(key) = key {
                    fiber.remove_observer(*key);
                }
            }
            Ok(unit_value())
        }))
    })
}

/// Interrupts every fiber in `fibers` on behalf of the running fiber and
/// waits for all of them.
pub(crate) fn interrupt_all_node(fibers: Arc<[Arc<FiberShared>]>) -> NodeRef {
    with_fiber_node(move |ctx| {
        for fiber in fibers.iter() {
            fiber.interrupt_as(ctx.fiber_id());
        }
        await_all_node(Arc::clone(&fibers))
    })
}

/// A handle to a fiber forked from another fiber.
///
/// Handles are cheap to clone. Dropping a handle does not affect the fiber.
pub struct Fiber<A, E> {
    shared: Arc<FiberShared>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        Self::from_shared(Arc::clone(&self.shared))
    }
}

impl<A, E> fmt::Debug for Fiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.shared.id())
            .field("status", &self.shared.status())
            .finish()
    }
}

impl<A, E> Fiber<A, E> {
    pub(crate) fn from_shared(shared: Arc<FiberShared>) -> Self {
        Self {
            shared,
            _marker: PhantomData,
        }
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.shared.id()
    }
}

impl<A: Data, E: Data> Fiber<A, E> {
    /// Waits for the fiber's exit. The fiber's refs are not merged.
    pub fn await_exit<E2: Data>(&self) -> Effect<Exit<A, E>, E2> {
        Effect::from_node(flat_map_node(
            await_exit_node(Arc::clone(&self.shared)),
            |exit| succeed_node(value(typed_exit::<A, E>(clone_value(&exit)))),
        ))
    }

    /// Waits for the fiber and continues with its outcome. On success the
    /// fiber's final refs are merged into the caller's.
    pub fn join(&self) -> Effect<A, E> {
        let shared = Arc::clone(&self.shared);
        Effect::from_node(flat_map_node(
            await_exit_node(Arc::clone(&self.shared)),
            move |exit| {
                let shared = Arc::clone(&shared);
                with_fiber_node(move |ctx| {
                    let exit: ErasedExit = clone_value(&exit);
                    if exit.is_success() {
                        if let Some(refs) = shared.final_refs() {
                            ctx.refs_mut().join(&refs);
                        }
                    }
                    from_exit_node(exit)
                })
            },
        ))
    }

    /// Interrupts the fiber on behalf of the caller and waits until it is
    /// done.
    pub fn interrupt<E2: Data>(&self) -> Effect<Exit<A, E>, E2> {
        self.interrupt_fork().and_then(self.await_exit())
    }

    /// Requests interruption without waiting.
    pub fn interrupt_fork<E2: Data>(&self) -> Effect<(), E2> {
        let shared = Arc::clone(&self.shared);
        Effect::from_node(with_fiber_node(move |ctx| {
            shared.interrupt_as(ctx.fiber_id());
            unit_node()
        }))
    }

    /// The exit if the fiber is done.
    pub fn poll<E2: Data>(&self) -> Effect<Option<Exit<A, E>>, E2> {
        let shared = Arc::clone(&self.shared);
        Effect::sync(move || shared.poll().map(typed_exit::<A, E>))
    }
}

/// A handle to a fiber started from outside the runtime.
pub struct RuntimeFiber<A, E> {
    shared: Arc<FiberShared>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> fmt::Debug for RuntimeFiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeFiber")
            .field("id", &self.shared.id())
            .field("status", &self.shared.status())
            .finish()
    }
}

impl<A, E> Clone for RuntimeFiber<A, E> {
    fn clone(&self) -> Self {
        Self::from_shared(Arc::clone(&self.shared))
    }
}

impl<A, E> RuntimeFiber<A, E> {
    pub(crate) fn from_shared(shared: Arc<FiberShared>) -> Self {
        Self {
            shared,
            _marker: PhantomData,
        }
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.shared.id()
    }

    /// Requests interruption. The interruptor is [`FiberId::NONE`].
    pub fn interrupt(&self) {
        self.shared.interrupt_as(FiberId::NONE);
    }
}

impl<A: Data, E: Data> RuntimeFiber<A, E> {
    /// The exit if the fiber is done.
    #[must_use]
    pub fn poll(&self) -> Option<Exit<A, E>> {
        self.shared.poll().map(typed_exit)
    }

    /// Registers `callback` to run with the exit. Runs it right away if the
    /// fiber is already done.
    pub fn on_done<F>(&self, callback: F)
    where
        F: FnOnce(Exit<A, E>) + Send + 'static,
    {
        let _ = self.shared.add_observer(Box::new(move |exit: &ErasedExit| {
            callback(typed_exit(exit.clone()));
        }));
    }

    /// Blocks the calling thread until the fiber is done.
    ///
    /// Only meaningful on a runtime with worker threads; on a lab runtime
    /// drive the fiber with `run_until_quiescent` instead.
    #[must_use]
    pub fn await_blocking(&self) -> Exit<A, E> {
        let slot = Arc::new((Mutex::new(None), Condvar::new()));
        let notify = Arc::clone(&slot);
        let _ = self.shared.add_observer(Box::new(move |exit: &ErasedExit| {
            let (lock, cvar) = &*notify;
            *lock.lock() = Some(exit.clone());
            cvar.notify_all();
        }));
        let (lock, cvar) = &*slot;
        let mut guard = lock.lock();
        loop {
            if let Some(exit) = guard.take() {
                return typed_exit(exit);
            }
            cvar.wait(&mut guard);
        }
    }
}
