//! Computation descriptions.
//!
//! An [`Effect<A, E>`] describes a computation that may succeed with an `A`,
//! fail with an `E`, die with a [`Defect`], or be interrupted. Building an
//! effect does no work: constructors and combinators only allocate nodes of
//! a closed instruction set, and side effects happen when a fiber interprets
//! a `Sync` or `Async` node. Effects are immutable and cheap to clone, and
//! can be run any number of times.
//!
//! # Example
//!
//! ```
//! use fibra::effect::Effect;
//! use fibra::lab::LabRuntime;
//!
//! let program: Effect<i32, String> = Effect::succeed(20)
//!     .flat_map(|n| Effect::sync(move || n + 1))
//!     .map(|n| n * 2);
//!
//! let mut lab = LabRuntime::default();
//! assert_eq!(lab.run(program).into_result(), Ok(42));
//! ```

mod combinators;
mod concurrent;
mod log;
pub(crate) mod node;
pub(crate) mod resume;
mod scoped;

pub use combinators::Restore;
pub use log::LogLevel;
pub use node::Data;
pub use resume::Resume;

use crate::types::{Cause, Defect, Exit, FiberId};
use core::fmt;
use node::{
    async_node, erased_cause, erased_exit, fail_node, flat_map_node, from_exit_node,
    succeed_node, sync_node, unit_node, unit_value, value, with_fiber_node, Node, NodeRef,
};
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;

/// A description of a computation producing `A` or failing with `E`.
///
/// `E` defaults to [`Infallible`] for effects that cannot fail with a typed
/// error. Such effects can be used where a typed error is expected via
/// [`Effect::widen`].
pub struct Effect<A, E = Infallible> {
    node: NodeRef,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self::from_node(Arc::clone(&self.node))
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.node {
            Node::Succeed(_) => "Succeed",
            Node::Fail(_) => "Fail",
            Node::Sync(_) => "Sync",
            Node::Async(_) => "Async",
            Node::FlatMap(..) => "FlatMap",
            Node::Fold { .. } => "Fold",
            Node::Fork { .. } => "Fork",
            Node::InterruptStatus { .. } => "InterruptStatus",
            Node::UpdateFiberRef { .. } => "UpdateFiberRef",
            Node::WithScope(_) => "WithScope",
            Node::WithFiber(_) => "WithFiber",
            Node::Yield => "Yield",
        };
        write!(f, "Effect({kind})")
    }
}

impl<A, E> Effect<A, E> {
    pub(crate) const fn from_node(node: NodeRef) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> NodeRef {
        self.node
    }
}

impl<A: Data, E: Data> Effect<A, E> {
    /// Succeeds with `a`.
    pub fn succeed(a: A) -> Self {
        Self::from_node(succeed_node(value(a)))
    }

    /// Fails with the typed error `e`.
    pub fn fail(e: E) -> Self {
        Self::from_node(fail_node(Cause::Fail(value(e))))
    }

    /// Fails with an arbitrary cause.
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::from_node(fail_node(erased_cause(cause)))
    }

    /// Dies with a defect.
    pub fn die(defect: Defect) -> Self {
        Self::from_node(fail_node(Cause::Die(defect)))
    }

    /// Dies with a defect carrying `message`.
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::die(Defect::new(message))
    }

    /// Replays an exit.
    pub fn from_exit(exit: Exit<A, E>) -> Self {
        Self::from_node(from_exit_node(erased_exit(exit)))
    }

    /// Lifts a `Result`.
    pub fn from_result(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Self::succeed(a),
            Err(e) => Self::fail(e),
        }
    }

    /// Runs `f` when interpreted. A panic in `f` becomes a defect.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::from_node(sync_node(move || Ok(value(f()))))
    }

    /// Runs `f` when interpreted; `Err` becomes a typed failure.
    pub fn try_sync<F>(f: F) -> Self
    where
        F: Fn() -> Result<A, E> + Send + Sync + 'static,
    {
        Self::from_node(sync_node(move || {
            f().map(value).map_err(|e| Cause::Fail(value(e)))
        }))
    }

    /// Builds the effect to run lazily, each time it is interpreted.
    pub fn suspend<F>(f: F) -> Self
    where
        F: Fn() -> Self + Send + Sync + 'static,
    {
        Self::from_node(flat_map_node(
            sync_node(|| Ok(unit_value())),
            move |_| f().into_node(),
        ))
    }

    /// Suspends the fiber until `register`'s [`Resume`] is called.
    ///
    /// `register` runs exactly once per execution, on the fiber, and must
    /// not block. The fiber's worker is released while it waits.
    pub fn async_<F>(register: F) -> Self
    where
        F: Fn(Resume<A, E>) + Send + Sync + 'static,
    {
        Self::from_node(async_node(move |raw| {
            register(Resume::from_raw(raw));
            None
        }))
    }

    /// Like [`Effect::async_`], but `register` may return a canceler that
    /// runs if the fiber is interrupted while suspended.
    pub fn async_interruptible<F>(register: F) -> Self
    where
        F: Fn(Resume<A, E>) -> Option<Effect<(), Infallible>> + Send + Sync + 'static,
    {
        Self::from_node(async_node(move |raw| {
            register(Resume::from_raw(raw)).map(Effect::into_node)
        }))
    }

    /// Never completes. Interruptible.
    pub fn never() -> Self {
        Self::from_node(async_node(|_| None))
    }
}

impl<E: Data> Effect<(), E> {
    /// Succeeds with `()`.
    pub fn unit() -> Self {
        Self::from_node(unit_node())
    }

    /// Gives other fibers a turn: the fiber goes to the back of the ready
    /// queue.
    pub fn yield_now() -> Self {
        Self::from_node(Arc::new(Node::Yield))
    }

    /// Interrupts the running fiber itself.
    pub fn interrupt() -> Self {
        Self::from_node(with_fiber_node(|ctx| {
            fail_node(Cause::Interrupt(ctx.fiber_id()))
        }))
    }
}

impl<E: Data> Effect<FiberId, E> {
    /// The id of the fiber running this effect.
    pub fn fiber_id() -> Self {
        Self::from_node(with_fiber_node(|ctx| succeed_node(value(ctx.fiber_id()))))
    }
}

impl<A: Data> Effect<A, Infallible> {
    /// Views an effect that cannot fail as one with error type `E2`.
    #[must_use]
    pub fn widen<E2: Data>(self) -> Effect<A, E2> {
        Effect::from_node(self.node)
    }
}
