//! Sequential combinators: mapping, chaining, error handling, finalization
//! and interruptibility regions.

use crate::effect::node::{
    erased_cause, fail_node, flat_map_node, fold_node, from_value, guarantee_node,
    interrupt_status_node, succeed_node, sync_node, typed_cause, typed_exit, unit_node, value,
    with_fiber_node, NodeRef,
};
use crate::effect::{Data, Effect};
use crate::types::{Cause, Exit, FiberId};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;

/// Restores the interruptibility that was in effect outside an
/// [`Effect::uninterruptible_mask`] region.
#[derive(Clone, Copy, Debug)]
pub struct Restore {
    interruptible: bool,
}

impl Restore {
    /// Runs `effect` with the outer interruptibility.
    pub fn apply<A: Data, E: Data>(self, effect: Effect<A, E>) -> Effect<A, E> {
        Effect::from_node(interrupt_status_node(effect.into_node(), self.interruptible))
    }
}

impl<A: Data, E: Data> Effect<A, E> {
    /// Transforms the success value.
    pub fn map<B: Data, F>(self, f: F) -> Effect<B, E>
    where
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        Effect::from_node(flat_map_node(self.into_node(), move |v| {
            succeed_node(value(f(from_value::<A>(v))))
        }))
    }

    /// Replaces the success value with `b`.
    pub fn as_<B: Data>(self, b: B) -> Effect<B, E> {
        self.map(move |_| b.clone())
    }

    /// Discards the success value.
    pub fn as_unit(self) -> Effect<(), E> {
        Effect::from_node(flat_map_node(self.into_node(), |_| unit_node()))
    }

    /// Feeds the success value to `f` and runs the effect it returns.
    pub fn flat_map<B: Data, F>(self, f: F) -> Effect<B, E>
    where
        F: Fn(A) -> Effect<B, E> + Send + Sync + 'static,
    {
        Effect::from_node(flat_map_node(self.into_node(), move |v| {
            f(from_value::<A>(v)).into_node()
        }))
    }

    /// Runs `next` after `self`, keeping the result of `next`.
    pub fn and_then<B: Data>(self, next: Effect<B, E>) -> Effect<B, E> {
        self.zip_right(next)
    }

    /// Runs both in sequence and pairs the results.
    pub fn zip<B: Data>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Runs both in sequence and combines the results with `f`.
    pub fn zip_with<B: Data, C: Data, F>(self, that: Effect<B, E>, f: F) -> Effect<C, E>
    where
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.flat_map(move |a| {
            let f = Arc::clone(&f);
            that.clone().map(move |b| f(a.clone(), b))
        })
    }

    /// Runs both in sequence, keeping the left result.
    pub fn zip_left<B: Data>(self, that: Effect<B, E>) -> Self {
        self.flat_map(move |a| that.clone().as_(a))
    }

    /// Runs both in sequence, keeping the right result.
    pub fn zip_right<B: Data>(self, that: Effect<B, E>) -> Effect<B, E> {
        let next = that.into_node();
        Effect::from_node(flat_map_node(self.into_node(), move |_| Arc::clone(&next)))
    }

    /// Runs `f` on the success value for its effect, keeping the value.
    pub fn tap<B: Data, F>(self, f: F) -> Self
    where
        F: Fn(&A) -> Effect<B, E> + Send + Sync + 'static,
    {
        self.flat_map(move |a| f(&a).as_(a))
    }

    /// Transforms typed failures. Defects and interruptions pass through.
    pub fn map_err<E2: Data, F>(self, f: F) -> Effect<A, E2>
    where
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        Effect::from_node(fold_node(
            self.into_node(),
            move |cause| fail_node(cause.map(|e| value(f(from_value::<E>(e))))),
            succeed_node,
        ))
    }

    /// Recovers from a typed failure. Causes without a typed failure are
    /// propagated unchanged.
    pub fn catch_all<E2: Data, F>(self, f: F) -> Effect<A, E2>
    where
        F: Fn(E) -> Effect<A, E2> + Send + Sync + 'static,
    {
        Effect::from_node(fold_node(
            self.into_node(),
            move |cause| match typed_cause::<E>(cause).failure_or_cause() {
                Ok(e) => f(e).into_node(),
                Err(other) => fail_node(erased_cause(other)),
            },
            succeed_node,
        ))
    }

    /// Recovers from any cause, including defects and interruptions that
    /// reach the handler while the fiber is uninterruptible.
    pub fn catch_all_cause<E2: Data, F>(self, f: F) -> Effect<A, E2>
    where
        F: Fn(Cause<E>) -> Effect<A, E2> + Send + Sync + 'static,
    {
        Effect::from_node(fold_node(
            self.into_node(),
            move |cause| f(typed_cause(cause)).into_node(),
            succeed_node,
        ))
    }

    /// Falls back to `that` on a typed failure.
    pub fn or_else<E2: Data>(self, that: Effect<A, E2>) -> Effect<A, E2> {
        self.catch_all(move |_| that.clone())
    }

    /// Handles both outcomes; causes without a typed failure propagate.
    pub fn fold<B: Data, E2: Data, F, S>(self, on_failure: F, on_success: S) -> Effect<B, E2>
    where
        F: Fn(E) -> Effect<B, E2> + Send + Sync + 'static,
        S: Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    {
        Effect::from_node(fold_node(
            self.into_node(),
            move |cause| match typed_cause::<E>(cause).failure_or_cause() {
                Ok(e) => on_failure(e).into_node(),
                Err(other) => fail_node(erased_cause(other)),
            },
            move |v| on_success(from_value::<A>(v)).into_node(),
        ))
    }

    /// Handles both outcomes, seeing the full cause on failure.
    pub fn fold_cause<B: Data, E2: Data, F, S>(
        self,
        on_failure: F,
        on_success: S,
    ) -> Effect<B, E2>
    where
        F: Fn(Cause<E>) -> Effect<B, E2> + Send + Sync + 'static,
        S: Fn(A) -> Effect<B, E2> + Send + Sync + 'static,
    {
        Effect::from_node(fold_node(
            self.into_node(),
            move |cause| on_failure(typed_cause(cause)).into_node(),
            move |v| on_success(from_value::<A>(v)).into_node(),
        ))
    }

    /// Reifies the outcome into an [`Exit`]. The resulting effect only fails
    /// if the fiber is interrupted while it waits.
    pub fn exit<E2: Data>(self) -> Effect<Exit<A, E>, E2> {
        Effect::from_node(fold_node(
            self.into_node(),
            |cause| succeed_node(value(Exit::<A, E>::Failure(typed_cause(cause)))),
            |v| succeed_node(value(Exit::<A, E>::Success(from_value(v)))),
        ))
    }

    /// Runs `finalizer` after `self` whatever the outcome.
    ///
    /// The finalizer is uninterruptible. If it dies, the defect is combined
    /// with the outcome of `self`.
    pub fn ensuring(self, finalizer: Effect<(), Infallible>) -> Self {
        let finalizer = finalizer.into_node();
        Self::from_node(guarantee_node(self.into_node(), move |_| {
            Arc::clone(&finalizer)
        }))
    }

    /// Runs `f` with the exit of `self`, uninterruptibly.
    pub fn on_exit<F>(self, f: F) -> Self
    where
        F: Fn(Exit<A, E>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        Self::from_node(guarantee_node(self.into_node(), move |exit| {
            f(typed_exit(exit.clone())).into_node()
        }))
    }

    /// Runs `f` with the interruptors if `self` is interrupted.
    pub fn on_interrupt<F>(self, f: F) -> Self
    where
        F: Fn(BTreeSet<FiberId>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        Self::from_node(guarantee_node(self.into_node(), move |exit| match exit {
            Exit::Failure(cause) if cause.is_interrupted() => f(cause.interruptors()).into_node(),
            _ => unit_node(),
        }))
    }

    /// Runs `self` with interruption deferred until it completes.
    pub fn uninterruptible(self) -> Self {
        Self::from_node(interrupt_status_node(self.into_node(), false))
    }

    /// Runs `self` interruptibly, even inside an uninterruptible region.
    pub fn interruptible(self) -> Self {
        Self::from_node(interrupt_status_node(self.into_node(), true))
    }

    /// Runs `f` uninterruptibly; parts wrapped with the given [`Restore`]
    /// regain the caller's interruptibility.
    pub fn uninterruptible_mask<F>(f: F) -> Self
    where
        F: Fn(Restore) -> Self + Send + Sync + 'static,
    {
        Self::from_node(with_fiber_node(move |ctx| {
            let restore = Restore {
                interruptible: ctx.is_interruptible(),
            };
            interrupt_status_node(f(restore).into_node(), false)
        }))
    }

    /// Re-runs `self` up to `n` more times while it fails with a typed
    /// failure or a defect. Interruption is never retried.
    pub fn retry_n(self, n: usize) -> Self {
        Self::from_node(retry_node(self.into_node(), n))
    }

    /// Runs `self` once, then `n` more times while it succeeds. Yields the
    /// last value.
    pub fn repeat_n(self, n: usize) -> Self {
        Self::from_node(repeat_node(self.into_node(), n))
    }
}

fn retry_node(effect: NodeRef, remaining: usize) -> NodeRef {
    let again = Arc::clone(&effect);
    fold_node(
        effect,
        move |cause| {
            if remaining > 0 && cause.is_failure_or_die() && !cause.is_interrupted() {
                retry_node(Arc::clone(&again), remaining - 1)
            } else {
                fail_node(cause)
            }
        },
        succeed_node,
    )
}

fn repeat_node(effect: NodeRef, remaining: usize) -> NodeRef {
    if remaining == 0 {
        return effect;
    }
    let again = Arc::clone(&effect);
    flat_map_node(effect, move |_| repeat_node(Arc::clone(&again), remaining - 1))
}

impl<B: Data, E: Data> Effect<Vec<B>, E> {
    /// Runs `f` on each item in order, collecting the results. Stops at the
    /// first failure.
    pub fn for_each<T, I, F>(items: I, f: F) -> Self
    where
        T: Data,
        I: IntoIterator<Item = T>,
        F: Fn(T) -> Effect<B, E> + Send + Sync + 'static,
    {
        let items: Arc<[T]> = items.into_iter().collect();
        let f = Arc::new(f);
        // A fresh accumulator per execution keeps the description reusable.
        Self::from_node(flat_map_node(
            sync_node(|| Ok(value(Arc::new(Mutex::new(Vec::<B>::new()))))),
            move |acc| {
                let acc: Arc<Mutex<Vec<B>>> = from_value(acc);
                for_each_step(Arc::clone(&items), Arc::clone(&f), acc, 0)
            },
        ))
    }

    /// Runs every effect in order, collecting the results.
    pub fn all<I>(effects: I) -> Self
    where
        I: IntoIterator<Item = Effect<B, E>>,
    {
        Self::for_each(effects, |effect| effect)
    }
}

fn for_each_step<T, B, E, F>(
    items: Arc<[T]>,
    f: Arc<F>,
    acc: Arc<Mutex<Vec<B>>>,
    index: usize,
) -> NodeRef
where
    T: Data,
    B: Data,
    E: Data,
    F: Fn(T) -> Effect<B, E> + Send + Sync + 'static,
{
    let Some(item) = items.get(index).cloned() else {
        let out = std::mem::take(&mut *acc.lock());
        return succeed_node(value(out));
    };
    let next = f(item).into_node();
    flat_map_node(next, move |b| {
        acc.lock().push(from_value::<B>(b));
        for_each_step(Arc::clone(&items), Arc::clone(&f), Arc::clone(&acc), index + 1)
    })
}
