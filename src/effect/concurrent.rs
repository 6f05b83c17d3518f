//! Concurrent combinators: forking, parallel composition, races and
//! timeouts.
//!
//! Every combinator here runs its operands on child fibers supervised by the
//! caller's current scope, and never returns before all of those children
//! are done: losers and siblings of a failed child are interrupted and
//! awaited first.

use crate::effect::node::{
    async_node, fail_node, flat_map_node, fold_node, from_exit_node, from_value,
    interrupt_status_node, succeed_node, sync_node, then_node, unit_node, unit_value, value,
    with_fiber_node, ErasedCause, ErasedExit, Node, NodeRef, Value,
};
use crate::effect::{Data, Effect};
use crate::fiber::{await_all_node, interrupt_all_node, Fiber};
use crate::record::FiberShared;
use crate::runtime::fiber_runtime::FiberContext;
use crate::runtime::shared::fatal;
use crate::tracing_compat::trace;
use crate::types::{Cause, FiberId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

impl<A: Data, E: Data> Effect<A, E> {
    /// Starts `self` on a new fiber supervised by the current scope and
    /// returns its handle right away.
    ///
    /// The child inherits the caller's fiber refs through their fork
    /// transforms. It is interrupted when the scope closes, at the latest
    /// when the forking fiber completes.
    pub fn fork<E2: Data>(self) -> Effect<Fiber<A, E>, E2> {
        Effect::from_node(fork_node::<A, E>(self.into_node(), false))
    }

    /// Like [`Effect::fork`], but the child is supervised by the runtime's
    /// root scope and outlives the forking fiber.
    pub fn fork_daemon<E2: Data>(self) -> Effect<Fiber<A, E>, E2> {
        Effect::from_node(fork_node::<A, E>(self.into_node(), true))
    }

    /// Runs both effects concurrently and pairs the results.
    ///
    /// If either fails the other is interrupted; the failure is the
    /// `Parallel` combination of every child that failed for a real reason.
    pub fn zip_par<B: Data>(self, that: Effect<B, E>) -> Effect<(A, B), E> {
        let effects: Arc<[NodeRef]> = Arc::from(vec![self.into_node(), that.into_node()]);
        Effect::from_node(flat_map_node(par_all_node(effects), |values| {
            let mut values = from_value::<Vec<Value>>(values).into_iter();
            match (values.next(), values.next()) {
                (Some(a), Some(b)) => succeed_node(value((from_value::<A>(a), from_value::<B>(b)))),
                _ => fatal("parallel zip lost a result"),
            }
        }))
    }

    /// Runs both effects concurrently and keeps the first success; the
    /// other is interrupted. Fails only if both fail, with both causes in
    /// `Parallel`.
    pub fn race(self, that: Self) -> Self {
        Self::from_node(race_node([self.into_node(), that.into_node()], false))
    }

    /// Runs both effects concurrently and keeps whichever completes first,
    /// success or failure; the other is interrupted.
    pub fn race_first(self, that: Self) -> Self {
        Self::from_node(race_node([self.into_node(), that.into_node()], true))
    }

    /// Runs `self` for at most `duration`. Yields `None` if the time runs
    /// out first, in which case `self` is interrupted.
    pub fn timeout(self, duration: Duration) -> Effect<Option<A>, E> {
        self.map(Some)
            .race_first(Effect::<(), E>::sleep(duration).as_(None))
    }
}

impl<B: Data, E: Data> Effect<Vec<B>, E> {
    /// Runs `f` on every item concurrently, collecting results in item
    /// order. Fails fast: the first failure interrupts the rest.
    pub fn for_each_par<T, I, F>(items: I, f: F) -> Self
    where
        T: Data,
        I: IntoIterator<Item = T>,
        F: Fn(T) -> Effect<B, E> + Send + Sync + 'static,
    {
        let items: Arc<[T]> = items.into_iter().collect();
        Self::from_node(flat_map_node(unit_node(), move |_| {
            let effects: Arc<[NodeRef]> = items
                .iter()
                .map(|item| f(item.clone()).into_node())
                .collect();
            flat_map_node(par_all_node(effects), |values| {
                let values: Vec<B> = from_value::<Vec<Value>>(values)
                    .into_iter()
                    .map(from_value::<B>)
                    .collect();
                succeed_node(value(values))
            })
        }))
    }

    /// Runs every effect concurrently, collecting results in order.
    pub fn all_par<I>(effects: I) -> Self
    where
        I: IntoIterator<Item = Effect<B, E>>,
    {
        Self::for_each_par(effects, |effect| effect)
    }
}

fn fork_node<A: Data, E: Data>(effect: NodeRef, daemon: bool) -> NodeRef {
    flat_map_node(Arc::new(Node::Fork { effect, daemon }), |child| {
        let shared: Arc<FiberShared> = from_value(child);
        succeed_node(value(Fiber::<A, E>::from_shared(shared)))
    })
}

fn spawn_children(ctx: &FiberContext<'_>, effects: &[NodeRef]) -> Arc<[Arc<FiberShared>]> {
    let parent = ctx.fiber_id();
    effects
        .iter()
        .map(|effect| {
            ctx.runtime().spawn(
                Arc::clone(effect),
                ctx.refs().fork(),
                Some(parent),
                ctx.scope(),
                ctx.is_interruptible(),
            )
        })
        .collect()
}

/// Interrupts the siblings of the first child that fails.
fn interrupt_siblings_on_failure(children: &[Arc<FiberShared>], parent: FiberId) {
    let siblings: Arc<[Weak<FiberShared>]> = children.iter().map(Arc::downgrade).collect();
    for (index, child) in children.iter().enumerate() {
        let siblings = Arc::clone(&siblings);
        let _ = child.add_observer(Box::new(move |exit: &ErasedExit| {
            if exit.is_success() {
                return;
            }
            for (i, sibling) in siblings.iter().enumerate() {
                if i != index {
                    if let Some(sibling) = sibling.upgrade() {
                        sibling.interrupt_as(parent);
                    }
                }
            }
        }));
    }
}

fn exits_of(children: &[Arc<FiberShared>]) -> Vec<ErasedExit> {
    children
        .iter()
        .map(|child| match child.poll() {
            Some(exit) => exit,
            None => fatal("awaited child has no exit"),
        })
        .collect()
}

/// Combines the failures of concurrent children. Interruption-only causes
/// are dropped when some child failed for a real reason: those children
/// were cancelled because of it.
fn combine_failures(exits: Vec<ErasedExit>) -> ErasedCause {
    let causes: Vec<ErasedCause> = exits
        .into_iter()
        .filter_map(|exit| match exit {
            ErasedExit::Failure(cause) => Some(cause),
            ErasedExit::Success(_) => None,
        })
        .collect();
    let real = causes.iter().any(Cause::is_failure_or_die);
    Cause::parallel_all(
        causes
            .into_iter()
            .filter(|cause| !real || !cause.is_interrupted_only()),
    )
}

/// Runs `effects` on child fibers and succeeds with their values in order.
fn par_all_node(effects: Arc<[NodeRef]>) -> NodeRef {
    with_fiber_node(move |ctx| {
        if effects.is_empty() {
            return succeed_node(value(Vec::<Value>::new()));
        }
        let children = spawn_children(ctx, &effects);
        interrupt_siblings_on_failure(&children, ctx.fiber_id());
        trace!(fiber = %ctx.fiber_id(), children = children.len(), "parallel children forked");

        let on_interrupt = Arc::clone(&children);
        let on_done = Arc::clone(&children);
        let wait = interrupt_status_node(await_all_node(Arc::clone(&children)), ctx.is_interruptible());
        let body = fold_node(
            wait,
            move |cause| then_node(interrupt_all_node(Arc::clone(&on_interrupt)), fail_node(cause)),
            move |_| collect_node(Arc::clone(&on_done)),
        );
        interrupt_status_node(body, false)
    })
}

fn collect_node(children: Arc<[Arc<FiberShared>]>) -> NodeRef {
    with_fiber_node(move |ctx| {
        let exits = exits_of(&children);
        if !exits.iter().all(ErasedExit::is_success) {
            return fail_node(combine_failures(exits));
        }
        for child in children.iter() {
            if let Some(refs) = child.final_refs() {
                ctx.refs_mut().join(&refs);
            }
        }
        let values: Vec<Value> = exits
            .into_iter()
            .filter_map(|exit| match exit {
                ErasedExit::Success(v) => Some(v),
                ErasedExit::Failure(_) => None,
            })
            .collect();
        succeed_node(value(values))
    })
}

/// Runs both effects on child fibers. The first child to succeed (or to
/// complete at all, with `first_completion`) decides the outcome.
fn race_node(effects: [NodeRef; 2], first_completion: bool) -> NodeRef {
    with_fiber_node(move |ctx| {
        let children = spawn_children(ctx, &effects);
        let on_interrupt = Arc::clone(&children);
        let on_winner = Arc::clone(&children);
        let wait = interrupt_status_node(
            await_winner_node(Arc::clone(&children), first_completion),
            ctx.is_interruptible(),
        );
        let body = fold_node(
            wait,
            move |cause| then_node(interrupt_all_node(Arc::clone(&on_interrupt)), fail_node(cause)),
            move |winner| settle_race(Arc::clone(&on_winner), from_value(winner)),
        );
        interrupt_status_node(body, false)
    })
}

/// Suspends until a child wins and succeeds with `Some(index)`, or with
/// `None` once every child failed.
fn await_winner_node(children: Arc<[Arc<FiberShared>]>, first_completion: bool) -> NodeRef {
    async_node(move |resume| {
        let failures = Arc::new(AtomicUsize::new(0));
        let total = children.len();
        let keys: Vec<Option<u64>> = children
            .iter()
            .enumerate()
            .map(|(index, child)| {
                let resume = resume.clone();
                let failures = Arc::clone(&failures);
                child.add_observer(Box::new(move |exit: &ErasedExit| {
                    if first_completion || exit.is_success() {
                        resume.resume(succeed_node(value(Some(index))));
                    } else if failures.fetch_add(1, Ordering::AcqRel) + 1 == total {
                        resume.resume(succeed_node(value(None::<usize>)));
                    }
                }))
            })
            .collect();
        let children = Arc::clone(&children);
        Some(sync_node(move || {
            for (child, key) in children.iter().zip(&keys) {
                if let Some(key) = key {
                    child.remove_observer(*key);
                }
            }
            Ok(unit_value())
        }))
    })
}

fn settle_race(children: Arc<[Arc<FiberShared>]>, winner: Option<usize>) -> NodeRef {
    let Some(winner) = winner else {
        return fail_node(combine_failures(exits_of(&children)));
    };
    let losers: Arc<[Arc<FiberShared>]> = children
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != winner)
        .map(|(_, child)| Arc::clone(child))
        .collect();
    let winner = Arc::clone(&children[winner]);
    then_node(
        interrupt_all_node(losers),
        with_fiber_node(move |ctx| {
            let Some(exit) = winner.poll() else {
                fatal("race winner has no exit");
            };
            trace!(fiber = %ctx.fiber_id(), winner = %winner.id(), "race settled");
            if exit.is_success() {
                if let Some(refs) = winner.final_refs() {
                    ctx.refs_mut().join(&refs);
                }
            }
            from_exit_node(exit)
        }),
    )
}
