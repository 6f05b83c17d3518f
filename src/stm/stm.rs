//! Transaction descriptions and their commit into effects.

use crate::effect::node::{
    async_node, erased_cause, fail_node, succeed_node, sync_node, unit_value, value,
    with_fiber_node, NodeRef,
};
use crate::effect::resume::RawResume;
use crate::effect::{Data, Effect};
use crate::stm::journal::{Abort, CommitOutcome, Journal, ReadSet, Wake};
use crate::tracing_compat::trace;
use crate::types::{Cause, Defect, FiberId};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

type Run<A, E> = Arc<dyn Fn(&mut Journal) -> Result<A, Abort<E>> + Send + Sync>;

/// A transaction over [`TRef`](crate::stm::TRef)s.
///
/// A transaction is a description: nothing happens until it is
/// [`commit`](Stm::commit)ted as part of an effect. The body may run
/// several times, so it must not perform side effects of its own.
pub struct Stm<A, E = Infallible> {
    run: Run<A, E>,
}

impl<A, E> Clone for Stm<A, E> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<A, E> fmt::Debug for Stm<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stm").finish_non_exhaustive()
    }
}

impl<A: Data, E: Data> Stm<A, E> {
    pub(crate) fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&mut Journal) -> Result<A, Abort<E>> + Send + Sync + 'static,
    {
        Self { run: Arc::new(f) }
    }

    pub(crate) fn run_in(&self, journal: &mut Journal) -> Result<A, Abort<E>> {
        (self.run)(journal)
    }

    /// Succeeds with `a`.
    pub fn succeed(a: A) -> Self {
        Self::from_fn(move |_| Ok(a.clone()))
    }

    /// Fails with `e`. The transaction's writes are discarded.
    pub fn fail(e: E) -> Self {
        Self::from_fn(move |_| Err(Abort::Fail(e.clone())))
    }

    /// Dies with `defect`.
    pub fn die(defect: Defect) -> Self {
        Self::from_fn(move |_| Err(Abort::Die(defect.clone())))
    }

    /// Dies with a defect carrying `message`.
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::die(Defect::new(message))
    }

    /// Abandons the attempt and waits until one of the refs read so far
    /// changes, then runs the whole transaction again.
    pub fn retry() -> Self {
        Self::from_fn(|_| Err(Abort::Retry))
    }

    /// Transforms the result.
    pub fn map<B: Data, F>(self, f: F) -> Stm<B, E>
    where
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        Stm::from_fn(move |journal| self.run_in(journal).map(&f))
    }

    /// Transforms the typed failure.
    pub fn map_err<E2: Data, F>(self, f: F) -> Stm<A, E2>
    where
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        Stm::from_fn(move |journal| {
            self.run_in(journal).map_err(|abort| match abort {
                Abort::Fail(e) => Abort::Fail(f(e)),
                Abort::Die(d) => Abort::Die(d),
                Abort::Retry => Abort::Retry,
                Abort::Conflict => Abort::Conflict,
            })
        })
    }

    /// Sequences `f` after `self` within the same transaction.
    pub fn flat_map<B: Data, F>(self, f: F) -> Stm<B, E>
    where
        F: Fn(A) -> Stm<B, E> + Send + Sync + 'static,
    {
        Stm::from_fn(move |journal| {
            let a = self.run_in(journal)?;
            f(a).run_in(journal)
        })
    }

    /// Runs `that` after `self`, discarding the result of `self`.
    pub fn and_then<B: Data>(self, that: Stm<B, E>) -> Stm<B, E> {
        Stm::from_fn(move |journal| {
            self.run_in(journal)?;
            that.run_in(journal)
        })
    }

    /// Runs both, pairing the results.
    pub fn zip<B: Data>(self, that: Stm<B, E>) -> Stm<(A, B), E> {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Runs both, combining the results with `f`.
    pub fn zip_with<B: Data, C: Data, F>(self, that: Stm<B, E>, f: F) -> Stm<C, E>
    where
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        Stm::from_fn(move |journal| {
            let a = self.run_in(journal)?;
            let b = that.run_in(journal)?;
            Ok(f(a, b))
        })
    }

    /// Runs `self`; if it retries, discards its writes and runs `that`
    /// instead. If both retry the transaction waits on the refs either
    /// branch read.
    pub fn or_else(self, that: Self) -> Self {
        Self::from_fn(move |journal| {
            let checkpoint = journal.checkpoint();
            match self.run_in(journal) {
                Err(Abort::Retry) => {
                    journal.rollback(checkpoint);
                    that.run_in(journal)
                }
                other => other,
            }
        })
    }

    /// Recovers from a typed failure. Writes made by the failed part are
    /// discarded before `f` runs.
    pub fn catch_all<E2: Data, F>(self, f: F) -> Stm<A, E2>
    where
        F: Fn(E) -> Stm<A, E2> + Send + Sync + 'static,
    {
        Stm::from_fn(move |journal| {
            let checkpoint = journal.checkpoint();
            match self.run_in(journal) {
                Ok(a) => Ok(a),
                Err(Abort::Fail(e)) => {
                    journal.rollback(checkpoint);
                    f(e).run_in(journal)
                }
                Err(Abort::Die(d)) => Err(Abort::Die(d)),
                Err(Abort::Retry) => Err(Abort::Retry),
                Err(Abort::Conflict) => Err(Abort::Conflict),
            }
        })
    }

    /// Runs the transaction atomically.
    ///
    /// Conflicting attempts are re-run transparently. A retrying
    /// transaction suspends the fiber until a ref it read is committed to
    /// by someone else. A failure is only reported if the reads it was based
    /// on are still current; otherwise the attempt counts as a conflict.
    pub fn commit(&self) -> Effect<A, E> {
        Effect::from_node(commit_node(self.clone()))
    }
}

impl<E: Data> Stm<(), E> {
    /// Succeeds with `()`.
    pub fn unit() -> Self {
        Self::succeed(())
    }

    /// Retries unless `condition` holds.
    pub fn check(condition: bool) -> Self {
        Self::from_fn(move |_| {
            if condition {
                Ok(())
            } else {
                Err(Abort::Retry)
            }
        })
    }
}

impl<E: Data> Stm<FiberId, E> {
    /// The id of the fiber running the transaction.
    pub fn fiber_id() -> Self {
        Self::from_fn(|journal| Ok(journal.fiber_id()))
    }
}

fn commit_node<A: Data, E: Data>(stm: Stm<A, E>) -> NodeRef {
    with_fiber_node(move |ctx| attempt(&stm, ctx.fiber_id()))
}

fn attempt<A: Data, E: Data>(stm: &Stm<A, E>, fiber: FiberId) -> NodeRef {
    loop {
        let mut journal = Journal::new(fiber);
        match stm.run_in(&mut journal) {
            Ok(a) => match journal.commit() {
                CommitOutcome::Committed => return succeed_node(value(a)),
                CommitOutcome::Conflict => {}
            },
            Err(Abort::Retry) => return retry_wait_node(journal.read_set(), stm.clone()),
            Err(Abort::Fail(e)) if journal.is_valid() => {
                return fail_node(erased_cause(Cause::<E>::Fail(e)));
            }
            Err(Abort::Die(d)) if journal.is_valid() => {
                return fail_node(erased_cause(Cause::<E>::Die(d)));
            }
            Err(_) => {}
        }
        trace!(fiber = %fiber, "stm attempt invalidated, rerunning");
    }
}

/// Suspends until a ref of `read_set` changes, then commits `stm` again.
fn retry_wait_node<A: Data, E: Data>(read_set: ReadSet, stm: Stm<A, E>) -> NodeRef {
    async_node(move |resume: RawResume| {
        let again = stm.clone();
        let waker = resume.clone();
        let wake: Wake = Arc::new(move || waker.resume(commit_node(again.clone())));
        match read_set.register(wake) {
            None => {
                resume.resume(commit_node(stm.clone()));
                None
            }
            Some(registration) => {
                trace!("stm retry suspended");
                Some(sync_node(move || {
                    registration.cancel();
                    Ok(unit_value())
                }))
            }
        }
    })
}
