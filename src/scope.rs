//! Scopes: resource lifetimes as values.
//!
//! A [`Scope`] collects finalizers, child scopes and supervised fibers in
//! registration order. Closing it releases all of them in strict reverse
//! order, recursively, with interruption disabled:
//!
//! - a finalizer runs with the exit the scope closes with;
//! - a child scope is closed with the same exit;
//! - a supervised fiber is interrupted and awaited.
//!
//! Failures of finalizers are collected. They are reported after the
//! triggering cause (`Sequential`) when the scope closes with a failure, and
//! as the failure of the close itself otherwise. Closing is idempotent.
//!
//! Every fiber owns a scope, closed when the fiber's body completes;
//! [`Effect::scoped`](crate::effect::Effect::scoped) opens one around a
//! single effect.

use crate::effect::node::{
    fail_node, flat_map_node, fold_node, from_value, interrupt_status_node, succeed_node,
    unit_node, value, with_fiber_node, ErasedCause, NodeRef,
};
use crate::effect::{Data, Effect};
use crate::fiber::await_exit_node;
use crate::record::{Finalizer, ScopeEntry};
use crate::tracing_compat::trace;
use crate::types::{Cause, Exit, FiberId, ScopeId};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::Arc;

/// Handle to a scope in the runtime's scope table.
///
/// Handles are plain ids: copying one does not extend the scope's life, and
/// operations on a closed scope are harmless.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Scope {
    id: ScopeId,
}

impl Scope {
    pub(crate) const fn from_id(id: ScopeId) -> Self {
        Self { id }
    }

    /// The scope's id.
    #[must_use]
    pub const fn id(&self) -> ScopeId {
        self.id
    }

    /// Opens a standalone scope. The caller is responsible for closing it.
    pub fn make<E: Data>() -> Effect<Self, E> {
        Effect::from_node(with_fiber_node(|ctx| {
            let id = ctx.runtime().open_scope(None);
            trace!(scope = %id, fiber = %ctx.fiber_id(), "scope opened");
            succeed_node(value(Self::from_id(id)))
        }))
    }

    /// Registers a finalizer, run with the scope's exit when it closes.
    ///
    /// If the scope is already closing the finalizer runs right away with a
    /// successful exit.
    pub fn add_finalizer<E, F>(&self, finalizer: F) -> Effect<(), E>
    where
        E: Data,
        F: Fn(&Exit<(), ()>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let finalizer: Finalizer = Arc::new(move |exit: &Exit<(), ()>| finalizer(exit).into_node());
        Effect::from_node(add_finalizer_node(self.id, finalizer))
    }

    /// Opens a child scope, closed when this one closes unless it is closed
    /// earlier.
    pub fn fork<E: Data>(&self) -> Effect<Self, E> {
        let parent = self.id;
        Effect::from_node(with_fiber_node(move |ctx| {
            let id = ctx.runtime().open_scope(Some(parent));
            succeed_node(value(Self::from_id(id)))
        }))
    }

    /// Closes the scope with `exit`. Fails only with the defects and
    /// interruptions of its finalizers.
    pub fn close<E: Data>(&self, exit: Exit<(), ()>) -> Effect<(), E> {
        Effect::from_node(interrupt_status_node(close_node(self.id, exit), false))
    }
}

pub(crate) fn add_finalizer_node(scope: ScopeId, finalizer: Finalizer) -> NodeRef {
    with_fiber_node(move |ctx| {
        match ctx
            .runtime()
            .add_scope_entry(scope, ScopeEntry::Finalizer(Arc::clone(&finalizer)))
        {
            Ok(_) => unit_node(),
            Err(_) => {
                trace!(scope = %scope, "finalizer added to a closed scope runs now");
                let run = Arc::clone(&finalizer);
                interrupt_status_node(
                    flat_map_node(unit_node(), move |_| run(&Exit::Success(()))),
                    false,
                )
            }
        }
    })
}

/// Closes `scope`: its entries in reverse registration order, then the
/// record itself. Fails with the combined failures of the entries.
///
/// Must run uninterruptibly.
pub(crate) fn close_node(scope: ScopeId, exit: Exit<(), ()>) -> NodeRef {
    let exit = Arc::new(exit);
    with_fiber_node(move |ctx| {
        let Some(entries) = ctx.runtime().lock_state().begin_close(scope) else {
            return unit_node();
        };
        trace!(
            scope = %scope,
            entries = entries.len(),
            failed = exit.is_failure(),
            "closing scope"
        );
        let entries: Arc<[ScopeEntry]> = entries.into();
        let runtime = Arc::clone(ctx.runtime());
        let closer = ctx.fiber_id();
        flat_map_node(
            close_step(
                entries,
                entries_len_hint(),
                Arc::clone(&exit),
                closer,
                Failures::default(),
            ),
            move |failures| {
                runtime.lock_state().finish_close(scope);
                let failures: ErasedCause = from_value(failures);
                if failures.is_empty() {
                    unit_node()
                } else {
                    fail_node(failures)
                }
            },
        )
    })
}

// Marker for "start at the last entry".
const fn entries_len_hint() -> usize {
    usize::MAX
}

// Failures of the entries released so far, in release order.
type Failures = Arc<Mutex<Vec<ErasedCause>>>;

/// Releases `entries[..remaining]` from the last one down, accumulating
/// failures.
fn close_step(
    entries: Arc<[ScopeEntry]>,
    remaining: usize,
    exit: Arc<Exit<(), ()>>,
    closer: FiberId,
    failures: Failures,
) -> NodeRef {
    let remaining = remaining.min(entries.len());
    if remaining == 0 {
        let failed = std::mem::take(&mut *failures.lock());
        return succeed_node(value(Cause::sequential_all(failed)));
    }
    let index = remaining - 1;
    let release = release_node(&entries[index], &exit, closer);
    let (entries_ok, exit_ok, failures_ok) =
        (Arc::clone(&entries), Arc::clone(&exit), Arc::clone(&failures));
    fold_node(
        release,
        move |failed| {
            failures.lock().push(failed);
            close_step(
                Arc::clone(&entries),
                index,
                Arc::clone(&exit),
                closer,
                Arc::clone(&failures),
            )
        },
        move |_| {
            close_step(
                Arc::clone(&entries_ok),
                index,
                Arc::clone(&exit_ok),
                closer,
                Arc::clone(&failures_ok),
            )
        },
    )
}

fn release_node(entry: &ScopeEntry, exit: &Arc<Exit<(), ()>>, closer: FiberId) -> NodeRef {
    match entry {
        ScopeEntry::Finalizer(finalizer) => {
            let finalizer = Arc::clone(finalizer);
            let exit = Arc::clone(exit);
            // Called from a continuation so a panic while building the
            // finalizer's effect becomes a defect.
            flat_map_node(unit_node(), move |_| finalizer(&exit))
        }
        ScopeEntry::Scope(child) => close_node(*child, (**exit).clone()),
        ScopeEntry::Fiber(id) if *id == closer => unit_node(),
        ScopeEntry::Fiber(id) => {
            let id = *id;
            with_fiber_node(move |ctx| match ctx.runtime().lookup_fiber(id) {
                None => unit_node(),
                Some(child) => {
                    child.interrupt_as(ctx.fiber_id());
                    flat_map_node(await_exit_node(child), |_| unit_node())
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::LabRuntime;
    use crate::test_utils::init_test_logging;
    use parking_lot::Mutex;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn record(log: &Arc<Mutex<Vec<String>>>, entry: &str) -> Effect<(), Infallible> {
        let log = Arc::clone(log);
        let entry = entry.to_string();
        Effect::sync(move || log.lock().push(entry.clone()))
    }

    #[test]
    fn finalizers_run_in_reverse_order_across_child_scopes() {
        init_test("finalizers_run_in_reverse_order_across_child_scopes");
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let program: Effect<()> = Scope::make().flat_map(move |scope: Scope| {
            let (a, b, c) = (Arc::clone(&l), Arc::clone(&l), Arc::clone(&l));
            scope
                .add_finalizer(move |_| record(&a, "first"))
                .and_then(scope.fork())
                .flat_map(move |child: Scope| {
                    let b = Arc::clone(&b);
                    child.add_finalizer(move |_| record(&b, "child"))
                })
                .and_then(scope.add_finalizer(move |_| record(&c, "last")))
                .and_then(scope.close(Exit::Success(())))
        });
        let exit = LabRuntime::default().run(program);
        assert_eq!(exit, Exit::Success(()));
        assert_eq!(*log.lock(), vec!["last", "child", "first"]);
        crate::test_complete!("finalizers_run_in_reverse_order_across_child_scopes");
    }

    #[test]
    fn close_is_idempotent() {
        init_test("close_is_idempotent");
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let program: Effect<()> = Scope::make().flat_map(move |scope: Scope| {
            let l = Arc::clone(&l);
            scope
                .add_finalizer(move |_| record(&l, "once"))
                .and_then(scope.close(Exit::Success(())))
                .and_then(scope.close(Exit::Success(())))
        });
        assert_eq!(LabRuntime::default().run(program), Exit::Success(()));
        assert_eq!(log.lock().len(), 1);
        crate::test_complete!("close_is_idempotent");
    }

    #[test]
    fn finalizer_sees_failure_exit() {
        init_test("finalizer_sees_failure_exit");
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let program: Effect<()> = Scope::make().flat_map(move |scope: Scope| {
            let s = Arc::clone(&s);
            scope
                .add_finalizer(move |exit| {
                    let s = Arc::clone(&s);
                    let failed = exit.is_failure();
                    Effect::sync(move || *s.lock() = Some(failed))
                })
                .and_then(scope.close(Exit::Failure(Cause::Fail(()))))
        });
        assert_eq!(LabRuntime::default().run(program), Exit::Success(()));
        assert_eq!(*seen.lock(), Some(true));
        crate::test_complete!("finalizer_sees_failure_exit");
    }

    #[test]
    fn dying_finalizers_fail_the_close_and_others_still_run() {
        init_test("dying_finalizers_fail_the_close_and_others_still_run");
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let program: Effect<(), ()> = Scope::make().flat_map(move |scope: Scope| {
            let l = Arc::clone(&l);
            scope
                .add_finalizer(move |_| record(&l, "survivor"))
                .and_then(scope.add_finalizer(|_| Effect::die_message("first boom")))
                .and_then(scope.close(Exit::Success(())))
        });
        let exit = LabRuntime::default().run(program);
        let defects = exit.cause().map(Cause::defects).unwrap_or_default();
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].message(), "first boom");
        assert_eq!(*log.lock(), vec!["survivor"]);
        crate::test_complete!("dying_finalizers_fail_the_close_and_others_still_run");
    }

    #[test]
    fn finalizer_added_to_closed_scope_runs_immediately() {
        init_test("finalizer_added_to_closed_scope_runs_immediately");
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let program: Effect<()> = Scope::make().flat_map(move |scope: Scope| {
            let (before, after) = (Arc::clone(&l), Arc::clone(&l));
            scope
                .close(Exit::Success(()))
                .and_then(scope.add_finalizer(move |_| record(&before, "late")))
                .and_then(record(&after, "after"))
        });
        assert_eq!(LabRuntime::default().run(program), Exit::Success(()));
        assert_eq!(*log.lock(), vec!["late", "after"]);
        crate::test_complete!("finalizer_added_to_closed_scope_runs_immediately");
    }
}
