//! Fiber records.
//!
//! A fiber is visible from two places. The runtime's fiber table holds a
//! [`FiberRecord`] while the fiber is alive: its owned scope and where it is
//! supervised. Every handle holds an `Arc<FiberShared>`: status, pending
//! interruption, the parked interpreter while suspended, and the exit once
//! done. The shared part outlives the table entry so handles can read the
//! exit after the record is released.

use crate::effect::node::{ErasedCause, ErasedExit, NodeRef};
use crate::fiber_ref::FiberRefs;
use crate::runtime::fiber_runtime::{cancel_then_interrupt, FiberRuntime, Instr};
use crate::tracing_compat::debug;
use crate::types::{Cause, FiberId, ScopeId};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callback invoked once with a fiber's exit.
pub(crate) type Observer = Box<dyn FnOnce(&ErasedExit) + Send>;

/// Table entry for a live fiber.
pub(crate) struct FiberRecord {
    pub(crate) shared: Arc<FiberShared>,
    /// Scope supervising this fiber and the key of its entry there.
    pub(crate) supervisor: Option<(ScopeId, u64)>,
}

/// The lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FiberStatus {
    /// Queued or being interpreted.
    Running,
    /// Waiting in an `Async` registration.
    Suspended {
        /// Whether an interruption may cancel the wait.
        interruptible: bool,
    },
    /// Finished; the exit is available.
    Done,
}

pub(crate) struct FiberCell {
    status: FiberStatus,
    /// Bumped on every suspension and resumption so that stale resumes are
    /// ignored.
    epoch: u64,
    interruptors: Vec<FiberId>,
    parked: Option<Box<FiberRuntime>>,
    early_resume: Option<NodeRef>,
    canceler: Option<NodeRef>,
    exit: Option<ErasedExit>,
    final_refs: Option<FiberRefs>,
    observers: Vec<(u64, Observer)>,
    next_observer: u64,
}

impl FiberCell {
    /// Gives up a suspension that never parked.
    pub(crate) fn abandon_suspend(&mut self) {
        self.status = FiberStatus::Running;
        self.epoch += 1;
        self.early_resume = None;
        self.canceler = None;
    }

    /// Takes a resume that arrived while the registration was running.
    pub(crate) fn take_early_resume(&mut self) -> Option<NodeRef> {
        self.early_resume.take()
    }

    /// Parks the interpreter until resumed or interrupted.
    pub(crate) fn park(&mut self, runtime: Box<FiberRuntime>, canceler: Option<NodeRef>) {
        self.canceler = canceler;
        self.parked = Some(runtime);
    }
}

/// The part of a fiber shared with handles, resumes and observers.
pub(crate) struct FiberShared {
    id: FiberId,
    interrupt_requested: AtomicBool,
    cell: Mutex<FiberCell>,
}

impl FiberShared {
    pub(crate) fn new(id: FiberId) -> Self {
        Self {
            id,
            interrupt_requested: AtomicBool::new(false),
            cell: Mutex::new(FiberCell {
                status: FiberStatus::Running,
                epoch: 0,
                interruptors: Vec::new(),
                parked: None,
                early_resume: None,
                canceler: None,
                exit: None,
                final_refs: None,
                observers: Vec::new(),
                next_observer: 0,
            }),
        }
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn lock_cell(&self) -> MutexGuard<'_, FiberCell> {
        self.cell.lock()
    }

    pub(crate) fn status(&self) -> FiberStatus {
        self.cell.lock().status
    }

    pub(crate) fn interrupt_requested(&self) -> bool {
        self.interrupt_requested.load(Ordering::Acquire)
    }

    /// The interruption cause to fail with: every interruptor so far.
    pub(crate) fn interrupt_cause(&self) -> ErasedCause {
        let cell = self.cell.lock();
        if cell.interruptors.is_empty() {
            Cause::Interrupt(FiberId::NONE)
        } else {
            Cause::parallel_all(cell.interruptors.iter().copied().map(Cause::Interrupt))
        }
    }

    /// Marks the fiber suspended and returns the epoch the registration's
    /// resume is bound to.
    pub(crate) fn begin_suspend(&self, interruptible: bool) -> u64 {
        let mut cell = self.cell.lock();
        cell.epoch += 1;
        cell.status = FiberStatus::Suspended { interruptible };
        cell.epoch
    }

    /// Continues the suspension identified by `epoch` with `node`.
    pub(crate) fn resume(this: &Arc<Self>, epoch: u64, node: NodeRef) {
        let mut cell = this.cell.lock();
        let current = matches!(cell.status, FiberStatus::Suspended { .. }) && cell.epoch == epoch;
        if !current {
            return;
        }
        cell.epoch += 1;
        cell.status = FiberStatus::Running;
        cell.canceler = None;
        match cell.parked.take() {
            Some(mut runtime) => {
                drop(cell);
                runtime.set_next(Instr::Eval(node));
                runtime.reschedule();
            }
            None => cell.early_resume = Some(node),
        }
    }

    /// Requests interruption on behalf of `by`.
    ///
    /// A fiber suspended in an interruptible region is woken right away and
    /// runs its canceler before failing. Otherwise the request is latched and
    /// honored at the next checkpoint where the fiber is interruptible.
    pub(crate) fn interrupt_as(&self, by: FiberId) {
        let mut cell = self.cell.lock();
        if cell.status == FiberStatus::Done {
            return;
        }
        if !cell.interruptors.contains(&by) {
            cell.interruptors.push(by);
        }
        self.interrupt_requested.store(true, Ordering::Release);
        debug!(fiber = %self.id, by = %by, "interrupt requested");

        if cell.status != (FiberStatus::Suspended { interruptible: true }) {
            return;
        }
        let Some(mut runtime) = cell.parked.take() else {
            // Still registering; the suspending fiber re-checks the flag.
            return;
        };
        let canceler = cell.canceler.take();
        cell.status = FiberStatus::Running;
        cell.epoch += 1;
        drop(cell);
        runtime.set_next(Instr::Eval(cancel_then_interrupt(canceler)));
        runtime.reschedule();
    }

    /// Registers an observer of the exit. If the fiber is already done the
    /// observer runs immediately and `None` is returned.
    pub(crate) fn add_observer(&self, observer: Observer) -> Option<u64> {
        let mut cell = self.cell.lock();
        if let Some(exit) = cell.exit.clone() {
            drop(cell);
            observer(&exit);
            return None;
        }
        let key = cell.next_observer;
        cell.next_observer += 1;
        cell.observers.push((key, observer));
        Some(key)
    }

    pub(crate) fn remove_observer(&self, key: u64) {
        self.cell.lock().observers.retain(|(k, _)| *k != key);
    }

    /// The exit, if the fiber is done.
    pub(crate) fn poll(&self) -> Option<ErasedExit> {
        self.cell.lock().exit.clone()
    }

    /// The fiber's refs as they were when it completed.
    pub(crate) fn final_refs(&self) -> Option<FiberRefs> {
        self.cell.lock().final_refs.clone()
    }

    /// Records the exit and hands back the observers to notify, in
    /// registration order.
    pub(crate) fn complete(&self, exit: ErasedExit, refs: FiberRefs) -> Vec<Observer> {
        let mut cell = self.cell.lock();
        cell.status = FiberStatus::Done;
        cell.exit = Some(exit);
        cell.final_refs = Some(refs);
        cell.canceler = None;
        std::mem::take(&mut cell.observers)
            .into_iter()
            .map(|(_, observer)| observer)
            .collect()
    }

    /// Drops a parked interpreter during runtime shutdown.
    pub(crate) fn take_parked(&self) -> Option<Box<FiberRuntime>> {
        self.cell.lock().parked.take()
    }
}

impl core::fmt::Debug for FiberShared {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FiberShared")
            .field("id", &self.id)
            .field("interrupt_requested", &self.interrupt_requested())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::node::{unit_value, value};
    use crate::types::Exit;
    use std::sync::atomic::AtomicUsize;

    fn shared(n: u32) -> FiberShared {
        FiberShared::new(FiberId::new_for_test(n, 0))
    }

    #[test]
    fn observers_run_in_registration_order() {
        let fiber = shared(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            assert!(fiber
                .add_observer(Box::new(move |_| order.lock().push(i)))
                .is_some());
        }
        let observers = fiber.complete(Exit::Success(unit_value()), FiberRefs::default());
        let exit = Exit::Success(unit_value());
        for observer in observers {
            observer(&exit);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn observer_added_after_completion_runs_immediately() {
        let fiber = shared(2);
        let _ = fiber.complete(Exit::Success(value(7_u8)), FiberRefs::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let key = fiber.add_observer(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(key.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(fiber.status(), FiberStatus::Done);
    }

    #[test]
    fn removed_observer_is_not_called() {
        let fiber = shared(3);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let key = fiber
            .add_observer(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("fiber still running");
        fiber.remove_observer(key);
        assert!(fiber
            .complete(Exit::Success(unit_value()), FiberRefs::default())
            .is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn interruptors_accumulate_without_duplicates() {
        let fiber = shared(4);
        let a = FiberId::new_for_test(10, 0);
        let b = FiberId::new_for_test(11, 0);
        fiber.interrupt_as(a);
        fiber.interrupt_as(a);
        fiber.interrupt_as(b);
        assert!(fiber.interrupt_requested());
        let cause = fiber.interrupt_cause();
        assert_eq!(cause.interruptors().into_iter().collect::<Vec<_>>(), vec![a, b]);
        assert!(cause.is_interrupted_only());
    }

    #[test]
    fn many_interruptors_build_a_shallow_cause() {
        let fiber = shared(6);
        for n in 0..5_000 {
            fiber.interrupt_as(FiberId::new_for_test(100 + n, 0));
        }
        let cause = fiber.interrupt_cause();
        assert_eq!(cause.interruptors().len(), 5_000);
        assert_eq!(cause.clone(), cause);
    }

    #[test]
    fn stale_resume_is_ignored() {
        let fiber = Arc::new(shared(5));
        let first = fiber.begin_suspend(true);
        FiberShared::resume(&fiber, first, crate::effect::node::unit_node());
        assert_eq!(fiber.status(), FiberStatus::Running);
        assert!(fiber.lock_cell().take_early_resume().is_some());

        // A second resume for the same suspension does nothing.
        FiberShared::resume(&fiber, first, crate::effect::node::unit_node());
        assert!(fiber.lock_cell().take_early_resume().is_none());
    }
}
