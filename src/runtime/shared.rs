//! State shared by every fiber and worker of one runtime.

use crate::effect::node::NodeRef;
use crate::fiber_ref::FiberRefs;
use crate::record::{FiberShared, ScopeEntry};
use crate::runtime::fiber_runtime::FiberRuntime;
use crate::runtime::scheduler::{GlobalQueue, Parker};
use crate::runtime::state::RuntimeState;
use crate::time::Clock;
use crate::tracing_compat::{error, trace};
use crate::types::{FiberId, ScopeId};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Logs a broken scheduler invariant and aborts the process.
///
/// Reserved for states the interpreter cannot continue from; failures of
/// user code never reach this.
#[cold]
pub(crate) fn fatal(message: &str) -> ! {
    error!(reason = message, "fatal runtime error");
    eprintln!("fibra: fatal runtime error: {message}");
    std::process::abort()
}

pub(crate) struct RuntimeShared {
    state: Mutex<RuntimeState>,
    ready: GlobalQueue,
    parker: Parker,
    clock: Arc<dyn Clock>,
    initial_refs: FiberRefs,
    root_scope: ScopeId,
    shutdown: AtomicBool,
}

impl RuntimeShared {
    pub(crate) fn new(clock: Arc<dyn Clock>, initial_refs: FiberRefs) -> Arc<Self> {
        let state = RuntimeState::new();
        let root_scope = state.root_scope();
        Arc::new(Self {
            state: Mutex::new(state),
            ready: GlobalQueue::new(),
            parker: Parker::new(),
            clock,
            initial_refs,
            root_scope,
            shutdown: AtomicBool::new(false),
        })
    }

    pub(crate) fn root_scope(&self) -> ScopeId {
        self.root_scope
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock()
    }

    pub(crate) fn parker(&self) -> &Parker {
        &self.parker
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Starts a top-level fiber with the runtime's initial refs, supervised
    /// by the root scope.
    pub(crate) fn spawn_root(self: &Arc<Self>, effect: NodeRef) -> Arc<FiberShared> {
        self.spawn(effect, self.initial_refs.clone(), None, self.root_scope, true)
    }

    /// Creates a fiber supervised by `supervisor` and enqueues it. The fiber
    /// starts with the given interruptibility, usually its parent's.
    pub(crate) fn spawn(
        self: &Arc<Self>,
        effect: NodeRef,
        refs: FiberRefs,
        parent: Option<FiberId>,
        supervisor: ScopeId,
        interruptible: bool,
    ) -> Arc<FiberShared> {
        let (shared, owned_scope, accepted) = self.state.lock().insert_fiber(supervisor);
        trace!(
            fiber = %shared.id(),
            parent = ?parent,
            supervisor = %supervisor,
            interruptible,
            "fiber spawned"
        );
        if !accepted {
            // The supervisor is already closing: the child starts interrupted.
            shared.interrupt_as(parent.unwrap_or(FiberId::NONE));
        }
        let runtime = FiberRuntime::new(
            Arc::clone(&shared),
            Arc::clone(self),
            effect,
            refs,
            owned_scope,
            interruptible,
        );
        self.schedule(runtime);
        shared
    }

    /// Enqueues a runnable fiber. After shutdown the fiber is dropped.
    pub(crate) fn schedule(&self, fiber: Box<FiberRuntime>) {
        if self.is_shutdown() {
            return;
        }
        self.ready.push(fiber);
        self.parker.unpark();
    }

    pub(crate) fn next_ready(&self) -> Option<Box<FiberRuntime>> {
        self.ready.pop()
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn fiber_completed(&self, id: FiberId) {
        self.state.lock().remove_fiber(id);
    }

    pub(crate) fn lookup_fiber(&self, id: FiberId) -> Option<Arc<FiberShared>> {
        self.state
            .lock()
            .fiber(id)
            .map(|record| Arc::clone(&record.shared))
    }

    pub(crate) fn open_scope(&self, parent: Option<ScopeId>) -> ScopeId {
        self.state.lock().open_scope(parent)
    }

    pub(crate) fn add_scope_entry(&self, scope: ScopeId, entry: ScopeEntry) -> Result<u64, ScopeEntry> {
        self.state.lock().add_entry(scope, entry)
    }

    /// Number of fibers that have not completed.
    pub(crate) fn live_fibers(&self) -> usize {
        self.state.lock().fiber_count()
    }

    /// Stops scheduling new work and wakes every parked worker so it can
    /// exit.
    pub(crate) fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.parker.close();
    }

    /// Stops the runtime and drops every queued or parked fiber.
    ///
    /// Parked and queued interpreters hold the runtime; dropping them here
    /// breaks that cycle. Call once no worker is running fibers.
    pub(crate) fn shutdown(&self) {
        self.stop();
        while self.ready.pop().is_some() {}
        let records = self.state.lock().drain_fibers();
        let parked: Vec<_> = records
            .iter()
            .filter_map(|record| record.shared.take_parked())
            .collect();
        trace!(
            fibers = records.len(),
            parked = parked.len(),
            "runtime shut down"
        );
        drop(parked);
    }
}

impl core::fmt::Debug for RuntimeShared {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RuntimeShared")
            .field("root_scope", &self.root_scope)
            .field("ready", &self.ready.len())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
