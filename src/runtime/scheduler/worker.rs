//! Worker thread logic.

use crate::runtime::fiber_runtime::RunOutcome;
use crate::runtime::shared::{fatal, RuntimeShared};
use crate::tracing_compat::trace;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Identifier for a scheduler worker.
pub type WorkerId = usize;

/// A worker thread that runs fibers from the runtime's ready queue.
pub(crate) struct Worker {
    id: WorkerId,
    shared: Arc<RuntimeShared>,
    parking: bool,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, shared: Arc<RuntimeShared>, parking: bool) -> Self {
        Self {
            id,
            shared,
            parking,
        }
    }

    /// Runs fibers until the runtime shuts down.
    pub(crate) fn run_loop(&self) {
        trace!(worker_id = self.id, "worker started");
        while !self.shared.is_shutdown() {
            if let Some(fiber) = self.shared.next_ready() {
                trace!(fiber = %fiber.id(), worker_id = self.id, "running fiber");
                run_one(&self.shared, fiber);
                continue;
            }
            if self.parking {
                self.shared.parker().park();
            } else {
                std::thread::yield_now();
            }
        }
        trace!(worker_id = self.id, "worker stopped");
    }
}

/// Runs one slice of a fiber and re-enqueues it if it yielded.
pub(crate) fn run_one(shared: &RuntimeShared, fiber: Box<crate::runtime::fiber_runtime::FiberRuntime>) {
    match catch_unwind(AssertUnwindSafe(|| fiber.run())) {
        Ok(RunOutcome::Yielded(fiber)) => shared.schedule(fiber),
        Ok(RunOutcome::Suspended | RunOutcome::Done) => {}
        Err(_) => fatal("panic escaped the fiber interpreter"),
    }
}

/// A mechanism for parking and unparking idle workers.
#[derive(Debug)]
pub(crate) struct Parker {
    state: Mutex<ParkState>,
    cvar: Condvar,
}

#[derive(Debug, Default)]
struct ParkState {
    notified: bool,
    closed: bool,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ParkState::default()),
            cvar: Condvar::new(),
        }
    }

    /// Parks the current thread until notified. A notification that arrived
    /// since the last park is consumed without blocking. Never blocks once
    /// the parker is closed.
    pub(crate) fn park(&self) {
        let mut state = self.state.lock();
        while !state.notified && !state.closed {
            self.cvar.wait(&mut state);
        }
        state.notified = false;
    }

    /// Wakes one parked worker.
    pub(crate) fn unpark(&self) {
        self.state.lock().notified = true;
        self.cvar.notify_one();
    }

    /// Wakes every parked worker for good, for shutdown.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.cvar.notify_all();
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}
