//! Real time, with a dedicated timer thread.

use super::timers::TimerQueue;
use super::{Clock, TimerCallback};
use crate::tracing_compat::{trace, warn};
use crate::types::{Time, TimerId};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Wall clock time source for production use.
///
/// The epoch is the time when this clock was created. Timer callbacks run
/// on a single background thread started by the first
/// [`schedule`](Clock::schedule); they must be short and must not block.
#[derive(Debug)]
pub struct WallClock {
    shared: Arc<WallShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct WallShared {
    epoch: Instant,
    state: Mutex<WallState>,
    cvar: Condvar,
}

#[derive(Default)]
struct WallState {
    timers: TimerQueue,
    shutdown: bool,
}

impl core::fmt::Debug for WallState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WallState")
            .field("pending", &self.timers.len())
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

impl WallShared {
    fn now(&self) -> Time {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Time::from_nanos(nanos)
    }

    fn run_timers(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            let now = self.now();
            if let Some(callback) = state.timers.pop_due(now) {
                MutexGuard::unlocked(&mut state, callback);
                continue;
            }
            match state.timers.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.duration_since(now);
                    let _ = self.cvar.wait_for(&mut state, wait);
                }
                None => self.cvar.wait(&mut state),
            }
        }
    }
}

impl WallClock {
    /// Creates a new wall clock time source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(WallShared {
                epoch: Instant::now(),
                state: Mutex::new(WallState::default()),
                cvar: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    fn ensure_thread(&self) {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        match std::thread::Builder::new()
            .name("fibra-timer".to_string())
            .spawn(move || shared.run_timers())
        {
            Ok(handle) => *thread = Some(handle),
            Err(err) => warn!(error = %err, "failed to spawn timer thread"),
        }
    }

    /// Stops the timer thread and drops every pending timer.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.timers.clear();
        }
        self.shared.cvar.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("timer thread panicked");
            }
        }
        trace!("wall clock shut down");
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> Time {
        self.shared.now()
    }

    fn schedule(&self, after: Duration, callback: TimerCallback) -> TimerId {
        self.ensure_thread();
        let deadline = self.now() + after;
        let id = self.shared.state.lock().timers.insert(deadline, callback);
        self.shared.cvar.notify_one();
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        self.shared.state.lock().timers.cancel(id)
    }
}

impl Drop for WallClock {
    fn drop(&mut self) {
        self.shutdown();
    }
}
