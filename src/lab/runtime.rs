//! Lab runtime for deterministic execution.
//!
//! The lab runtime executes fibers with:
//! - Virtual time (controlled advancement)
//! - Deterministic scheduling (FIFO, or seed-driven when shuffling)
//! - Everything on the calling thread

use super::config::LabConfig;
use crate::effect::{Data, Effect};
use crate::fiber::RuntimeFiber;
use crate::fiber_ref::{FiberRef, FiberRefs};
use crate::runtime::fiber_runtime::FiberRuntime;
use crate::runtime::scheduler::run_one;
use crate::runtime::shared::RuntimeShared;
use crate::time::{Clock, VirtualClock};
use crate::tracing_compat::{debug, warn};
use crate::types::{Exit, Time};
use crate::util::DetRng;
use std::sync::Arc;
use std::time::Duration;

/// The deterministic lab runtime.
///
/// Fibers run only while a `run*` or `advance_time*` method is executing,
/// one slice at a time, on the calling thread. Time is a [`VirtualClock`]
/// that moves only when told to, or when [`run`](Self::run) finds every
/// fiber waiting on a timer.
pub struct LabRuntime {
    shared: Arc<RuntimeShared>,
    clock: Arc<VirtualClock>,
    config: LabConfig,
    rng: DetRng,
    steps: u64,
}

impl LabRuntime {
    /// Creates a new lab runtime with the given configuration.
    #[must_use]
    pub fn new(config: LabConfig) -> Self {
        let clock = Arc::new(VirtualClock::new());
        let mut refs = FiberRefs::default();
        refs.set(&FiberRef::max_ops_before_yield(), config.max_ops_before_yield);
        let dyn_clock: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        Self {
            shared: RuntimeShared::new(dyn_clock, refs),
            clock,
            rng: config.rng(),
            config,
            steps: 0,
        }
    }

    /// Creates a lab runtime with the default configuration and `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::new(LabConfig::new(seed))
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// The runtime's clock.
    #[must_use]
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Returns the number of steps executed.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns a reference to the configuration.
    #[must_use]
    pub const fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Number of fibers that have not completed.
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.shared.live_fibers()
    }

    /// Returns true if no fiber is runnable.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.shared.ready_len() == 0
    }

    /// Starts `effect` as a root fiber without running it.
    pub fn run_fork<A: Data, E: Data>(&mut self, effect: Effect<A, E>) -> RuntimeFiber<A, E> {
        RuntimeFiber::from_shared(self.shared.spawn_root(effect.into_node()))
    }

    /// Runs `effect` to completion and returns its exit.
    ///
    /// Whenever no fiber is runnable, virtual time jumps to the next timer
    /// deadline. If the root fiber can make no further progress at all it is
    /// interrupted; if even that cannot finish it, the exit is a defect.
    pub fn run<A: Data, E: Data>(&mut self, effect: Effect<A, E>) -> Exit<A, E> {
        let fiber = self.run_fork(effect);
        loop {
            self.run_until_quiescent();
            if let Some(exit) = fiber.poll() {
                return exit;
            }
            if self.step_limit_reached() {
                warn!(steps = self.steps, "lab step limit reached");
                return Exit::die_message(format!(
                    "lab runtime stopped after {} steps",
                    self.steps
                ));
            }
            if let Some(deadline) = self.clock.next_deadline() {
                self.clock.advance_to(deadline);
                continue;
            }
            debug!(fiber = %fiber.id(), "root fiber blocked forever, interrupting");
            fiber.interrupt();
            self.run_until_quiescent();
            return fiber.poll().unwrap_or_else(|| {
                Exit::die_message("lab runtime: root fiber blocked forever")
            });
        }
    }

    /// Runs fibers until none is runnable or the step limit is reached.
    /// Does not move time.
    ///
    /// Returns the number of steps executed.
    pub fn run_until_quiescent(&mut self) -> u64 {
        let start_steps = self.steps;
        while !self.step_limit_reached() {
            let Some(fiber) = self.next_fiber() else {
                break;
            };
            self.steps += 1;
            run_one(&self.shared, fiber);
        }
        self.steps - start_steps
    }

    /// Advances virtual time by `by`, firing due timers, then runs until
    /// quiescent.
    pub fn advance_time(&mut self, by: Duration) {
        self.clock.advance(by);
        self.run_until_quiescent();
    }

    /// Advances time to `time`, then runs until quiescent.
    pub fn advance_time_to(&mut self, time: Time) {
        self.clock.advance_to(time);
        self.run_until_quiescent();
    }

    fn step_limit_reached(&self) -> bool {
        self.config.max_steps.is_some_and(|max| self.steps >= max)
    }

    fn next_fiber(&mut self) -> Option<Box<FiberRuntime>> {
        if !self.config.shuffle_ready {
            return self.shared.next_ready();
        }
        let mut ready = Vec::with_capacity(self.shared.ready_len());
        while let Some(fiber) = self.shared.next_ready() {
            ready.push(fiber);
        }
        let chosen = ready.remove(self.rng.next_index(ready.len())?);
        for fiber in ready {
            self.shared.schedule(fiber);
        }
        Some(chosen)
    }
}

impl Default for LabRuntime {
    fn default() -> Self {
        Self::new(LabConfig::default())
    }
}

impl Drop for LabRuntime {
    fn drop(&mut self) {
        self.shared.shutdown();
        self.clock.clear();
    }
}

impl core::fmt::Debug for LabRuntime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LabRuntime")
            .field("now", &self.now())
            .field("steps", &self.steps)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
