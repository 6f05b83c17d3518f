//! Virtual time for the lab runtime.

use super::timers::TimerQueue;
use super::{Clock, TimerCallback};
use crate::types::{Time, TimerId};
use parking_lot::Mutex;
use std::time::Duration;

/// Virtual time source for lab testing.
///
/// Time only advances when explicitly told to do so, enabling
/// deterministic testing of time-dependent code. Timers fire during
/// [`advance`](Self::advance) in deadline order, each one with the clock set
/// to its deadline.
///
/// # Example
///
/// ```
/// use fibra::time::{Clock, VirtualClock};
/// use fibra::types::Time;
/// use std::time::Duration;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
///
/// clock.advance(Duration::from_secs(1));
/// assert_eq!(clock.now(), Time::from_millis(1_000));
/// ```
#[derive(Default)]
pub struct VirtualClock {
    inner: Mutex<VirtualState>,
}

#[derive(Default)]
struct VirtualState {
    now: Time,
    timers: TimerQueue,
}

impl VirtualClock {
    /// Creates a new virtual clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances time by `by`, firing every timer that falls due.
    pub fn advance(&self, by: Duration) {
        let target = self.now() + by;
        self.advance_to(target);
    }

    /// Advances time to `target`, firing every timer due by then. Moving
    /// backwards is a no-op.
    pub fn advance_to(&self, target: Time) {
        loop {
            let callback = {
                let mut state = self.inner.lock();
                match state.timers.next_deadline() {
                    Some(deadline) if deadline <= target => {
                        if deadline > state.now {
                            state.now = deadline;
                        }
                        let now = state.now;
                        state.timers.pop_due(now)
                    }
                    _ => {
                        if target > state.now {
                            state.now = target;
                        }
                        return;
                    }
                }
            };
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// The deadline of the earliest pending timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.inner.lock().timers.next_deadline()
    }

    /// Number of pending timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.lock().timers.len()
    }

    /// Drops every pending timer without running it.
    pub fn clear(&self) {
        self.inner.lock().timers.clear();
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Time {
        self.inner.lock().now
    }

    fn schedule(&self, after: Duration, callback: TimerCallback) -> TimerId {
        let mut state = self.inner.lock();
        let deadline = state.now + after;
        state.timers.insert(deadline, callback)
    }

    fn cancel(&self, id: TimerId) -> bool {
        self.inner.lock().timers.cancel(id)
    }
}

impl core::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("VirtualClock")
            .field("now", &state.now)
            .field("pending", &state.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn timers_fire_at_their_deadline() {
        let clock = Arc::new(VirtualClock::new());
        let seen = Arc::new(AtomicU64::new(0));
        {
            let clock2 = Arc::clone(&clock);
            let seen = Arc::clone(&seen);
            clock.schedule(
                Duration::from_millis(30),
                Box::new(move || seen.store(clock2.now().as_millis(), Ordering::SeqCst)),
            );
        }
        clock.advance(Duration::from_millis(10));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        clock.advance(Duration::from_millis(50));
        assert_eq!(seen.load(Ordering::SeqCst), 30);
        assert_eq!(clock.now(), Time::from_millis(60));
    }

    #[test]
    fn callback_scheduling_another_timer_in_range_fires_it() {
        let clock = Arc::new(VirtualClock::new());
        let hits = Arc::new(AtomicU64::new(0));
        {
            let inner_clock = Arc::clone(&clock);
            let hits = Arc::clone(&hits);
            clock.schedule(
                Duration::from_millis(5),
                Box::new(move || {
                    let hits = Arc::clone(&hits);
                    inner_clock.schedule(
                        Duration::from_millis(5),
                        Box::new(move || {
                            hits.fetch_add(1, Ordering::SeqCst);
                        }),
                    );
                }),
            );
        }
        clock.advance(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn advance_to_the_past_is_a_no_op() {
        let clock = VirtualClock::new();
        clock.advance(Duration::from_millis(5));
        clock.advance_to(Time::from_millis(1));
        assert_eq!(clock.now(), Time::from_millis(5));
    }
}
