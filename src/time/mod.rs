//! Clocks: the time source and timer service fibers sleep on.
//!
//! A runtime talks to time only through the [`Clock`] trait:
//! - [`WallClock`]: real time, with one timer thread firing callbacks
//! - [`VirtualClock`]: time that moves only when told to, for the lab
//!
//! [`Effect::sleep`](crate::effect::Effect::sleep) schedules a callback on
//! the running fiber's clock and suspends; interrupting the sleep cancels
//! the timer.

mod sleep;
mod timers;
mod virtual_clock;
mod wall_clock;

pub use virtual_clock::VirtualClock;
pub use wall_clock::WallClock;

use crate::types::{Time, TimerId};
use core::fmt;
use std::time::Duration;

/// A one-shot timer callback.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Time source and timer service.
pub trait Clock: Send + Sync + fmt::Debug {
    /// The current time.
    fn now(&self) -> Time;

    /// Arranges for `callback` to run once `after` has elapsed.
    fn schedule(&self, after: Duration, callback: TimerCallback) -> TimerId;

    /// Cancels a pending timer. Returns `false` if it already fired or was
    /// cancelled.
    fn cancel(&self, id: TimerId) -> bool;
}
