//! Identifier types for runtime entities.
//!
//! Fibers and scopes live in arenas owned by the runtime state, so their ids
//! wrap an [`ArenaIndex`]: the slot plus the generation the slot had when the
//! record was created. The pair stays unique for the lifetime of a runtime
//! even though slots are recycled. Fiber refs, transactional refs and timers
//! are not arena-backed and use process-wide counters instead.

use crate::util::ArenaIndex;
use core::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_TREF_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a fiber.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(pub(crate) ArenaIndex);

impl FiberId {
    /// Id used for interruptions requested from outside any fiber.
    pub const NONE: Self = Self(ArenaIndex::new(u32::MAX, u32::MAX));

    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index (internal use).
    #[must_use]
    #[cfg(not(feature = "test-internals"))]
    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Returns the underlying arena index (internal use).
    #[must_use]
    #[cfg(feature = "test-internals")]
    pub const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// Creates a fiber id for tests and benchmarks.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(index, generation))
    }

    /// Returns true for [`FiberId::NONE`].
    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("FiberId(none)");
        }
        write!(f, "FiberId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("#none");
        }
        write!(f, "#{}.{}", self.0.index(), self.0.generation())
    }
}

/// Identity of a scope in the runtime's scope table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub(crate) ArenaIndex);

impl ScopeId {
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0.index())
    }
}

/// Identity of a fiber ref definition.
///
/// Ids below [`FiberRefId::FIRST_USER`] are reserved for the refs the runtime
/// itself reads.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FiberRefId(pub(crate) u64);

impl FiberRefId {
    pub(crate) const MAX_OPS_BEFORE_YIELD: Self = Self(0);
    pub(crate) const LOG_ANNOTATIONS: Self = Self(1);
    pub(crate) const FIRST_USER: u64 = 16;
}

/// Identity of a transactional ref. Commits lock refs in id order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TRefId(u64);

impl TRefId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TREF_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TRef{}", self.0)
    }
}

/// Handle for a scheduled clock callback.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TimerId(pub(crate) u64);

/// An instant on a runtime clock, in nanoseconds since the clock's epoch.
///
/// For [`WallClock`](crate::time::WallClock) the epoch is the clock's
/// creation; for [`VirtualClock`](crate::time::VirtualClock) it is virtual
/// time zero.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The epoch.
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a time from nanoseconds since the epoch.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Nanoseconds since the epoch.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Milliseconds since the epoch, truncated.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later.
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let nanos = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fiber_id_display() {
        let id = FiberId::new_for_test(3, 1);
        assert_eq!(id.to_string(), "#3.1");
        assert_eq!(FiberId::NONE.to_string(), "#none");
        assert!(FiberId::NONE.is_none());
        assert!(!id.is_none());
    }

    #[test]
    fn time_arithmetic_saturates() {
        let t = Time::from_millis(5) + Duration::from_millis(10);
        assert_eq!(t.as_millis(), 15);
        assert_eq!(Time::MAX + Duration::from_secs(1), Time::MAX);
        assert_eq!(
            Time::from_millis(3).duration_since(Time::from_millis(5)),
            Duration::ZERO
        );
    }

    #[test]
    fn time_display_units() {
        assert_eq!(Time::from_nanos(1_500_000_000).to_string(), "1.500s");
        assert_eq!(Time::from_millis(7).to_string(), "7ms");
        assert_eq!(Time::from_nanos(12).to_string(), "12ns");
    }

    #[test]
    fn tref_ids_are_monotonic() {
        let a = TRefId::next();
        let b = TRefId::next();
        assert!(a < b);
    }
}
