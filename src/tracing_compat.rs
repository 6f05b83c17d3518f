//! Logging macros that work with or without the `tracing-integration`
//! feature.
//!
//! With the feature enabled these are the `tracing` macros. Without it they
//! expand to nothing, and span macros produce a [`NoopSpan`].
//!
//! ```rust,ignore
//! use fibra::tracing_compat::{debug, debug_span};
//!
//! let _span = debug_span!("fibra-worker", index = 0).entered();
//! debug!(fiber = %id, "fiber suspended");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, debug_span, error, info, trace, warn, Span};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! Expansions used when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    /// No-op debug_span macro.
    #[macro_export]
    macro_rules! debug_span {
        ($($arg:tt)*) => {
            $crate::tracing_compat::NoopSpan
        };
    }

    pub use crate::{debug, debug_span, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Stand-in for a span when tracing is disabled.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy)]
pub struct NoopSpan;

#[cfg(not(feature = "tracing-integration"))]
impl NoopSpan {
    /// Returns a guard that does nothing on drop.
    #[inline]
    #[must_use]
    pub fn enter(&self) -> NoopGuard {
        NoopGuard
    }

    /// Returns self.
    #[inline]
    #[must_use]
    pub fn entered(self) -> Self {
        self
    }

    /// Records nothing.
    #[inline]
    pub fn record<V>(&self, _field: &str, _value: V) {}
}

/// Guard returned by [`NoopSpan::enter`].
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug)]
pub struct NoopGuard;

/// Alias for [`NoopSpan`] when tracing is disabled.
#[cfg(not(feature = "tracing-integration"))]
pub type Span = NoopSpan;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    #[test]
    fn macros_accept_fields_and_messages() {
        init_test_logging();
        crate::test_phase!("macros_accept_fields_and_messages");
        trace!("trace message");
        debug!(fiber = 3, "debug with field");
        info!(name = "fibra", "info with field");
        warn!(pending = 2_usize, "warn with field");
        error!("error message");

        let span = debug_span!("fibra-worker", index = 0);
        let _guard = span.enter();
        crate::test_complete!("macros_accept_fields_and_messages");
    }
}
