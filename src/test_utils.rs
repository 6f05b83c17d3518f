//! Test utilities for fibra.
//!
//! This module provides shared helpers for unit tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Lab runtime constructors
//! - Exit assertion macros

use crate::lab::{LabConfig, LabRuntime};
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Default seed used by test lab helpers.
pub const DEFAULT_TEST_SEED: u64 = 0xDEAD_BEEF;

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Create a deterministic lab runtime for testing.
#[must_use]
pub fn test_lab() -> LabRuntime {
    LabRuntime::new(LabConfig::new(DEFAULT_TEST_SEED))
}

/// Create a lab runtime that picks runnable fibers in a seeded random order.
#[must_use]
pub fn test_lab_shuffled(seed: u64) -> LabRuntime {
    LabRuntime::new(LabConfig::new(seed).shuffle_ready(true))
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "==== TEST PHASE: {} ====", $name);
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(expected = ?$expected, actual = ?$actual, "checking: {}", $msg);
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an exit is a success with a specific value.
#[macro_export]
macro_rules! assert_exit_success {
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::types::Exit::Success(v) => assert_eq!(v, $expected),
            other => unreachable!("expected Exit::Success({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an exit failed with a typed failure.
#[macro_export]
macro_rules! assert_exit_failure {
    ($exit:expr) => {
        match $exit {
            $crate::types::Exit::Failure(ref cause) if cause.is_failure() => {}
            other => unreachable!("expected a typed failure, got {:?}", other),
        }
    };
}

/// Assert that an exit died with a defect.
#[macro_export]
macro_rules! assert_exit_die {
    ($exit:expr) => {
        match $exit {
            $crate::types::Exit::Failure(ref cause) if cause.is_die() => {}
            other => unreachable!("expected a defect, got {:?}", other),
        }
    };
}

/// Assert that an exit was interrupted.
#[macro_export]
macro_rules! assert_exit_interrupted {
    ($exit:expr) => {
        match $exit {
            $crate::types::Exit::Failure(ref cause) if cause.is_interrupted() => {}
            other => unreachable!("expected an interruption, got {:?}", other),
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::effect::Effect;
    use crate::types::Exit;

    #[test]
    fn exit_macros_match_their_variants() {
        super::init_test_logging();
        crate::test_phase!("exit_macros_match_their_variants");
        let mut lab = super::test_lab();
        crate::assert_exit_success!(lab.run(Effect::<u8, ()>::succeed(4)), 4);
        crate::assert_exit_failure!(lab.run(Effect::<u8, &str>::fail("no")));
        crate::assert_exit_die!(lab.run(Effect::<u8, ()>::die_message("boom")));
        crate::assert_exit_interrupted!(lab.run(Effect::<(), ()>::interrupt()));
        let exit: Exit<(), ()> = Exit::succeed(());
        crate::assert_exit_success!(exit, ());
        crate::test_complete!("exit_macros_match_their_variants");
    }
}
