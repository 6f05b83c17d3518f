#![allow(dead_code)]
#![allow(unused_imports)]
//! Helpers shared by the integration suites.
//!
//! ```ignore
//! #[macro_use]
//! mod common;
//! use common::*;
//! ```

use fibra::lab::{LabConfig, LabRuntime};
use fibra::runtime::{Runtime, RuntimeBuilder};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Seed of the lab returned by [`test_lab`].
pub const DEFAULT_TEST_SEED: u64 = 0xF1B2_A5EE;

/// Pins the proptest seed, e.g. to replay a CI failure.
const PROPTEST_SEED_ENV: &str = "FIBRA_PROPTEST_SEED";
/// Seed used on CI when `FIBRA_PROPTEST_SEED` is unset.
const CI_PROPTEST_SEED: u64 = 0x5EED_5EED;

/// Proptest settings with `cases` cases.
///
/// Runs are random locally and fixed on CI, so a CI failure always
/// reproduces with the same seed.
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    let pinned = std::env::var(PROPTEST_SEED_ENV)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .or_else(|| std::env::var_os("CI").map(|_| CI_PROPTEST_SEED));
    if let Some(seed) = pinned {
        config.rng_seed = RngSeed::Fixed(seed);
    }
    config
}

/// Routes `tracing` output to the test harness. `RUST_LOG` picks the
/// level, `debug` when unset.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fibra=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Lab runtime with the shared seed and FIFO scheduling.
#[must_use]
pub fn test_lab() -> LabRuntime {
    LabRuntime::new(LabConfig::new(DEFAULT_TEST_SEED))
}

/// Lab runtime that picks among ready fibers using `seed`.
#[must_use]
pub fn test_lab_shuffled(seed: u64) -> LabRuntime {
    LabRuntime::new(LabConfig::new(seed).shuffle_ready(true))
}

/// Threaded runtime with `workers` workers named `fibra-test-N`.
pub fn test_runtime(workers: usize) -> Runtime {
    init_test_logging();
    RuntimeBuilder::new()
        .worker_threads(workers)
        .thread_name_prefix("fibra-test")
        .build()
        .expect("failed to build test runtime")
}

/// Marks the start of a test in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "==== TEST PHASE: {} ====", $name);
    };
}

/// Marks a section inside a test.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Marks a test as finished.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::info!(test = %$name, $($key = %$value,)+ "test completed: {}", $name);
    };
}

/// Logs expected and actual values, then asserts `cond`.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(expected = ?$expected, actual = ?$actual, "checking: {}", $msg);
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Asserts that an exit succeeded with `expected`.
#[macro_export]
macro_rules! assert_exit_success {
    ($exit:expr, $expected:expr) => {
        match $exit {
            ::fibra::types::Exit::Success(v) => assert_eq!(v, $expected),
            other => panic!("expected Exit::Success({:?}), got {:?}", $expected, other),
        }
    };
}

/// Asserts that an exit failed because of an interruption.
#[macro_export]
macro_rules! assert_exit_interrupted {
    ($exit:expr) => {
        match &$exit {
            ::fibra::types::Exit::Failure(cause) if cause.is_interrupted() => {}
            other => panic!("expected an interruption, got {:?}", other),
        }
    };
}
