//! Deterministic lab runtime for testing.
//!
//! The lab runtime provides:
//!
//! - Virtual time (no wall-clock dependencies)
//! - Deterministic scheduling (same seed, same execution)
//! - Single-threaded execution driven by the caller
//!
//! ```
//! use fibra::effect::Effect;
//! use fibra::lab::LabRuntime;
//! use std::time::Duration;
//!
//! let mut lab = LabRuntime::default();
//! let exit = lab.run(Effect::<(), ()>::sleep(Duration::from_secs(5)).as_("done"));
//! assert_eq!(exit.into_result(), Ok("done"));
//! assert_eq!(lab.now().as_millis(), 5_000);
//! ```

pub mod config;
pub mod runtime;

pub use config::LabConfig;
pub use runtime::LabRuntime;
