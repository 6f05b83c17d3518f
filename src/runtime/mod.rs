//! The fiber scheduler and the threaded runtime.
//!
//! This module contains the core runtime machinery:
//!
//! - [`config`]: Runtime configuration types
//! - [`builder`]: Runtime builder and the threaded [`Runtime`]
//! - [`env_config`]: `FIBRA_*` environment overrides
//! - `fiber_runtime`: the interpreter loop of a single fiber
//! - `state`: the fiber and scope tables
//! - `scheduler`: the shared ready queue and its workers
//!
//! # Runtime Builder
//!
//! The runtime is configured with a fluent, move-based builder API. Each
//! builder method consumes `self` and returns an updated builder.
//!
//! ```
//! use fibra::effect::Effect;
//! use fibra::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new().worker_threads(2).build()?;
//! let exit = runtime.run_sync(Effect::<u32, ()>::succeed(41).map(|n| n + 1));
//! assert_eq!(exit.into_result(), Ok(42));
//! # Ok::<(), fibra::error::Error>(())
//! ```
//!
//! ## Single-Threaded
//!
//! ```
//! use fibra::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::current_thread().build()?;
//! assert_eq!(runtime.config().worker_threads, 1);
//! # Ok::<(), fibra::error::Error>(())
//! ```
//!
//! ## Environment Overrides
//!
//! ```no_run
//! use fibra::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new()
//!     .with_env_overrides()?
//!     .thread_name_prefix("app")
//!     .build()?;
//! # Ok::<(), fibra::error::Error>(())
//! ```
//!
//! # Configuration Reference (Defaults + Notes)
//!
//! - `worker_threads`: default = available parallelism (min 1). One worker is a single-threaded event loop.
//! - `thread_stack_size`: default = 2 MiB.
//! - `thread_name_prefix`: default = `fibra-worker`.
//! - `max_ops_before_yield`: default = 2048. Lower for fairness, higher for throughput.
//! - `enable_parking`: default = true. Disabling reduces wake latency at CPU cost.
//! - `on_thread_start/stop`: lifecycle hooks; keep work minimal.

pub mod builder;
pub mod config;
pub mod env_config;
pub(crate) mod fiber_runtime;
pub(crate) mod scheduler;
pub(crate) mod shared;
pub(crate) mod state;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::{ConfigError, RuntimeConfig};
pub use scheduler::WorkerId;
