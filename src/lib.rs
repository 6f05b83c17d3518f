//! Fibra: interruptible fibers, scopes and software transactional memory.
//!
//! # Overview
//!
//! Fibra runs declarative computation descriptions ([`Effect`]s) as
//! lightweight fibers, cooperatively multiplexed onto a small pool of worker
//! threads. A fiber never blocks its worker: waiting on a callback, on
//! another fiber, on a [`Deferred`](sync::Deferred) or on a retrying
//! transaction suspends the fiber and frees the worker.
//!
//! # Core Guarantees
//!
//! - **Structured concurrency**: children are supervised by their parent and interrupted when it ends
//! - **Exactly-once finalization**: scope finalizers run once, in reverse order, under every exit path
//! - **Full failure reporting**: every terminal state is an [`Exit`] whose [`Cause`] keeps all failures, defects and interruptions
//! - **Fairness**: a fiber yields its worker after a bounded number of operations
//! - **Atomic multi-ref updates**: STM transactions commit all writes or none
//! - **Deterministic testing**: [`LabRuntime`] with virtual time and seeded scheduling
//!
//! # Module Structure
//!
//! - [`types`]: Identifiers, the cause algebra and exits
//! - [`effect`]: Computation descriptions and combinators
//! - [`fiber`]: Handles to running fibers
//! - [`scope`]: Finalizer registries
//! - [`fiber_ref`]: Fiber-local values with fork/join semantics
//! - [`runtime`]: The interpreter, scheduler and threaded runtime
//! - [`lab`]: Deterministic single-threaded runtime for tests
//! - [`stm`]: Transactional refs and structures built on them
//! - [`sync`]: One-shot deferred values and atomic refs
//! - [`time`]: Clocks driving `sleep` and timeouts
//! - [`error`]: Runtime error types
//! - [`util`]: Internal utilities (arenas, deterministic RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]

pub mod effect;
pub mod error;
pub mod fiber;
pub mod fiber_ref;
pub mod lab;
pub(crate) mod record;
pub mod runtime;
pub mod scope;
pub mod stm;
pub mod sync;
pub mod time;
pub mod tracing_compat;
pub mod types;
pub mod util;

#[cfg(test)]
#[macro_use]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use effect::{Data, Effect, LogLevel, Resume};
pub use error::{Error, ErrorCategory, ErrorKind, FiberFailure, Result, ResultExt};
pub use fiber::{Fiber, RuntimeFiber};
pub use fiber_ref::{FiberRef, FiberRefs};
pub use lab::{LabConfig, LabRuntime};
pub use runtime::{Runtime, RuntimeBuilder, RuntimeConfig};
pub use scope::Scope;
pub use stm::{Stm, TQueue, TRef, TReentrantLock, TSemaphore};
pub use sync::{Deferred, Ref};
pub use types::{Cause, Defect, Exit, FiberId, Time};
