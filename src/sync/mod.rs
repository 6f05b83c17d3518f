//! Coordination primitives for fibers.
//!
//! # Primitives
//!
//! - [`Deferred`]: a one-shot value fibers can wait on
//! - [`Ref`]: a shared mutable cell with atomic single-cell updates
//!
//! Waiting never blocks a worker thread: a fiber waiting on a [`Deferred`]
//! is suspended and resumed by whoever completes it. For coordinated
//! updates of several cells use [`stm`](crate::stm).

mod deferred;
mod ref_cell;

pub use deferred::Deferred;
pub use ref_cell::Ref;
