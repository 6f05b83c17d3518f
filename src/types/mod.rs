//! Core types: identifiers, the cause algebra and exits.

pub mod cause;
pub mod exit;
pub mod id;

pub use cause::{Cause, Defect, Squashed};
pub use exit::Exit;
pub use id::{FiberId, FiberRefId, ScopeId, TRefId, Time, TimerId};
