//! Internal records for runtime entities.
//!
//! These are the bookkeeping structures behind fibers and scopes. They are
//! implementation details and not part of the public API.

pub(crate) mod fiber;
pub(crate) mod scope;

pub(crate) use fiber::{FiberRecord, FiberShared};
pub(crate) use scope::{Finalizer, ScopeEntry, ScopeRecord};
