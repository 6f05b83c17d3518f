//! Scope records: the ledger behind [`Scope`](crate::scope::Scope).
//!
//! A scope owns entries in registration order: finalizers, child scopes and
//! supervised fibers. Closing takes every entry out at once and releases
//! them in reverse order. The record itself is pure bookkeeping; running the
//! entries is done by the closing fiber (see `scope::close_node`).

use crate::effect::node::NodeRef;
use crate::types::{Exit, FiberId, ScopeId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A finalizer: given the exit the scope closes with, the cleanup to run.
pub(crate) type Finalizer = Arc<dyn Fn(&Exit<(), ()>) -> NodeRef + Send + Sync>;

/// One thing a scope is responsible for.
#[derive(Clone)]
pub(crate) enum ScopeEntry {
    Finalizer(Finalizer),
    Scope(ScopeId),
    Fiber(FiberId),
}

impl core::fmt::Debug for ScopeEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Finalizer(_) => f.write_str("Finalizer(..)"),
            Self::Scope(id) => write!(f, "Scope({id})"),
            Self::Fiber(id) => write!(f, "Fiber({id})"),
        }
    }
}

/// Lifecycle of a scope. A closed scope is removed from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeState {
    Open,
    Closing,
}

#[derive(Debug)]
pub(crate) struct ScopeRecord {
    /// Parent scope and the key of this scope's entry there.
    pub(crate) parent: Option<(ScopeId, u64)>,
    state: ScopeState,
    entries: BTreeMap<u64, ScopeEntry>,
    next_key: u64,
}

impl ScopeRecord {
    pub(crate) fn new(parent: Option<(ScopeId, u64)>) -> Self {
        Self {
            parent,
            state: ScopeState::Open,
            entries: BTreeMap::new(),
            next_key: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ScopeState {
        self.state
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state == ScopeState::Open
    }

    /// Appends an entry. Returns its key, or hands the entry back if the
    /// scope is already closing.
    pub(crate) fn add(&mut self, entry: ScopeEntry) -> Result<u64, ScopeEntry> {
        if !self.is_open() {
            return Err(entry);
        }
        let key = self.next_key;
        self.next_key += 1;
        self.entries.insert(key, entry);
        Ok(key)
    }

    pub(crate) fn remove(&mut self, key: u64) -> Option<ScopeEntry> {
        self.entries.remove(&key)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Moves to `Closing` and takes the entries in registration order.
    /// Returns `None` if the scope was already closing.
    pub(crate) fn begin_close(&mut self) -> Option<Vec<ScopeEntry>> {
        if !self.is_open() {
            return None;
        }
        self.state = ScopeState::Closing;
        Some(std::mem::take(&mut self.entries).into_values().collect())
    }
}
