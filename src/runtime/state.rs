//! Runtime state: the fiber table and the scope table.
//!
//! Both tables are generational arenas. Scopes refer to fibers and to other
//! scopes by id only, so completing a fiber or closing a scope never leaves a
//! dangling owner: stale ids simply stop resolving.

use crate::record::{FiberRecord, FiberShared, ScopeEntry, ScopeRecord};
use crate::tracing_compat::trace;
use crate::types::{FiberId, ScopeId};
use crate::util::Arena;
use std::sync::Arc;

/// The live fibers and scopes of one runtime.
pub(crate) struct RuntimeState {
    fibers: Arena<FiberRecord>,
    scopes: Arena<ScopeRecord>,
    root_scope: ScopeId,
}

impl RuntimeState {
    pub(crate) fn new() -> Self {
        let mut scopes = Arena::new();
        let root_scope = ScopeId::from_arena(scopes.insert(ScopeRecord::new(None)));
        Self {
            fibers: Arena::new(),
            scopes,
            root_scope,
        }
    }

    /// The scope supervising daemon fibers and root fibers.
    pub(crate) fn root_scope(&self) -> ScopeId {
        self.root_scope
    }

    pub(crate) fn fiber(&self, id: FiberId) -> Option<&FiberRecord> {
        self.fibers.get(id.arena_index())
    }

    pub(crate) fn fiber_count(&self) -> usize {
        self.fibers.len()
    }

    #[cfg(test)]
    pub(crate) fn scope(&self, id: ScopeId) -> Option<&ScopeRecord> {
        self.scopes.get(id.arena_index())
    }

    /// Opens a scope, registered as the newest entry of `parent` when the
    /// parent is open. A scope under a closing parent is left detached; its
    /// opener still closes it.
    pub(crate) fn open_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId::from_arena(self.scopes.insert(ScopeRecord::new(None)));
        if let Some(parent) = parent {
            if let Ok(key) = self.add_entry(parent, ScopeEntry::Scope(id)) {
                if let Some(record) = self.scopes.get_mut(id.arena_index()) {
                    record.parent = Some((parent, key));
                }
            }
        }
        id
    }

    /// Appends an entry to an open scope. The entry is handed back if the
    /// scope is closing or gone.
    pub(crate) fn add_entry(&mut self, scope: ScopeId, entry: ScopeEntry) -> Result<u64, ScopeEntry> {
        match self.scopes.get_mut(scope.arena_index()) {
            Some(record) => record.add(entry),
            None => Err(entry),
        }
    }

    pub(crate) fn remove_entry(&mut self, scope: ScopeId, key: u64) {
        if let Some(record) = self.scopes.get_mut(scope.arena_index()) {
            record.remove(key);
        }
    }

    /// Starts closing `scope`, taking its entries in registration order.
    /// `None` if the scope is already closing or closed.
    pub(crate) fn begin_close(&mut self, scope: ScopeId) -> Option<Vec<ScopeEntry>> {
        self.scopes.get_mut(scope.arena_index())?.begin_close()
    }

    /// Releases a scope whose entries have all been run.
    pub(crate) fn finish_close(&mut self, scope: ScopeId) {
        let Some(record) = self.scopes.remove(scope.arena_index()) else {
            return;
        };
        if let Some((parent, key)) = record.parent {
            self.remove_entry(parent, key);
        }
        trace!(scope = %scope, "scope closed");
    }

    /// Creates the record of a new fiber supervised by `supervisor`.
    ///
    /// Returns the shared part and whether the supervisor accepted the
    /// fiber. A fiber spawned into a closing scope must be interrupted by
    /// the caller.
    pub(crate) fn insert_fiber(&mut self, supervisor: ScopeId) -> (Arc<FiberShared>, ScopeId, bool) {
        let owned = ScopeId::from_arena(self.scopes.insert(ScopeRecord::new(None)));
        let index = self.fibers.insert_with(|index| FiberRecord {
            shared: Arc::new(FiberShared::new(FiberId::from_arena(index))),
            supervisor: None,
        });
        let id = FiberId::from_arena(index);
        let accepted = match self.add_entry(supervisor, ScopeEntry::Fiber(id)) {
            Ok(key) => {
                if let Some(record) = self.fibers.get_mut(index) {
                    record.supervisor = Some((supervisor, key));
                }
                true
            }
            Err(_) => false,
        };
        let shared = self
            .fibers
            .get(index)
            .map(|record| Arc::clone(&record.shared))
            .unwrap_or_else(|| Arc::new(FiberShared::new(id)));
        (shared, owned, accepted)
    }

    /// Releases a completed fiber's record and its supervision entry.
    pub(crate) fn remove_fiber(&mut self, id: FiberId) -> Option<FiberRecord> {
        let record = self.fibers.remove(id.arena_index())?;
        if let Some((scope, key)) = record.supervisor {
            self.remove_entry(scope, key);
        }
        Some(record)
    }

    /// Takes every fiber record, for shutdown.
    pub(crate) fn drain_fibers(&mut self) -> Vec<FiberRecord> {
        self.fibers.drain()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::scope::ScopeState;

    #[test]
    fn child_scope_is_an_entry_of_its_parent() {
        let mut state = RuntimeState::new();
        let root = state.root_scope();
        let child = state.open_scope(Some(root));
        assert_eq!(state.scope(root).map(ScopeRecord::len), Some(1));

        let entries = state.begin_close(child).expect("open");
        assert!(entries.is_empty());
        assert_eq!(state.scope(child).map(ScopeRecord::state), Some(ScopeState::Closing));
        state.finish_close(child);
        assert!(state.scope(child).is_none());
        assert_eq!(state.scope(root).map(ScopeRecord::len), Some(0));
    }

    #[test]
    fn fiber_into_closing_scope_is_rejected() {
        let mut state = RuntimeState::new();
        let scope = state.open_scope(None);
        let _ = state.begin_close(scope);
        let (shared, owned, accepted) = state.insert_fiber(scope);
        assert!(!accepted);
        assert!(state.fiber(shared.id()).is_some());
        assert!(state.scope(owned).is_some());
    }

    #[test]
    fn removing_fiber_unlinks_supervisor_entry() {
        let mut state = RuntimeState::new();
        let root = state.root_scope();
        let (shared, _, accepted) = state.insert_fiber(root);
        assert!(accepted);
        assert_eq!(state.fiber_count(), 1);
        assert!(state.remove_fiber(shared.id()).is_some());
        assert_eq!(state.fiber_count(), 0);
        assert_eq!(state.scope(root).map(ScopeRecord::len), Some(0));
        assert!(state.remove_fiber(shared.id()).is_none());
    }
}
