//! Transaction journals and the commit protocol.
//!
//! A transaction never touches a ref's committed value directly. The first
//! access to a ref copies its value and version into the journal; later
//! reads and writes go to that copy. Commit locks every journaled ref in id
//! order, checks that no version moved, publishes the dirty values with a
//! bumped version and finally, with the locks released, wakes the fibers
//! whose retry depended on those refs.

use crate::effect::node::Value;
use crate::tracing_compat::trace;
use crate::types::{Defect, FiberId, TRefId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback run once a ref a retrying transaction read has changed.
pub(crate) type Wake = Arc<dyn Fn() + Send + Sync>;

static NEXT_WAITER: AtomicU64 = AtomicU64::new(0);

/// Committed state of one transactional ref.
pub(crate) struct TRefCore {
    id: TRefId,
    state: Mutex<TRefState>,
}

struct TRefState {
    version: u64,
    value: Value,
    waiters: Vec<(u64, Wake)>,
}

impl TRefCore {
    pub(crate) fn new(value: Value) -> Arc<Self> {
        Arc::new(Self {
            id: TRefId::next(),
            state: Mutex::new(TRefState {
                version: 0,
                value,
                waiters: Vec::new(),
            }),
        })
    }

    pub(crate) fn id(&self) -> TRefId {
        self.id
    }

    /// The committed value, outside of any transaction.
    pub(crate) fn snapshot(&self) -> Value {
        Arc::clone(&self.state.lock().value)
    }

    fn version(&self) -> u64 {
        self.state.lock().version
    }

    fn remove_waiter(&self, key: u64) {
        self.state.lock().waiters.retain(|(k, _)| *k != key);
    }
}

/// Why a transaction attempt stopped before producing a value.
pub(crate) enum Abort<E> {
    /// A typed failure.
    Fail(E),
    /// A defect.
    Die(Defect),
    /// The transaction asked to wait for one of its reads to change.
    Retry,
    /// A read saw a ref that moved since the journal first read it.
    Conflict,
}

#[derive(Clone)]
struct Entry {
    core: Arc<TRefCore>,
    version: u64,
    read: Value,
    current: Value,
    dirty: bool,
}

/// Writes of a journal at some point, restorable with
/// [`Journal::rollback`].
pub(crate) struct Checkpoint {
    entries: BTreeMap<TRefId, Entry>,
}

/// The private view one transaction attempt has of the refs it touched.
pub(crate) struct Journal {
    fiber: FiberId,
    entries: BTreeMap<TRefId, Entry>,
}

/// Result of [`Journal::commit`].
pub(crate) enum CommitOutcome {
    Committed,
    Conflict,
}

impl Journal {
    pub(crate) fn new(fiber: FiberId) -> Self {
        Self {
            fiber,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn fiber_id(&self) -> FiberId {
        self.fiber
    }

    /// Reads `core` through the journal.
    pub(crate) fn read<E>(&mut self, core: &Arc<TRefCore>) -> Result<Value, Abort<E>> {
        if let Some(entry) = self.entries.get(&core.id) {
            return Ok(Arc::clone(&entry.current));
        }
        let (version, value) = {
            let state = core.state.lock();
            (state.version, Arc::clone(&state.value))
        };
        // A transaction that already observed a stale ref cannot commit;
        // stop before user code sees an inconsistent snapshot.
        if !self.is_valid() {
            return Err(Abort::Conflict);
        }
        self.entries.insert(
            core.id,
            Entry {
                core: Arc::clone(core),
                version,
                read: Arc::clone(&value),
                current: Arc::clone(&value),
                dirty: false,
            },
        );
        Ok(value)
    }

    /// Writes `value` to `core` through the journal.
    pub(crate) fn write<E>(&mut self, core: &Arc<TRefCore>, value: Value) -> Result<(), Abort<E>> {
        self.read::<E>(core)?;
        if let Some(entry) = self.entries.get_mut(&core.id) {
            entry.current = value;
            entry.dirty = true;
        }
        Ok(())
    }

    /// True if no journaled ref has moved since it was first read.
    pub(crate) fn is_valid(&self) -> bool {
        self.entries
            .values()
            .all(|entry| entry.core.version() == entry.version)
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            entries: self.entries.clone(),
        }
    }

    /// Discards writes made since `checkpoint`. Refs first read after it
    /// stay in the journal as plain reads.
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        for (id, entry) in &mut self.entries {
            match checkpoint.entries.get(id) {
                Some(saved) => {
                    entry.current = Arc::clone(&saved.current);
                    entry.dirty = saved.dirty;
                }
                None => {
                    entry.current = Arc::clone(&entry.read);
                    entry.dirty = false;
                }
            }
        }
    }

    /// Validates and publishes the journal atomically.
    pub(crate) fn commit(self) -> CommitOutcome {
        let mut guards: Vec<(MutexGuard<'_, TRefState>, &Entry)> = self
            .entries
            .values()
            .map(|entry| (entry.core.state.lock(), entry))
            .collect();
        if guards
            .iter()
            .any(|(state, entry)| state.version != entry.version)
        {
            trace!(fiber = %self.fiber, refs = guards.len(), "stm commit conflict");
            return CommitOutcome::Conflict;
        }
        let mut woken: Vec<Wake> = Vec::new();
        for (state, entry) in &mut guards {
            if entry.dirty {
                state.value = Arc::clone(&entry.current);
                state.version += 1;
                woken.extend(state.waiters.drain(..).map(|(_, wake)| wake));
            }
        }
        drop(guards);
        for wake in woken {
            wake();
        }
        CommitOutcome::Committed
    }

    /// The refs read by this journal with the versions observed.
    pub(crate) fn read_set(&self) -> ReadSet {
        ReadSet {
            entries: self
                .entries
                .values()
                .map(|entry| (Arc::clone(&entry.core), entry.version))
                .collect(),
        }
    }
}

/// The refs a retrying transaction depends on.
#[derive(Clone)]
pub(crate) struct ReadSet {
    entries: Arc<[(Arc<TRefCore>, u64)]>,
}

/// Registration of a retrying transaction on its read set.
pub(crate) struct Registration {
    key: u64,
    entries: Arc<[(Arc<TRefCore>, u64)]>,
}

impl Registration {
    pub(crate) fn cancel(&self) {
        for (core, _) in self.entries.iter() {
            core.remove_waiter(self.key);
        }
    }
}

impl ReadSet {
    /// Registers `wake` on every ref of the set, unless one of them has
    /// already changed, in which case nothing is registered and `None` is
    /// returned. `wake` runs at most once; it deregisters itself from the
    /// other refs first.
    pub(crate) fn register(&self, wake: Wake) -> Option<Registration> {
        let key = NEXT_WAITER.fetch_add(1, Ordering::Relaxed);
        let registration = Arc::new(Registration {
            key,
            entries: Arc::clone(&self.entries),
        });
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let once: Wake = {
            let registration = Arc::clone(&registration);
            Arc::new(move || {
                if !fired.swap(true, Ordering::AcqRel) {
                    registration.cancel();
                    wake();
                }
            })
        };

        let mut guards: Vec<MutexGuard<'_, TRefState>> = self
            .entries
            .iter()
            .map(|(core, _)| core.state.lock())
            .collect();
        let unchanged = guards
            .iter()
            .zip(self.entries.iter())
            .all(|(state, (_, version))| state.version == *version);
        if !unchanged {
            return None;
        }
        for state in &mut guards {
            state.waiters.push((key, Arc::clone(&once)));
        }
        drop(guards);
        Some(Registration {
            key,
            entries: Arc::clone(&self.entries),
        })
    }
}
