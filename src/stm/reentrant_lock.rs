//! Reentrant read-write lock built from transactional refs.
//!
//! Lock state lives in two [`TRef`]s: per-fiber read counts and the write
//! holder with its count. Blocked acquisitions are STM retries, so a waiting
//! fiber suspends until the lock state changes and never holds a worker.
//!
//! # Reentrancy
//!
//! | Held by the caller     | `acquire_read`     | `acquire_write`                  |
//! |------------------------|--------------------|----------------------------------|
//! | nothing                | waits for writers  | waits for readers and writers    |
//! | read locks only        | count + 1          | upgrade if no other fiber reads  |
//! | the write lock         | count + 1          | count + 1                        |
//!
//! Releasing a lock the fiber does not hold is a defect.
//!
//! # Example
//!
//! ```
//! use fibra::effect::Effect;
//! use fibra::lab::LabRuntime;
//! use fibra::stm::TReentrantLock;
//!
//! let lock = TReentrantLock::new();
//! let l = lock.clone();
//! let program: Effect<usize> = lock.with_write_lock(l.write_locks().commit());
//! let mut lab = LabRuntime::default();
//! assert_eq!(lab.run(program).into_result(), Ok(1));
//! assert_eq!(lab.run(lock.is_locked::<()>().commit()).into_result(), Ok(false));
//! ```

use crate::effect::{Data, Effect};
use crate::stm::{Stm, TRef};
use crate::types::FiberId;
use std::collections::BTreeMap;
use std::convert::Infallible;

type Readers = BTreeMap<FiberId, usize>;
type Writer = Option<(FiberId, usize)>;

/// A reentrant read-write lock for fibers.
#[derive(Clone, Debug)]
pub struct TReentrantLock {
    readers: TRef<Readers>,
    writer: TRef<Writer>,
}

impl Default for TReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl TReentrantLock {
    /// Creates an unlocked lock outside of any transaction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            readers: TRef::new(Readers::new()),
            writer: TRef::new(None),
        }
    }

    /// Creates an unlocked lock as part of a transaction.
    pub fn make<E: Data>() -> Stm<Self, E> {
        Stm::from_fn(|_| Ok(Self::new()))
    }

    /// Takes a read lock, waiting while another fiber writes. Succeeds with
    /// the caller's read count.
    pub fn acquire_read<E: Data>(&self) -> Stm<usize, E> {
        let (readers, writer) = (self.readers.clone(), self.writer.clone());
        Stm::fiber_id().flat_map(move |me| {
            let readers = readers.clone();
            writer.get().flat_map(move |holder: Writer| match holder {
                Some((owner, _)) if owner != me => Stm::retry(),
                _ => readers.modify(move |mut counts: Readers| {
                    let count = counts.entry(me).or_insert(0);
                    *count += 1;
                    let n = *count;
                    (n, counts)
                }),
            })
        })
    }

    /// Gives back one read lock. Succeeds with the caller's remaining count.
    pub fn release_read<E: Data>(&self) -> Stm<usize, E> {
        let readers = self.readers.clone();
        Stm::fiber_id().flat_map(move |me| {
            let readers2 = readers.clone();
            readers.get().flat_map(move |mut counts: Readers| {
                let Some(count) = counts.get_mut(&me) else {
                    return Stm::die_message(format!("{me} released a read lock it does not hold"));
                };
                *count -= 1;
                let remaining = *count;
                if remaining == 0 {
                    counts.remove(&me);
                }
                readers2.set(counts).map(move |()| remaining)
            })
        })
    }

    /// Takes the write lock, waiting until no other fiber holds any lock.
    /// Succeeds with the caller's write count.
    pub fn acquire_write<E: Data>(&self) -> Stm<usize, E> {
        let (readers, writer) = (self.readers.clone(), self.writer.clone());
        Stm::fiber_id().flat_map(move |me| {
            let writer = writer.clone();
            readers.get().zip(writer.get()).flat_map(move |(counts, holder)| {
                let next = match holder {
                    Some((owner, n)) if owner == me => n + 1,
                    Some(_) => return Stm::retry(),
                    None if counts.keys().any(|&reader| reader != me) => {
                        return Stm::retry();
                    }
                    None => 1,
                };
                writer.set(Some((me, next))).map(move |()| next)
            })
        })
    }

    /// Gives back one write lock. Succeeds with the caller's remaining
    /// count.
    pub fn release_write<E: Data>(&self) -> Stm<usize, E> {
        let writer = self.writer.clone();
        Stm::fiber_id().flat_map(move |me| {
            let target = writer.clone();
            writer.get().flat_map(move |holder: Writer| match holder {
                Some((owner, n)) if owner == me => {
                    let remaining = n - 1;
                    let next = (remaining > 0).then_some((me, remaining));
                    target.set(next).map(move |()| remaining)
                }
                _ => Stm::die_message(format!("{me} released a write lock it does not hold")),
            })
        })
    }

    /// Whether any fiber holds a read or write lock.
    pub fn is_locked<E: Data>(&self) -> Stm<bool, E> {
        self.readers
            .get()
            .zip_with(self.writer.get(), |counts, holder| {
                !counts.is_empty() || holder.is_some()
            })
    }

    /// Total read locks held, over all fibers.
    pub fn read_locks<E: Data>(&self) -> Stm<usize, E> {
        self.readers.get().map(|counts| counts.values().sum())
    }

    /// Write locks held by the current holder.
    pub fn write_locks<E: Data>(&self) -> Stm<usize, E> {
        self.writer.get().map(|holder| holder.map_or(0, |(_, n)| n))
    }

    /// Takes a read lock released when the current scope closes. Waiting
    /// for the lock is interruptible.
    pub fn read_lock<E: Data>(&self) -> Effect<usize, E> {
        let lock = self.clone();
        Effect::uninterruptible_mask(move |restore| {
            let release = lock.clone();
            Effect::acquire_release(restore.apply(lock.acquire_read().commit()), move |_, _| {
                release.release_read::<Infallible>().commit().as_unit()
            })
        })
    }

    /// Takes the write lock released when the current scope closes.
    pub fn write_lock<E: Data>(&self) -> Effect<usize, E> {
        let lock = self.clone();
        Effect::uninterruptible_mask(move |restore| {
            let release = lock.clone();
            Effect::acquire_release(restore.apply(lock.acquire_write().commit()), move |_, _| {
                release.release_write::<Infallible>().commit().as_unit()
            })
        })
    }

    /// Runs `effect` holding a read lock.
    pub fn with_read_lock<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        self.read_lock().and_then(effect).scoped()
    }

    /// Runs `effect` holding the write lock.
    pub fn with_write_lock<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        self.write_lock().and_then(effect).scoped()
    }
}
