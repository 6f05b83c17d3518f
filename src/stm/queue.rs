//! Bounded transactional queue.

use crate::effect::Data;
use crate::stm::{Stm, TRef};
use std::collections::VecDeque;
use std::fmt;

/// A bounded FIFO queue whose operations compose into transactions.
///
/// `offer` on a full queue and `take` on an empty one retry, so the
/// committing fiber suspends until the queue changes.
pub struct TQueue<A> {
    items: TRef<VecDeque<A>>,
    capacity: usize,
}

impl<A> Clone for TQueue<A> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            capacity: self.capacity,
        }
    }
}

impl<A: Data> fmt::Debug for TQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TQueue")
            .field("len", &self.items.read_now().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<A: Data> TQueue<A> {
    /// Creates a queue holding at most `capacity` items. A capacity of
    /// zero is raised to one.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: TRef::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Creates a bounded queue as part of a transaction.
    pub fn make<E: Data>(capacity: usize) -> Stm<Self, E> {
        Stm::from_fn(move |_| Ok(Self::bounded(capacity)))
    }

    /// Maximum number of queued items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `a`, waiting while the queue is full.
    pub fn offer<E: Data>(&self, a: A) -> Stm<(), E> {
        let (items, capacity) = (self.items.clone(), self.capacity);
        self.items.get().flat_map(move |mut queued: VecDeque<A>| {
            if queued.len() >= capacity {
                return Stm::retry();
            }
            queued.push_back(a.clone());
            items.set(queued)
        })
    }

    /// Removes the oldest item, waiting while the queue is empty.
    pub fn take<E: Data>(&self) -> Stm<A, E> {
        let items = self.items.clone();
        self.items
            .get()
            .flat_map(move |mut queued: VecDeque<A>| match queued.pop_front() {
                Some(a) => items.set(queued).map(move |()| a.clone()),
                None => Stm::retry(),
            })
    }

    /// Removes the oldest item if there is one.
    pub fn poll<E: Data>(&self) -> Stm<Option<A>, E> {
        self.take().map(Some).or_else(Stm::succeed(None))
    }

    /// Number of queued items.
    pub fn size<E: Data>(&self) -> Stm<usize, E> {
        self.items.get().map(|queued| queued.len())
    }
}
