//! Transactional references.

use crate::effect::node::{clone_value, value};
use crate::effect::Data;
use crate::stm::journal::TRefCore;
use crate::stm::Stm;
use crate::types::TRefId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A mutable cell that is only read and written inside transactions.
pub struct TRef<A> {
    core: Arc<TRefCore>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for TRef<A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<A> PartialEq for TRef<A> {
    fn eq(&self, other: &Self) -> bool {
        self.core.id() == other.core.id()
    }
}

impl<A> Eq for TRef<A> {}

impl<A: Data + fmt::Debug> fmt::Debug for TRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TRef")
            .field("id", &self.core.id())
            .field("value", &self.read_now())
            .finish()
    }
}

impl<A: Data> TRef<A> {
    /// Creates a ref outside of any transaction.
    #[must_use]
    pub fn new(initial: A) -> Self {
        Self {
            core: TRefCore::new(value(initial)),
            _marker: PhantomData,
        }
    }

    /// Creates a ref as part of a transaction.
    pub fn make<E: Data>(initial: A) -> Stm<Self, E> {
        Stm::from_fn(move |_| Ok(Self::new(initial.clone())))
    }

    /// Identity of the ref; commits lock refs in this order.
    #[must_use]
    pub fn id(&self) -> TRefId {
        self.core.id()
    }

    /// Reads the value.
    pub fn get<E: Data>(&self) -> Stm<A, E> {
        let core = Arc::clone(&self.core);
        Stm::from_fn(move |journal| journal.read(&core).map(|v| clone_value::<A>(&v)))
    }

    /// Writes the value.
    pub fn set<E: Data>(&self, a: A) -> Stm<(), E> {
        let core = Arc::clone(&self.core);
        Stm::from_fn(move |journal| journal.write(&core, value(a.clone())))
    }

    /// Applies `f` to the value.
    pub fn update<E: Data, F>(&self, f: F) -> Stm<(), E>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |a| ((), f(a)))
    }

    /// Applies `f` to the value, storing the second component and returning
    /// the first.
    pub fn modify<B: Data, E: Data, F>(&self, f: F) -> Stm<B, E>
    where
        F: Fn(A) -> (B, A) + Send + Sync + 'static,
    {
        let core = Arc::clone(&self.core);
        Stm::from_fn(move |journal| {
            let current = clone_value::<A>(&journal.read(&core)?);
            let (b, next) = f(current);
            journal.write(&core, value(next))?;
            Ok(b)
        })
    }

    /// Writes the value, returning the previous one.
    pub fn get_and_set<E: Data>(&self, a: A) -> Stm<A, E> {
        self.modify(move |previous| (previous, a.clone()))
    }

    /// The last committed value, read outside of any transaction.
    #[must_use]
    pub fn read_now(&self) -> A {
        clone_value(&self.core.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Effect;
    use crate::lab::LabRuntime;
    use crate::types::Exit;

    #[test]
    fn reads_see_own_writes_within_a_transaction() {
        crate::test_utils::init_test_logging();
        let cell = TRef::new(String::from("a"));
        let c = cell.clone();
        let program: Stm<(String, String)> = cell
            .get_and_set(String::from("b"))
            .zip(c.get());
        assert_eq!(
            LabRuntime::default().run(program.commit()),
            Exit::succeed((String::from("a"), String::from("b")))
        );
        assert_eq!(cell.read_now(), "b");
    }

    #[test]
    fn make_creates_a_fresh_ref_per_commit() {
        crate::test_utils::init_test_logging();
        let make: Stm<TRef<u8>> = TRef::make(7);
        let program: Effect<bool> = make
            .commit()
            .zip(make.commit())
            .map(|(a, b)| a != b && a.read_now() == 7 && b.read_now() == 7);
        assert_eq!(LabRuntime::default().run(program), Exit::succeed(true));
    }

    #[test]
    fn ids_follow_creation_order() {
        let first = TRef::new(());
        let second = TRef::new(());
        assert!(first.id() < second.id());
    }

    #[test]
    fn concurrent_increments_commit_exactly_once_each() {
        crate::test_utils::init_test_logging();
        let counter = TRef::new(0_u64);
        let bump = counter.update(|n| n + 1).commit();
        let program: Effect<u64> = Effect::for_each_par(0..200, move |_| bump.clone())
            .and_then(counter.get().commit());
        assert_eq!(LabRuntime::with_seed(7).run(program), Exit::succeed(200));
    }
}
