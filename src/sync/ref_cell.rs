//! A mutable reference shared between fibers.
//!
//! Every operation on a [`Ref`] is atomic on its own. Sequences of
//! operations are not: compose transactional updates with
//! [`TRef`](crate::stm::TRef) instead.

use crate::effect::{Data, Effect};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A shared mutable cell.
pub struct Ref<A> {
    cell: Arc<Mutex<A>>,
}

impl<A> Clone for Ref<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for Ref<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&*self.cell.lock()).finish()
    }
}

impl<A: Data> Ref<A> {
    /// Creates a ref outside of any fiber.
    #[must_use]
    pub fn new(initial: A) -> Self {
        Self {
            cell: Arc::new(Mutex::new(initial)),
        }
    }

    /// Creates a ref.
    pub fn make<E: Data>(initial: A) -> Effect<Self, E> {
        Effect::sync(move || Self::new(initial.clone()))
    }

    /// Reads the current value.
    pub fn get<E: Data>(&self) -> Effect<A, E> {
        let cell = Arc::clone(&self.cell);
        Effect::sync(move || cell.lock().clone())
    }

    /// Replaces the value.
    pub fn set<E: Data>(&self, a: A) -> Effect<(), E> {
        let cell = Arc::clone(&self.cell);
        Effect::sync(move || *cell.lock() = a.clone())
    }

    /// Applies `f` to the value.
    pub fn update<E: Data, F>(&self, f: F) -> Effect<(), E>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |a| ((), f(a)))
    }

    /// Applies `f` to the value, storing the second component and returning
    /// the first.
    pub fn modify<B: Data, E: Data, F>(&self, f: F) -> Effect<B, E>
    where
        F: Fn(A) -> (B, A) + Send + Sync + 'static,
    {
        let cell = Arc::clone(&self.cell);
        Effect::sync(move || {
            let mut guard = cell.lock();
            let (b, next) = f(guard.clone());
            *guard = next;
            b
        })
    }

    /// Replaces the value, returning the previous one.
    pub fn get_and_set<E: Data>(&self, a: A) -> Effect<A, E> {
        self.modify(move |previous| (previous, a.clone()))
    }
}

impl<A: Data + PartialEq> Ref<A> {
    /// Stores `new` if the current value equals `expected`. Succeeds with
    /// whether the swap happened.
    pub fn compare_and_set<E: Data>(&self, expected: A, new: A) -> Effect<bool, E> {
        self.modify(move |current| {
            if current == expected {
                (true, new.clone())
            } else {
                (false, current)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::LabRuntime;
    use crate::types::Exit;

    #[test]
    fn modify_returns_and_stores() {
        crate::test_utils::init_test_logging();
        let program: Effect<(String, u32)> = Ref::make(10_u32).flat_map(|r: Ref<u32>| {
            let (r1, r2) = (r.clone(), r.clone());
            r.modify(|n| (format!("was {n}"), n * 2))
                .zip_left(r1.update(|n| n + 1))
                .zip(r2.get())
        });
        assert_eq!(
            LabRuntime::default().run(program),
            Exit::succeed(("was 10".to_string(), 21))
        );
    }

    #[test]
    fn compare_and_set_only_swaps_on_match() {
        crate::test_utils::init_test_logging();
        let r = Ref::new("idle");
        let program: Effect<(bool, bool, &str)> = r
            .compare_and_set("busy", "done")
            .zip(r.compare_and_set("idle", "busy"))
            .zip(r.get())
            .map(|((first, second), now)| (first, second, now));
        assert_eq!(
            LabRuntime::default().run(program),
            Exit::succeed((false, true, "busy"))
        );
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        crate::test_utils::init_test_logging();
        let counter = Ref::new(0_u64);
        let bump = counter.update(|n| n + 1);
        let program: Effect<u64> = Effect::for_each_par(0..100, move |_| bump.clone())
            .and_then(counter.get_and_set(0));
        assert_eq!(LabRuntime::default().run(program), Exit::succeed(100));
    }
}
