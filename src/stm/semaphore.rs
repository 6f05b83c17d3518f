//! Transactional counting semaphore.

use crate::effect::{Data, Effect};
use crate::stm::{Stm, TRef};
use std::convert::Infallible;

/// A counting semaphore whose permits live in a [`TRef`].
#[derive(Clone, Debug)]
pub struct TSemaphore {
    permits: TRef<usize>,
}

impl TSemaphore {
    /// Creates a semaphore with `permits` available permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: TRef::new(permits),
        }
    }

    /// Creates a semaphore as part of a transaction.
    pub fn make<E: Data>(permits: usize) -> Stm<Self, E> {
        Stm::from_fn(move |_| Ok(Self::new(permits)))
    }

    /// Takes one permit, waiting until one is available.
    pub fn acquire<E: Data>(&self) -> Stm<(), E> {
        self.acquire_n(1)
    }

    /// Takes `n` permits at once, waiting until that many are available.
    pub fn acquire_n<E: Data>(&self, n: usize) -> Stm<(), E> {
        let permits = self.permits.clone();
        self.permits.get().flat_map(move |available| {
            if available < n {
                return Stm::retry();
            }
            permits.set(available - n)
        })
    }

    /// Returns one permit.
    pub fn release<E: Data>(&self) -> Stm<(), E> {
        self.release_n(1)
    }

    /// Returns `n` permits.
    pub fn release_n<E: Data>(&self, n: usize) -> Stm<(), E> {
        self.permits.update(move |available| available + n)
    }

    /// Permits currently available.
    pub fn available<E: Data>(&self) -> Stm<usize, E> {
        self.permits.get()
    }

    /// Runs `effect` holding one permit, returning it whatever the outcome.
    /// Waiting for the permit is interruptible.
    pub fn with_permit<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Effect<A, E> {
        let semaphore = self.clone();
        let held: Effect<(), E> = Effect::uninterruptible_mask(move |restore| {
            let release = semaphore.clone();
            Effect::acquire_release(restore.apply(semaphore.acquire().commit()), move |(), _| {
                release.release::<Infallible>().commit()
            })
        });
        held.and_then(effect).scoped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::LabRuntime;
    use crate::sync::Ref;
    use crate::types::Exit;

    #[test]
    fn with_permit_bounds_concurrency() {
        crate::test_utils::init_test_logging();
        let semaphore = TSemaphore::new(2);
        let active = Ref::new(0_u32);
        let peak = Ref::new(0_u32);
        let task: Effect<()> = {
            let (a1, a2, peak) = (active.clone(), active.clone(), peak.clone());
            semaphore.with_permit(
                a1.modify(|n| (n + 1, n + 1))
                    .flat_map(move |now| peak.update(move |p| p.max(now)))
                    .and_then(Effect::<(), Infallible>::yield_now().repeat_n(3))
                    .and_then(a2.update(|n| n - 1)),
            )
        };
        let program: Effect<u32> =
            Effect::for_each_par(0..8, move |_| task.clone()).and_then(peak.get());
        let mut lab = LabRuntime::default();
        assert_eq!(lab.run(program), Exit::succeed(2));
        assert_eq!(lab.run(semaphore.available::<Infallible>().commit()), Exit::succeed(2));
    }

    #[test]
    fn acquire_n_waits_for_enough_permits() {
        crate::test_utils::init_test_logging();
        let semaphore = TSemaphore::new(1);
        let s = semaphore.clone();
        let attempt: Stm<&str> = semaphore
            .acquire_n(2)
            .map(|()| "acquired")
            .or_else(Stm::succeed("too few"));
        let program = attempt
            .commit()
            .zip(s.release().and_then(semaphore.acquire_n(2)).map(|()| "acquired").commit());
        assert_eq!(
            LabRuntime::default().run(program),
            Exit::succeed(("too few", "acquired"))
        );
    }
}
