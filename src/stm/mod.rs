//! Software transactional memory.
//!
//! A [`Stm`] describes reads and writes of [`TRef`]s. Committing it runs the
//! description against a private journal and publishes every write at once,
//! or none of them:
//!
//! - a conflicting attempt (a ref it read was changed by another commit) is
//!   re-run from the start;
//! - [`Stm::retry`] suspends the fiber until a ref the attempt read changes;
//! - a failure discards the journal.
//!
//! ```
//! use fibra::lab::LabRuntime;
//! use fibra::stm::{Stm, TRef};
//!
//! let (a, b) = (TRef::new(10_i32), TRef::new(0_i32));
//! let (a2, b2) = (a.clone(), b.clone());
//! let transfer: Stm<(), &str> = a.get().flat_map(move |n| {
//!     if n < 4 {
//!         return Stm::fail("insufficient");
//!     }
//!     a2.set(n - 4).and_then(b2.update(|m| m + 4))
//! });
//! let exit = LabRuntime::default().run(transfer.commit());
//! assert!(exit.is_success());
//! assert_eq!((a.read_now(), b.read_now()), (6, 4));
//! ```
//!
//! Built on top of the core:
//!
//! - [`TReentrantLock`]: read-write lock with per-fiber reentrancy
//! - [`TQueue`]: bounded FIFO queue
//! - [`TSemaphore`]: counting semaphore

pub(crate) mod journal;
mod queue;
mod reentrant_lock;
mod semaphore;
mod stm;
mod tref;

pub use queue::TQueue;
pub use reentrant_lock::TReentrantLock;
pub use semaphore::TSemaphore;
pub use stm::Stm;
pub use tref::TRef;
