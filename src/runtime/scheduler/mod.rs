//! Scheduling: the ready queue and the workers draining it.
//!
//! Every runnable fiber sits in one FIFO shared by all workers. A fiber that
//! exhausts its operation budget or yields goes to the back of that queue.
//! Idle workers park until a fiber is enqueued.

pub(crate) mod global_queue;
pub(crate) mod worker;

pub(crate) use global_queue::GlobalQueue;
pub(crate) use worker::{run_one, Parker, Worker};
pub use worker::WorkerId;
