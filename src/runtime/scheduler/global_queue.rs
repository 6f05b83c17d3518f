//! The ready queue.
//!
//! A thread-safe unbounded FIFO of runnable fibers. Fibers that yield go to
//! the back, so every runnable fiber gets a turn before any fiber gets a
//! second one.

use crate::runtime::fiber_runtime::FiberRuntime;
use crossbeam_queue::SegQueue;

/// The runtime's FIFO of runnable fibers.
#[derive(Default)]
pub(crate) struct GlobalQueue {
    inner: SegQueue<Box<FiberRuntime>>,
}

impl GlobalQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    pub(crate) fn push(&self, fiber: Box<FiberRuntime>) {
        self.inner.push(fiber);
    }

    pub(crate) fn pop(&self) -> Option<Box<FiberRuntime>> {
        self.inner.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}
