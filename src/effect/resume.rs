//! One-shot resume callbacks handed to `Async` registrations.

use crate::effect::node::{
    erased_cause, fail_node, succeed_node, value, Data, NodeRef,
};
use crate::effect::Effect;
use crate::record::fiber::FiberShared;
use crate::types::{Cause, Defect};
use core::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Untyped resume: continues a suspended fiber with a node.
///
/// A resume is bound to one suspension (the fiber's epoch at the time the
/// registration ran). Only the first resume for that suspension has any
/// effect; later calls and calls after the fiber moved on are ignored.
#[derive(Clone)]
pub(crate) struct RawResume {
    fiber: Arc<FiberShared>,
    epoch: u64,
}

impl RawResume {
    pub(crate) fn new(fiber: Arc<FiberShared>, epoch: u64) -> Self {
        Self { fiber, epoch }
    }

    pub(crate) fn resume(&self, node: NodeRef) {
        FiberShared::resume(&self.fiber, self.epoch, node);
    }
}

/// Continues a fiber suspended in [`Effect::async_`].
///
/// Cloneable and callable from any thread. The first call wins.
pub struct Resume<A, E> {
    raw: RawResume,
    _marker: PhantomData<fn(A, E)>,
}

impl<A, E> Clone for Resume<A, E> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Resume<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("fiber", &self.raw.fiber.id())
            .field("epoch", &self.raw.epoch)
            .finish()
    }
}

impl<A: Data, E: Data> Resume<A, E> {
    pub(crate) fn from_raw(raw: RawResume) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Resumes with a value.
    pub fn succeed(&self, a: A) {
        self.raw.resume(succeed_node(value(a)));
    }

    /// Resumes with a typed failure.
    pub fn fail(&self, e: E) {
        self.raw.resume(fail_node(Cause::Fail(value(e))));
    }

    /// Resumes with an arbitrary cause.
    pub fn fail_cause(&self, cause: Cause<E>) {
        self.raw.resume(fail_node(erased_cause(cause)));
    }

    /// Resumes with a defect.
    pub fn die(&self, defect: Defect) {
        self.raw.resume(fail_node(Cause::Die(defect)));
    }

    /// Resumes by running `effect` on the fiber.
    pub fn resume(&self, effect: Effect<A, E>) {
        self.raw.resume(effect.into_node());
    }
}
