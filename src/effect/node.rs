//! The erased instruction set interpreted by the fiber runtime.
//!
//! Typed [`Effect`](super::Effect) values are thin wrappers over an
//! `Arc<Node>`. Payloads travel through the interpreter as [`Value`]s
//! (`Arc<dyn Any + Send + Sync>`) and are downcast again at the typed
//! boundary. A downcast mismatch can only come from a bug in this crate; the
//! resulting panic is caught by the interpreter and surfaces as a defect.

use crate::effect::resume::RawResume;
use crate::fiber_ref::FiberRefDef;
use crate::runtime::fiber_runtime::FiberContext;
use crate::types::{Cause, Exit};
use std::any::{type_name, Any};
use std::sync::{Arc, OnceLock};

/// Marker for values that can flow through effects: results, errors, and
/// anything captured by them.
pub trait Data: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Data for T {}

pub(crate) type Value = Arc<dyn Any + Send + Sync>;
pub(crate) type ErasedCause = Cause<Value>;
pub(crate) type ErasedExit = Exit<Value, Value>;
pub(crate) type NodeRef = Arc<Node>;

pub(crate) type Thunk = Box<dyn Fn() -> Result<Value, ErasedCause> + Send + Sync>;
pub(crate) type Register = Box<dyn Fn(RawResume) -> Option<NodeRef> + Send + Sync>;
pub(crate) type Cont = Box<dyn Fn(Value) -> NodeRef + Send + Sync>;
pub(crate) type Handler = Box<dyn Fn(ErasedCause) -> NodeRef + Send + Sync>;
pub(crate) type RefUpdate = Box<dyn Fn(&Value) -> (Value, Option<Value>) + Send + Sync>;
pub(crate) type FiberAccess = Box<dyn Fn(&mut FiberContext<'_>) -> NodeRef + Send + Sync>;

/// One instruction of a computation description.
pub(crate) enum Node {
    Succeed(Value),
    Fail(ErasedCause),
    Sync(Thunk),
    Async(Register),
    FlatMap(NodeRef, Cont),
    Fold {
        effect: NodeRef,
        on_failure: Handler,
        on_success: Cont,
    },
    Fork {
        effect: NodeRef,
        daemon: bool,
    },
    InterruptStatus {
        effect: NodeRef,
        interruptible: bool,
    },
    /// Reads a fiber ref; returns the first value and, if present, stores
    /// the second.
    UpdateFiberRef {
        def: Arc<FiberRefDef>,
        f: RefUpdate,
    },
    WithScope(NodeRef),
    WithFiber(FiberAccess),
    Yield,
}

impl Node {
    /// Nodes before which a pending interruption is delivered.
    pub(crate) const fn is_checkpoint(&self) -> bool {
        matches!(
            self,
            Self::Sync(_)
                | Self::Async(_)
                | Self::Fork { .. }
                | Self::UpdateFiberRef { .. }
                | Self::WithScope(_)
                | Self::WithFiber(_)
                | Self::Yield
        )
    }

    /// Moves the structurally nested nodes into `out`, leaving shared
    /// placeholders behind.
    fn take_children(&mut self, out: &mut Vec<NodeRef>) {
        match self {
            Self::FlatMap(effect, _)
            | Self::Fold { effect, .. }
            | Self::Fork { effect, .. }
            | Self::InterruptStatus { effect, .. }
            | Self::WithScope(effect) => {
                out.push(std::mem::replace(effect, unit_node()));
            }
            Self::Succeed(_)
            | Self::Fail(_)
            | Self::Sync(_)
            | Self::Async(_)
            | Self::UpdateFiberRef { .. }
            | Self::WithFiber(_)
            | Self::Yield => {}
        }
    }
}

// Long left-nested chains (a loop of `flat_map`s) would otherwise be freed
// recursively, one host frame per node.
impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_children(&mut pending);
        while let Some(node) = pending.pop() {
            if let Ok(mut inner) = Arc::try_unwrap(node) {
                inner.take_children(&mut pending);
            }
        }
    }
}

pub(crate) fn value<T: Data>(v: T) -> Value {
    Arc::new(v)
}

/// Takes the payload out of a value, cloning only if it is shared.
pub(crate) fn from_value<T: Data>(v: Value) -> T {
    match v.downcast::<T>() {
        Ok(arc) => Arc::try_unwrap(arc).unwrap_or_else(|shared| (*shared).clone()),
        Err(_) => panic!("effect payload is not a {}", type_name::<T>()),
    }
}

/// Clones the payload out of a borrowed value.
pub(crate) fn clone_value<T: Data>(v: &Value) -> T {
    match v.downcast_ref::<T>() {
        Some(t) => t.clone(),
        None => panic!("effect payload is not a {}", type_name::<T>()),
    }
}

pub(crate) fn unit_value() -> Value {
    static UNIT: OnceLock<Value> = OnceLock::new();
    Arc::clone(UNIT.get_or_init(|| value(())))
}

pub(crate) fn typed_cause<E: Data>(cause: ErasedCause) -> Cause<E> {
    cause.map(from_value::<E>)
}

pub(crate) fn erased_cause<E: Data>(cause: Cause<E>) -> ErasedCause {
    cause.map(value)
}

pub(crate) fn typed_exit<A: Data, E: Data>(exit: ErasedExit) -> Exit<A, E> {
    match exit {
        Exit::Success(v) => Exit::Success(from_value(v)),
        Exit::Failure(c) => Exit::Failure(typed_cause(c)),
    }
}

pub(crate) fn erased_exit<A: Data, E: Data>(exit: Exit<A, E>) -> ErasedExit {
    match exit {
        Exit::Success(a) => Exit::Success(value(a)),
        Exit::Failure(c) => Exit::Failure(erased_cause(c)),
    }
}

pub(crate) fn succeed_node(v: Value) -> NodeRef {
    Arc::new(Node::Succeed(v))
}

pub(crate) fn unit_node() -> NodeRef {
    static UNIT: OnceLock<NodeRef> = OnceLock::new();
    Arc::clone(UNIT.get_or_init(|| succeed_node(unit_value())))
}

pub(crate) fn fail_node(cause: ErasedCause) -> NodeRef {
    Arc::new(Node::Fail(cause))
}

pub(crate) fn sync_node<F>(f: F) -> NodeRef
where
    F: Fn() -> Result<Value, ErasedCause> + Send + Sync + 'static,
{
    Arc::new(Node::Sync(Box::new(f)))
}

pub(crate) fn async_node<F>(register: F) -> NodeRef
where
    F: Fn(RawResume) -> Option<NodeRef> + Send + Sync + 'static,
{
    Arc::new(Node::Async(Box::new(register)))
}

pub(crate) fn flat_map_node<F>(effect: NodeRef, k: F) -> NodeRef
where
    F: Fn(Value) -> NodeRef + Send + Sync + 'static,
{
    Arc::new(Node::FlatMap(effect, Box::new(k)))
}

pub(crate) fn fold_node<F, S>(effect: NodeRef, on_failure: F, on_success: S) -> NodeRef
where
    F: Fn(ErasedCause) -> NodeRef + Send + Sync + 'static,
    S: Fn(Value) -> NodeRef + Send + Sync + 'static,
{
    Arc::new(Node::Fold {
        effect,
        on_failure: Box::new(on_failure),
        on_success: Box::new(on_success),
    })
}

pub(crate) fn interrupt_status_node(effect: NodeRef, interruptible: bool) -> NodeRef {
    Arc::new(Node::InterruptStatus {
        effect,
        interruptible,
    })
}

pub(crate) fn with_fiber_node<F>(f: F) -> NodeRef
where
    F: Fn(&mut FiberContext<'_>) -> NodeRef + Send + Sync + 'static,
{
    Arc::new(Node::WithFiber(Box::new(f)))
}

/// Replays an erased exit.
pub(crate) fn from_exit_node(exit: ErasedExit) -> NodeRef {
    match exit {
        Exit::Success(v) => succeed_node(v),
        Exit::Failure(c) => fail_node(c),
    }
}

/// `effect`, then `next`, discarding the first result.
pub(crate) fn then_node(effect: NodeRef, next: NodeRef) -> NodeRef {
    flat_map_node(effect, move |_| Arc::clone(&next))
}

/// Runs `finalizer` after `effect` whatever the outcome. The finalizer is
/// uninterruptible; `effect` keeps the caller's interruptibility. A
/// finalizer failure is combined into the result.
pub(crate) fn guarantee_node<F>(effect: NodeRef, finalizer: F) -> NodeRef
where
    F: Fn(&ErasedExit) -> NodeRef + Send + Sync + 'static,
{
    let finalizer = Arc::new(finalizer);
    with_fiber_node(move |ctx| {
        let restored = interrupt_status_node(Arc::clone(&effect), ctx.is_interruptible());
        let on_fail = Arc::clone(&finalizer);
        let on_success = Arc::clone(&finalizer);
        let body = fold_node(
            restored,
            move |cause| {
                let exit = ErasedExit::Failure(cause.clone());
                let kept = cause.clone();
                fold_node(
                    on_fail(&exit),
                    move |fin| fail_node(Cause::sequential(cause.clone(), fin)),
                    move |_| fail_node(kept.clone()),
                )
            },
            move |v| {
                let exit = ErasedExit::Success(Arc::clone(&v));
                fold_node(on_success(&exit), fail_node, move |_| {
                    succeed_node(Arc::clone(&v))
                })
            },
        );
        interrupt_status_node(body, false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_value_avoids_clone_when_unique() {
        let v = value(vec![1, 2, 3]);
        let out: Vec<i32> = from_value(v);
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn from_value_clones_shared_payload() {
        let v = value(String::from("shared"));
        let keep = Arc::clone(&v);
        let out: String = from_value(v);
        assert_eq!(out, "shared");
        assert_eq!(clone_value::<String>(&keep), "shared");
    }

    #[test]
    #[should_panic(expected = "effect payload is not a")]
    fn from_value_mismatch_panics() {
        let _: u8 = from_value(value("not a byte"));
    }

    #[test]
    fn checkpoints() {
        assert!(Node::Yield.is_checkpoint());
        assert!(!Node::Succeed(unit_value()).is_checkpoint());
        assert!(!Node::Fail(Cause::Empty).is_checkpoint());
    }

    #[test]
    fn dropping_a_long_chain_does_not_recurse() {
        let mut node = unit_node();
        for _ in 0..200_000 {
            node = flat_map_node(node, succeed_node);
        }
        drop(node);
    }

    #[test]
    fn typed_round_trip_through_erased_exit() {
        let exit: Exit<u32, String> = Exit::fail("e".to_string());
        let back: Exit<u32, String> = typed_exit(erased_exit(exit.clone()));
        assert_eq!(back, exit);
    }
}
