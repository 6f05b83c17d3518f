//! Fiber-local references.
//!
//! A [`FiberRef`] is a variable whose value is local to each fiber. A forked
//! child starts from the parent's value passed through the ref's `fork`
//! transform. When the parent joins the child, the child's changes are merged
//! back: the ref's [`Differ`] computes a patch from the value the child was
//! forked with to its final value, applies that patch to the parent's
//! current value, and the ref's `join` function combines the result with the
//! parent's value. With the default differ the patch is "replace if
//! changed", so a child that never touched a ref does not clobber updates
//! the parent made meanwhile.
//!
//! # Example
//!
//! ```
//! use fibra::effect::Effect;
//! use fibra::fiber_ref::FiberRef;
//! use fibra::lab::LabRuntime;
//!
//! let depth = FiberRef::new(0_u32);
//! let program: Effect<(u32, u32)> = depth
//!     .locally(3, depth.get())
//!     .zip(depth.get());
//! assert_eq!(LabRuntime::default().run(program).into_result(), Ok((3, 0)));
//! ```

use crate::effect::node::{
    clone_value, flat_map_node, guarantee_node, interrupt_status_node, unit_value, value,
    with_fiber_node, Node, Value,
};
use crate::effect::{Data, Effect};
use crate::types::FiberRefId;
use core::fmt;
use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Default operation budget before a fiber yields.
pub const DEFAULT_MAX_OPS_BEFORE_YIELD: usize = 2048;

/// Describes changes to a value as patches that can be combined and applied
/// to a different base value.
pub trait Differ<A>: Send + Sync + 'static {
    /// A description of a change.
    type Patch: Data;

    /// The patch that changes nothing.
    fn empty(&self) -> Self::Patch;

    /// The patch turning `old` into `new`.
    fn diff(&self, old: &A, new: &A) -> Self::Patch;

    /// `first` followed by `second`.
    fn combine(&self, first: Self::Patch, second: Self::Patch) -> Self::Patch;

    /// Applies `patch` to `old`.
    fn patch(&self, patch: &Self::Patch, old: &A) -> A;
}

/// Replaces the whole value when it changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateDiffer;

impl<A: Data> Differ<A> for UpdateDiffer {
    type Patch = Option<A>;

    fn empty(&self) -> Option<A> {
        None
    }

    fn diff(&self, _old: &A, new: &A) -> Option<A> {
        Some(new.clone())
    }

    fn combine(&self, first: Option<A>, second: Option<A>) -> Option<A> {
        second.or(first)
    }

    fn patch(&self, patch: &Option<A>, old: &A) -> A {
        patch.clone().unwrap_or_else(|| old.clone())
    }
}

/// Elements added to and removed from a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPatch<T: Eq + Hash> {
    /// Elements to insert.
    pub added: HashSet<T>,
    /// Elements to remove.
    pub removed: HashSet<T>,
}

/// Differ for sets: concurrent additions from different fibers merge.
#[derive(Debug)]
pub struct SetDiffer<T>(PhantomData<fn() -> T>);

impl<T> Default for SetDiffer<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: Data + Eq + Hash> Differ<HashSet<T>> for SetDiffer<T> {
    type Patch = SetPatch<T>;

    fn empty(&self) -> SetPatch<T> {
        SetPatch {
            added: HashSet::new(),
            removed: HashSet::new(),
        }
    }

    fn diff(&self, old: &HashSet<T>, new: &HashSet<T>) -> SetPatch<T> {
        SetPatch {
            added: new.difference(old).cloned().collect(),
            removed: old.difference(new).cloned().collect(),
        }
    }

    fn combine(&self, first: SetPatch<T>, second: SetPatch<T>) -> SetPatch<T> {
        let mut added: HashSet<T> = first
            .added
            .into_iter()
            .filter(|t| !second.removed.contains(t))
            .collect();
        added.extend(second.added.iter().cloned());
        let mut removed: HashSet<T> = first
            .removed
            .into_iter()
            .filter(|t| !second.added.contains(t))
            .collect();
        removed.extend(second.removed);
        SetPatch { added, removed }
    }

    fn patch(&self, patch: &SetPatch<T>, old: &HashSet<T>) -> HashSet<T> {
        let mut out: HashSet<T> = old
            .iter()
            .filter(|t| !patch.removed.contains(*t))
            .cloned()
            .collect();
        out.extend(patch.added.iter().cloned());
        out
    }
}

/// Differ over erased values: `patch(diff(forked, child), parent)`.
pub(crate) trait ErasedDiffer: Send + Sync {
    fn merge(&self, forked: &Value, child: &Value, parent: &Value) -> Value;
}

/// The default: a child that kept the exact value it was forked with
/// leaves the parent alone.
struct IdentityUpdate;

impl ErasedDiffer for IdentityUpdate {
    fn merge(&self, forked: &Value, child: &Value, parent: &Value) -> Value {
        if Arc::ptr_eq(forked, child) {
            Arc::clone(parent)
        } else {
            Arc::clone(child)
        }
    }
}

struct TypedDiffer<A, D> {
    differ: D,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Data, D: Differ<A>> ErasedDiffer for TypedDiffer<A, D> {
    fn merge(&self, forked: &Value, child: &Value, parent: &Value) -> Value {
        if Arc::ptr_eq(forked, child) {
            return Arc::clone(parent);
        }
        let patch = self
            .differ
            .diff(&clone_value::<A>(forked), &clone_value::<A>(child));
        value(self.differ.patch(&patch, &clone_value::<A>(parent)))
    }
}

type ForkFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
type JoinFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Erased definition of a fiber ref.
#[derive(Clone)]
pub(crate) struct FiberRefDef {
    pub(crate) id: FiberRefId,
    pub(crate) initial: Value,
    fork: ForkFn,
    /// False while `fork` is the identity, so unset refs skip it.
    transforms_on_fork: bool,
    join: JoinFn,
    differ: Arc<dyn ErasedDiffer>,
}

impl fmt::Debug for FiberRefDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRefDef")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn next_ref_id() -> FiberRefId {
    static NEXT: AtomicU64 = AtomicU64::new(FiberRefId::FIRST_USER);
    FiberRefId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// A fiber-local variable holding an `A`.
pub struct FiberRef<A> {
    def: Arc<FiberRefDef>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FiberRef").field(&self.def.id).finish()
    }
}

impl<A: Data> FiberRef<A> {
    /// A new ref with `initial` as every fiber's starting value. Children
    /// inherit the parent's value; joining takes the child's value if the
    /// child changed it.
    pub fn new(initial: A) -> Self {
        Self::with_id(next_ref_id(), initial)
    }

    fn with_id(id: FiberRefId, initial: A) -> Self {
        Self {
            def: Arc::new(FiberRefDef {
                id,
                initial: value(initial),
                fork: Arc::new(|v: &Value| Arc::clone(v)),
                transforms_on_fork: false,
                join: Arc::new(|_: &Value, child: &Value| Arc::clone(child)),
                differ: Arc::new(IdentityUpdate),
            }),
            _marker: PhantomData,
        }
    }

    /// Sets the transform applied to the parent's value when forking.
    #[must_use]
    pub fn with_fork<F>(mut self, f: F) -> Self
    where
        F: Fn(&A) -> A + Send + Sync + 'static,
    {
        let def = Arc::make_mut(&mut self.def);
        def.fork = Arc::new(move |v: &Value| value(f(&clone_value::<A>(v))));
        def.transforms_on_fork = true;
        self
    }

    /// Sets how a joined child's (patched) value combines with the parent's
    /// value. `f` receives `(parent, child)`.
    #[must_use]
    pub fn with_join<F>(mut self, f: F) -> Self
    where
        F: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.def).join = Arc::new(move |parent: &Value, child: &Value| {
            value(f(&clone_value::<A>(parent), &clone_value::<A>(child)))
        });
        self
    }

    /// Sets the differ used to merge a joined child's changes.
    #[must_use]
    pub fn with_differ<D: Differ<A>>(mut self, differ: D) -> Self {
        Arc::make_mut(&mut self.def).differ = Arc::new(TypedDiffer {
            differ,
            _marker: PhantomData::<fn() -> A>,
        });
        self
    }

    /// The id of this ref.
    #[must_use]
    pub fn id(&self) -> FiberRefId {
        self.def.id
    }

    fn update_node<F>(&self, f: F) -> Arc<Node>
    where
        F: Fn(&Value) -> (Value, Option<Value>) + Send + Sync + 'static,
    {
        Arc::new(Node::UpdateFiberRef {
            def: Arc::clone(&self.def),
            f: Box::new(f),
        })
    }

    /// Reads the current fiber's value.
    pub fn get<E: Data>(&self) -> Effect<A, E> {
        Effect::from_node(self.update_node(|current| (Arc::clone(current), None)))
    }

    /// Replaces the current fiber's value.
    pub fn set<E: Data>(&self, a: A) -> Effect<(), E> {
        Effect::from_node(self.update_node(move |_| (unit_value(), Some(value(a.clone())))))
    }

    /// Applies `f` to the current fiber's value.
    pub fn update<E: Data, F>(&self, f: F) -> Effect<(), E>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        Effect::from_node(self.update_node(move |current| {
            (unit_value(), Some(value(f(clone_value::<A>(current)))))
        }))
    }

    /// Replaces the value with the second component of `f`'s result and
    /// returns the first.
    pub fn modify<B: Data, E: Data, F>(&self, f: F) -> Effect<B, E>
    where
        F: Fn(A) -> (B, A) + Send + Sync + 'static,
    {
        Effect::from_node(self.update_node(move |current| {
            let (b, a) = f(clone_value::<A>(current));
            (value(b), Some(value(a)))
        }))
    }

    /// Replaces the value and returns the previous one.
    pub fn get_and_set<E: Data>(&self, a: A) -> Effect<A, E> {
        Effect::from_node(self.update_node(move |current| {
            (Arc::clone(current), Some(value(a.clone())))
        }))
    }

    /// Runs `effect` with the ref set to `a`, restoring the exact previous
    /// value afterwards whatever the outcome.
    pub fn locally<B: Data, E: Data>(&self, a: A, effect: Effect<B, E>) -> Effect<B, E> {
        let swap = self.update_node(move |current| (Arc::clone(current), Some(value(a.clone()))));
        let def = Arc::clone(&self.def);
        let body = effect.into_node();
        Effect::from_node(with_fiber_node(move |ctx| {
            let outer = ctx.is_interruptible();
            let def = Arc::clone(&def);
            let body = Arc::clone(&body);
            let scoped = flat_map_node(Arc::clone(&swap), move |previous| {
                let def = Arc::clone(&def);
                guarantee_node(interrupt_status_node(Arc::clone(&body), outer), move |_| {
                    let previous = Arc::clone(&previous);
                    Arc::new(Node::UpdateFiberRef {
                        def: Arc::clone(&def),
                        f: Box::new(move |_: &Value| (unit_value(), Some(Arc::clone(&previous)))),
                    })
                })
            });
            interrupt_status_node(scoped, false)
        }))
    }
}

impl<T: Data + Eq + Hash> FiberRef<HashSet<T>> {
    /// A set-valued ref whose joins merge additions and removals made by
    /// concurrent children instead of letting the last join win.
    pub fn set_valued(initial: HashSet<T>) -> Self {
        Self::new(initial).with_differ(SetDiffer::default())
    }
}

impl FiberRef<usize> {
    /// Operations a fiber runs before yielding to others. Joins keep the
    /// parent's value.
    #[must_use]
    pub fn max_ops_before_yield() -> Self {
        static REF: OnceLock<FiberRef<usize>> = OnceLock::new();
        REF.get_or_init(|| {
            Self::with_id(FiberRefId::MAX_OPS_BEFORE_YIELD, DEFAULT_MAX_OPS_BEFORE_YIELD)
                .with_join(|parent, _| *parent)
        })
        .clone()
    }
}

impl FiberRef<BTreeMap<String, String>> {
    /// Key/value pairs attached to every log event a fiber emits.
    #[must_use]
    pub fn log_annotations() -> Self {
        static REF: OnceLock<FiberRef<BTreeMap<String, String>>> = OnceLock::new();
        REF.get_or_init(|| Self::with_id(FiberRefId::LOG_ANNOTATIONS, BTreeMap::new()))
            .clone()
    }
}

#[derive(Clone)]
struct RefEntry {
    def: Arc<FiberRefDef>,
    value: Value,
    /// Value at the time the owning fiber was forked.
    forked: Value,
}

/// The values of every fiber ref a fiber has touched.
#[derive(Clone, Default)]
pub struct FiberRefs {
    entries: BTreeMap<FiberRefId, RefEntry>,
    /// Forks between the root fiber and the owner. A ref with no entry
    /// reads as its initial value passed through `fork` this many times.
    depth: u32,
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl FiberRefs {
    /// The value of `fiber_ref`, or its initial value if never set.
    #[must_use]
    pub fn get<A: Data>(&self, fiber_ref: &FiberRef<A>) -> A {
        clone_value(&self.get_value(&fiber_ref.def))
    }

    /// Sets the value of `fiber_ref`.
    pub fn set<A: Data>(&mut self, fiber_ref: &FiberRef<A>, a: A) {
        self.set_value(&fiber_ref.def, value(a));
    }

    pub(crate) fn get_value(&self, def: &FiberRefDef) -> Value {
        self.entries
            .get(&def.id)
            .map_or_else(|| self.inherited(def), |e| Arc::clone(&e.value))
    }

    /// What an unset ref holds in this fiber.
    fn inherited(&self, def: &FiberRefDef) -> Value {
        let mut v = Arc::clone(&def.initial);
        if def.transforms_on_fork {
            for _ in 0..self.depth {
                v = (def.fork)(&v);
            }
        }
        v
    }

    pub(crate) fn set_value(&mut self, def: &Arc<FiberRefDef>, v: Value) {
        match self.entries.get_mut(&def.id) {
            Some(entry) => entry.value = v,
            None => {
                let forked = self.inherited(def);
                self.entries.insert(
                    def.id,
                    RefEntry {
                        def: Arc::clone(def),
                        value: v,
                        forked,
                    },
                );
            }
        }
    }

    /// The operation budget for a fiber holding these refs.
    pub(crate) fn max_ops(&self) -> usize {
        let def = FiberRef::max_ops_before_yield();
        self.get(&def).max(1)
    }

    /// The refs a child starts with: every value passed through its ref's
    /// fork transform.
    #[must_use]
    pub fn fork(&self) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|(id, entry)| {
                let v = (entry.def.fork)(&entry.value);
                (
                    *id,
                    RefEntry {
                        def: Arc::clone(&entry.def),
                        value: Arc::clone(&v),
                        forked: v,
                    },
                )
            })
            .collect();
        Self {
            entries,
            depth: self.depth.saturating_add(1),
        }
    }

    /// Merges a completed child's refs into these.
    pub fn join(&mut self, child: &Self) {
        for entry in child.entries.values() {
            let parent = self.get_value(&entry.def);
            let patched = entry.def.differ.merge(&entry.forked, &entry.value, &parent);
            if Arc::ptr_eq(&patched, &parent) {
                continue;
            }
            let joined = (entry.def.join)(&parent, &patched);
            self.set_value(&entry.def, joined);
        }
    }
}
