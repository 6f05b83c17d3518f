//! The cause algebra: a structured record of why a computation stopped.
//!
//! A [`Cause`] is a tree. Leaves say what happened (a typed failure, a
//! defect, an interruption by some fiber) and inner nodes say how the leaves
//! relate in time: [`Cause::Sequential`] for failures that happened one after
//! another (a body failed, then its finalizer failed) and [`Cause::Parallel`]
//! for failures of concurrent siblings.
//!
//! # Equality
//!
//! Equality is semantic, not structural. Both combinators associate,
//! [`Cause::Empty`] is the identity of both, and `Parallel` is commutative.
//! Two causes are compared by linearizing each into a list of steps, where
//! every step is the multiset of leaves that happened "at the same time".
//! Rendering ([`Display`](fmt::Display), [`Cause::pretty`]) keeps the order
//! the cause was built in.

use crate::types::FiberId;
use core::fmt;
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

/// An unexpected error: a panic, a broken invariant, a bug.
///
/// Defects are not part of a computation's declared error type and pass
/// through typed-failure handlers untouched.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Defect {
    message: Arc<str>,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    /// Renders a panic payload into a defect.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        Self::new(message)
    }

    /// The defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Defect({:?})", &*self.message)
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Why a computation terminated abnormally.
#[derive(Clone, Debug)]
pub enum Cause<E> {
    /// No failure at all. Identity of both combinators.
    Empty,
    /// An expected failure of the declared error type.
    Fail(E),
    /// An unexpected defect.
    Die(Defect),
    /// Interruption requested by the given fiber.
    Interrupt(FiberId),
    /// The left cause happened, then the right one.
    Sequential(Box<Cause<E>>, Box<Cause<E>>),
    /// Both causes happened concurrently.
    Parallel(Box<Cause<E>>, Box<Cause<E>>),
}

/// The single most relevant leaf of a cause; see [`Cause::squash`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Squashed<E> {
    /// The first typed failure.
    Fail(E),
    /// The first defect, when there is no typed failure.
    Die(Defect),
    /// The first interruptor, when there is neither.
    Interrupt(FiberId),
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<E> Cause<E> {
    /// The empty cause.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect.
    #[must_use]
    pub const fn die(defect: Defect) -> Self {
        Self::Die(defect)
    }

    /// A defect carrying only a message.
    #[must_use]
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// Interruption by `fiber`.
    #[must_use]
    pub const fn interrupt(fiber: FiberId) -> Self {
        Self::Interrupt(fiber)
    }

    /// `left` then `right`, dropping empty operands.
    #[must_use]
    pub fn sequential(left: Self, right: Self) -> Self {
        if left.is_empty() {
            right
        } else if right.is_empty() {
            left
        } else {
            Self::Sequential(Box::new(left), Box::new(right))
        }
    }

    /// `left` alongside `right`, dropping empty operands.
    #[must_use]
    pub fn parallel(left: Self, right: Self) -> Self {
        if left.is_empty() {
            right
        } else if right.is_empty() {
            left
        } else {
            Self::Parallel(Box::new(left), Box::new(right))
        }
    }

    /// Combines `causes` one after another, in order.
    ///
    /// The tree is balanced, so its depth grows with the logarithm of the
    /// number of causes.
    #[must_use]
    pub fn sequential_all(causes: impl IntoIterator<Item = Self>) -> Self {
        Self::balanced(causes.into_iter().collect(), Self::sequential)
    }

    /// Combines `causes` as concurrent, with a balanced tree.
    #[must_use]
    pub fn parallel_all(causes: impl IntoIterator<Item = Self>) -> Self {
        Self::balanced(causes.into_iter().collect(), Self::parallel)
    }

    fn balanced(mut level: Vec<Self>, combine: fn(Self, Self) -> Self) -> Self {
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut pairs = level.into_iter();
            while let Some(left) = pairs.next() {
                next.push(match pairs.next() {
                    Some(right) => combine(left, right),
                    None => left,
                });
            }
            level = next;
        }
        level.pop().unwrap_or_default()
    }

    /// Visits every leaf left to right.
    fn for_each_leaf<'a>(&'a self, mut f: impl FnMut(&'a Self)) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Empty => {}
                Self::Fail(_) | Self::Die(_) | Self::Interrupt(_) => f(node),
                Self::Sequential(l, r) | Self::Parallel(l, r) => {
                    stack.push(r);
                    stack.push(l);
                }
            }
        }
    }

    fn any_leaf(&self, mut pred: impl FnMut(&Self) -> bool) -> bool {
        let mut found = false;
        self.for_each_leaf(|leaf| found = found || pred(leaf));
        found
    }

    /// True if the cause has no leaves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.any_leaf(|_| true)
    }

    /// True if the cause contains a typed failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.any_leaf(|leaf| matches!(leaf, Self::Fail(_)))
    }

    /// True if the cause contains a defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.any_leaf(|leaf| matches!(leaf, Self::Die(_)))
    }

    /// True if the cause contains an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.any_leaf(|leaf| matches!(leaf, Self::Interrupt(_)))
    }

    /// True if the cause contains interruptions and nothing else.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        self.is_interrupted() && !self.is_failure_or_die()
    }

    /// True if the computation failed for a real reason: a typed failure or
    /// a defect, as opposed to only being cancelled.
    #[must_use]
    pub fn is_failure_or_die(&self) -> bool {
        self.any_leaf(|leaf| matches!(leaf, Self::Fail(_) | Self::Die(_)))
    }

    /// All defects, left to right.
    #[must_use]
    pub fn defects(&self) -> Vec<Defect> {
        let mut out = Vec::new();
        self.for_each_leaf(|leaf| {
            if let Self::Die(d) = leaf {
                out.push(d.clone());
            }
        });
        out
    }

    /// Every fiber that interrupted this computation.
    #[must_use]
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        let mut out = BTreeSet::new();
        self.for_each_leaf(|leaf| {
            if let Self::Interrupt(id) = leaf {
                out.insert(*id);
            }
        });
        out
    }

    /// The cause with every typed failure removed.
    #[must_use]
    pub fn strip_failures(&self) -> Self {
        match self {
            Self::Fail(_) | Self::Empty => Self::Empty,
            Self::Die(d) => Self::Die(d.clone()),
            Self::Interrupt(id) => Self::Interrupt(*id),
            Self::Sequential(l, r) => Self::sequential(l.strip_failures(), r.strip_failures()),
            Self::Parallel(l, r) => Self::parallel(l.strip_failures(), r.strip_failures()),
        }
    }

    /// Maps every typed failure, keeping the shape.
    pub fn map<E2>(self, mut f: impl FnMut(E) -> E2) -> Cause<E2> {
        self.map_inner(&mut f)
    }

    fn map_inner<E2>(self, f: &mut impl FnMut(E) -> E2) -> Cause<E2> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Sequential(l, r) => {
                let l = l.map_inner(f);
                Cause::Sequential(Box::new(l), Box::new(r.map_inner(f)))
            }
            Self::Parallel(l, r) => {
                let l = l.map_inner(f);
                Cause::Parallel(Box::new(l), Box::new(r.map_inner(f)))
            }
        }
    }

    /// Linearizes into steps of concurrent leaves.
    fn steps(&self) -> Vec<Vec<&Self>> {
        let mut work = vec![Visit::Enter(self)];
        let mut done: Vec<Vec<Vec<&Self>>> = Vec::new();
        while let Some(visit) = work.pop() {
            match visit {
                Visit::Enter(node) => match node {
                    Self::Empty => done.push(Vec::new()),
                    Self::Fail(_) | Self::Die(_) | Self::Interrupt(_) => {
                        done.push(vec![vec![node]]);
                    }
                    Self::Sequential(l, r) => {
                        work.extend([Visit::Then, Visit::Enter(&**r), Visit::Enter(&**l)]);
                    }
                    Self::Parallel(l, r) => {
                        work.extend([Visit::Both, Visit::Enter(&**r), Visit::Enter(&**l)]);
                    }
                },
                Visit::Then | Visit::Both => {
                    let right = done.pop().unwrap_or_default();
                    let mut steps = done.pop().unwrap_or_default();
                    if matches!(visit, Visit::Then) {
                        steps.extend(right);
                    } else {
                        for (i, step) in right.into_iter().enumerate() {
                            if let Some(existing) = steps.get_mut(i) {
                                existing.extend(step);
                            } else {
                                steps.push(step);
                            }
                        }
                    }
                    done.push(steps);
                }
            }
        }
        done.pop().unwrap_or_default()
    }
}

// Work items of the post-order walk in `Cause::steps`.
enum Visit<'a, E> {
    Enter(&'a Cause<E>),
    Then,
    Both,
}

impl<E: Clone> Cause<E> {
    /// All typed failures, left to right.
    #[must_use]
    pub fn failures(&self) -> Vec<E> {
        let mut out = Vec::new();
        self.for_each_leaf(|leaf| {
            if let Self::Fail(e) = leaf {
                out.push(e.clone());
            }
        });
        out
    }

    /// The first typed failure, or the whole cause if there is none.
    pub fn failure_or_cause(self) -> Result<E, Self> {
        match self.failures().into_iter().next() {
            Some(e) => Ok(e),
            None => Err(self),
        }
    }

    /// The most relevant leaf: the first failure, else the first defect,
    /// else the first interruptor.
    #[must_use]
    pub fn squash(&self) -> Option<Squashed<E>> {
        if let Some(e) = self.failures().into_iter().next() {
            return Some(Squashed::Fail(e));
        }
        if let Some(d) = self.defects().into_iter().next() {
            return Some(Squashed::Die(d));
        }
        self.interruptors().into_iter().next().map(Squashed::Interrupt)
    }

    /// The cause with every interruption removed.
    #[must_use]
    pub fn strip_interrupts(&self) -> Self {
        match self {
            Self::Interrupt(_) | Self::Empty => Self::Empty,
            Self::Fail(_) | Self::Die(_) => self.clone(),
            Self::Sequential(l, r) => Self::sequential(l.strip_interrupts(), r.strip_interrupts()),
            Self::Parallel(l, r) => Self::parallel(l.strip_interrupts(), r.strip_interrupts()),
        }
    }
}

impl<E> Cause<Option<E>> {
    /// The end-of-stream sentinel: a failure with no payload.
    ///
    /// It carries no interruption, so it is never mistaken for cancellation.
    #[must_use]
    pub const fn end_of_stream() -> Self {
        Self::Fail(None)
    }

    /// True if the cause carries the end-of-stream sentinel.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.any_leaf(|leaf| matches!(leaf, Self::Fail(None)))
    }

    /// `None` if the stream simply ended, otherwise the real cause.
    pub fn flip_option(self) -> Option<Cause<E>> {
        if self.is_end_of_stream() {
            return None;
        }
        Some(self.map(|e| match e {
            Some(e) => e,
            None => unreachable!("end-of-stream leaves were ruled out above"),
        }))
    }
}

fn leaf_eq<E: PartialEq>(a: &Cause<E>, b: &Cause<E>) -> bool {
    match (a, b) {
        (Cause::Fail(x), Cause::Fail(y)) => x == y,
        (Cause::Die(x), Cause::Die(y)) => x == y,
        (Cause::Interrupt(x), Cause::Interrupt(y)) => x == y,
        _ => false,
    }
}

fn same_multiset<E: PartialEq>(left: &[&Cause<E>], right: &[&Cause<E>]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut used = vec![false; right.len()];
    left.iter().all(|l| {
        let hit = right
            .iter()
            .enumerate()
            .find(|(i, r)| !used[*i] && leaf_eq(l, r))
            .map(|(i, _)| i);
        hit.map(|i| used[i] = true).is_some()
    })
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.steps(), other.steps());
        a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| same_multiset(x, y))
    }
}

impl<E: Eq> Eq for Cause<E> {}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Fail(e) => write!(f, "Fail({e:?})"),
            Self::Die(d) => write!(f, "Die({d})"),
            Self::Interrupt(id) => write!(f, "Interrupt({id})"),
            Self::Sequential(l, r) => write!(f, "({l} ; {r})"),
            Self::Parallel(l, r) => write!(f, "({l} | {r})"),
        }
    }
}

impl<E: fmt::Debug> Cause<E> {
    /// Multi-line rendering of the tree, one leaf or combinator per line.
    #[must_use]
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        self.pretty_into(&mut out, 0);
        out
    }

    fn pretty_into(&self, out: &mut String, depth: usize) {
        use std::fmt::Write as _;

        let pad = "  ".repeat(depth);
        match self {
            Self::Sequential(l, r) | Self::Parallel(l, r) => {
                let label = if matches!(self, Self::Sequential(..)) {
                    "Sequential"
                } else {
                    "Parallel"
                };
                let _ = writeln!(out, "{pad}{label}");
                l.pretty_into(out, depth + 1);
                r.pretty_into(out, depth + 1);
            }
            leaf => {
                let _ = writeln!(out, "{pad}{leaf}");
            }
        }
    }
}
