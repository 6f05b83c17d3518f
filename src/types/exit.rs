//! Terminal results of fibers and effects.

use crate::types::cause::{Cause, Defect};
use crate::types::FiberId;
use core::fmt;

/// How a fiber or an effect ended: with a value or with a [`Cause`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Exit<A, E> {
    /// Completed with a value.
    Success(A),
    /// Failed, died, or was interrupted.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// A successful exit.
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// A typed failure.
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// A failure with an arbitrary cause.
    pub const fn fail_cause(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// A defect.
    pub const fn die(defect: Defect) -> Self {
        Self::Failure(Cause::Die(defect))
    }

    /// A defect carrying only a message.
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::Failure(Cause::die_message(message))
    }

    /// Interruption by `fiber`.
    pub const fn interrupt(fiber: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(fiber))
    }

    /// True for [`Exit::Success`].
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// True for [`Exit::Failure`].
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// True if the exit failed and its cause contains an interruption.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Failure(c) if c.is_interrupted())
    }

    /// The success value, if any.
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(a) => Some(a),
            Self::Failure(_) => None,
        }
    }

    /// The failure cause, if any.
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(c) => Some(c),
        }
    }

    /// Maps the success value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B, E> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(c) => Exit::Failure(c),
        }
    }

    /// Maps every typed failure in the cause.
    pub fn map_err<E2>(self, f: impl FnMut(E) -> E2) -> Exit<A, E2> {
        match self {
            Self::Success(a) => Exit::Success(a),
            Self::Failure(c) => Exit::Failure(c.map(f)),
        }
    }

    /// Combines two exits as if one ran after the other.
    pub fn zip<B>(self, that: Exit<B, E>) -> Exit<(A, B), E> {
        self.zip_with(that, Cause::sequential)
    }

    /// Combines two exits of concurrent computations.
    pub fn zip_par<B>(self, that: Exit<B, E>) -> Exit<(A, B), E> {
        self.zip_with(that, Cause::parallel)
    }

    fn zip_with<B>(
        self,
        that: Exit<B, E>,
        combine: impl FnOnce(Cause<E>, Cause<E>) -> Cause<E>,
    ) -> Exit<(A, B), E> {
        match (self, that) {
            (Self::Success(a), Exit::Success(b)) => Exit::Success((a, b)),
            (Self::Failure(l), Exit::Failure(r)) => Exit::Failure(combine(l, r)),
            (Self::Failure(c), Exit::Success(_)) | (Self::Success(_), Exit::Failure(c)) => {
                Exit::Failure(c)
            }
        }
    }

    /// Converts into a `Result` carrying the whole cause.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(c) => Err(c),
        }
    }

    /// Forgets payloads, keeping the shape of the cause. This is the view
    /// scope finalizers receive.
    pub fn discard(&self) -> Exit<(), ()> {
        match self {
            Self::Success(_) => Exit::Success(()),
            Self::Failure(c) => Exit::Failure(erase_failures(c)),
        }
    }
}

fn erase_failures<E>(cause: &Cause<E>) -> Cause<()> {
    match cause {
        Cause::Empty => Cause::Empty,
        Cause::Fail(_) => Cause::Fail(()),
        Cause::Die(d) => Cause::Die(d.clone()),
        Cause::Interrupt(id) => Cause::Interrupt(*id),
        Cause::Sequential(l, r) => Cause::Sequential(
            Box::new(erase_failures(l)),
            Box::new(erase_failures(r)),
        ),
        Cause::Parallel(l, r) => {
            Cause::Parallel(Box::new(erase_failures(l)), Box::new(erase_failures(r)))
        }
    }
}

impl<E> Exit<(), E> {
    /// The successful unit exit.
    pub const fn unit() -> Self {
        Self::Success(())
    }
}

impl<A, E: fmt::Debug> Exit<A, E> {
    /// Returns the success value.
    ///
    /// # Panics
    ///
    /// Panics with the rendered cause if the exit is a failure.
    #[track_caller]
    pub fn unwrap(self) -> A {
        match self {
            Self::Success(a) => a,
            Self::Failure(c) => panic!("called `Exit::unwrap` on a failure:\n{}", c.pretty()),
        }
    }
}
