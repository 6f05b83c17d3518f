//! Error types and error handling strategy for fibra.
//!
//! Two kinds of failure exist side by side:
//!
//! - Failures *of effects* are values: a fiber ends with an
//!   [`Exit`](crate::types::Exit) whose [`Cause`] records typed failures,
//!   defects and interruptions. [`FiberFailure`] wraps such a cause when it
//!   has to cross into `Result`-based code.
//! - Failures *of the runtime itself* (bad configuration, a worker thread
//!   that could not be spawned, a handle pointing at a vanished fiber) are
//!   [`Error`]s classified by [`ErrorKind`].
//!
//! Panics inside fiber code never surface here; the interpreter turns them
//! into defects.

use crate::runtime::config::ConfigError;
use crate::types::Cause;
use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Interruption ===
    /// The operation was interrupted.
    Interrupted,

    // === Lifecycle ===
    /// No live fiber has the given id.
    FiberNotFound,
    /// The scope is closing or closed.
    ScopeClosed,
    /// Invalid state transition.
    InvalidStateTransition,

    // === Setup ===
    /// Invalid runtime configuration.
    Config,
    /// A worker thread could not be spawned.
    ThreadSpawn,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Interrupted => ErrorCategory::Interruption,
            Self::FiberNotFound | Self::ScopeClosed | Self::InvalidStateTransition => {
                ErrorCategory::Lifecycle
            }
            Self::Config | Self::ThreadSpawn => ErrorCategory::Setup,
            Self::Internal => ErrorCategory::Internal,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns true for errors after which the runtime should not be used.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal | Self::InvalidStateTransition)
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Interruption of fibers.
    Interruption,
    /// Fiber and scope lifecycle errors.
    Lifecycle,
    /// Runtime construction errors.
    Setup,
    /// Internal runtime errors.
    Internal,
    /// User-originated errors.
    User,
}

/// The main error type for runtime operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents interruption.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self.kind, ErrorKind::Interrupted)
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true for errors after which the runtime should not be used.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(e.to_string())
            .with_source(e)
    }
}

/// A fiber's failure, surfaced as a `std::error::Error`.
///
/// Carries the whole [`Cause`]: every typed failure, defect and
/// interruption the fiber ended with.
#[derive(Clone, PartialEq, Eq)]
pub struct FiberFailure<E> {
    cause: Cause<E>,
}

impl<E> FiberFailure<E> {
    /// Wraps a cause.
    #[must_use]
    pub const fn new(cause: Cause<E>) -> Self {
        Self { cause }
    }

    /// The cause the fiber failed with.
    #[must_use]
    pub const fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// Unwraps the cause.
    #[must_use]
    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }

    /// Maps the failure to the runtime [`ErrorKind`] that describes it best.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        if self.cause.is_interrupted_only() {
            ErrorKind::Interrupted
        } else {
            ErrorKind::User
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for FiberFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FiberFailure").field(&self.cause).finish()
    }
}

impl<E: fmt::Debug> fmt::Display for FiberFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber failed: {}", self.cause)
    }
}

impl<E: fmt::Debug> std::error::Error for FiberFailure<E> {}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }
}

/// A specialized Result type for runtime operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FiberId;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_message() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_message() {
        let err = Error::new(ErrorKind::ScopeClosed).with_message("scope S3");
        assert_eq!(err.to_string(), "ScopeClosed: scope S3");
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::new(ErrorKind::User)
            .with_message("outer")
            .with_source(Underlying);
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn config_error_converts() {
        let err: Error = ConfigError::InvalidEnv {
            var: "FIBRA_ENABLE_PARKING",
            expected: "bool",
            value: "maybe".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.category(), ErrorCategory::Setup);
        assert!(err.source().is_some());
    }

    #[test]
    fn result_ext_adds_message() {
        let res: core::result::Result<(), Error> = Err(Error::new(ErrorKind::FiberNotFound));
        let err = res.context("join failed").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::FiberNotFound);
        assert_eq!(err.to_string(), "FiberNotFound: join failed");
    }

    #[test]
    fn fatal_kinds() {
        assert!(ErrorKind::Internal.is_fatal());
        assert!(ErrorKind::InvalidStateTransition.is_fatal());
        assert!(!ErrorKind::Interrupted.is_fatal());
        assert!(!ErrorKind::Config.is_fatal());
    }

    #[test]
    fn fiber_failure_keeps_cause() {
        let cause = Cause::parallel(
            Cause::fail("boom"),
            Cause::interrupt(FiberId::new_for_test(1, 0)),
        );
        let failure = FiberFailure::new(cause.clone());
        assert_eq!(failure.cause(), &cause);
        assert_eq!(failure.kind(), ErrorKind::User);
        assert!(failure.to_string().starts_with("fiber failed:"));

        let interrupted: FiberFailure<&str> =
            FiberFailure::new(Cause::interrupt(FiberId::new_for_test(2, 0)));
        assert_eq!(interrupted.kind(), ErrorKind::Interrupted);
    }
}
