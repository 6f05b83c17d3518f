//! Logging from inside effects.
//!
//! Events go through [`tracing_compat`](crate::tracing_compat), tagged with
//! the running fiber's id and the current value of
//! [`FiberRef::log_annotations`].

use crate::effect::node::{unit_node, with_fiber_node};
use crate::effect::{Data, Effect};
use crate::fiber_ref::FiberRef;
use crate::tracing_compat::{debug, error, info, trace, warn};
use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Severity of a log event emitted by [`Effect::log_at`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Very fine-grained diagnostics.
    Trace,
    /// Diagnostics.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected that the program recovered from.
    Warning,
    /// A failure.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

impl<E: Data> Effect<(), E> {
    /// Logs `message` at [`LogLevel::Info`].
    pub fn log(message: impl Into<String>) -> Self {
        Self::log_at(LogLevel::Info, message)
    }

    /// Logs `message` at `level`, annotated with the fiber id and the
    /// fiber's log annotations.
    pub fn log_at(level: LogLevel, message: impl Into<String>) -> Self {
        let message: Arc<str> = Arc::from(message.into());
        let annotations = FiberRef::log_annotations();
        Self::from_node(with_fiber_node(move |ctx| {
            let fiber = ctx.fiber_id();
            let annotations: BTreeMap<String, String> = ctx.refs().get(&annotations);
            let message = &*message;
            match level {
                LogLevel::Trace => {
                    trace!(fiber = %fiber, annotations = ?annotations, "{message}");
                }
                LogLevel::Debug => {
                    debug!(fiber = %fiber, annotations = ?annotations, "{message}");
                }
                LogLevel::Info => {
                    info!(fiber = %fiber, annotations = ?annotations, "{message}");
                }
                LogLevel::Warning => {
                    warn!(fiber = %fiber, annotations = ?annotations, "{message}");
                }
                LogLevel::Error => {
                    error!(fiber = %fiber, annotations = ?annotations, "{message}");
                }
            }
            unit_node()
        }))
    }
}

impl<A: Data, E: Data> Effect<A, E> {
    /// Runs `self` with `key = value` added to the fiber's log annotations.
    pub fn annotate_logs(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        let annotations = FiberRef::log_annotations();
        let annotated = annotations.clone();
        annotations
            .get()
            .flat_map(move |mut current: BTreeMap<String, String>| {
                current.insert(key.clone(), value.clone());
                annotated.locally(current, self.clone())
            })
    }
}
