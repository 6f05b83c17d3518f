//! Runtime builder and the threaded runtime.

use crate::effect::{Data, Effect};
use crate::error::{Error, ErrorKind, FiberFailure};
use crate::fiber::RuntimeFiber;
use crate::fiber_ref::{FiberRef, FiberRefs};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::env_config::apply_env_overrides;
use crate::runtime::scheduler::Worker;
use crate::runtime::shared::RuntimeShared;
use crate::time::{Clock, WallClock};
use crate::tracing_compat::{debug, debug_span, warn};
use crate::types::{Exit, Time};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Builder for constructing a runtime with custom configuration.
#[derive(Clone, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the number of operations a fiber runs before yielding.
    #[must_use]
    pub fn max_ops_before_yield(mut self, ops: usize) -> Self {
        self.config.max_ops_before_yield = ops;
        self
    }

    /// Enable or disable parking for idle workers.
    #[must_use]
    pub fn enable_parking(mut self, enable: bool) -> Self {
        self.config.enable_parking = enable;
        self
    }

    /// Register a callback to run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// Apply `FIBRA_*` environment variable overrides.
    ///
    /// Builder methods called afterwards take precedence.
    pub fn with_env_overrides(mut self) -> Result<Self, Error> {
        apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Build a runtime from this configuration.
    pub fn build(self) -> Result<Runtime, Error> {
        Runtime::with_config(self.config)
    }

    /// Single-threaded runtime: one worker draining the ready queue.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// Multi-threaded runtime with defaults.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }
}

/// A runtime whose fibers run on a pool of OS threads.
///
/// Dropping the last handle stops the workers, joins them and discards
/// every fiber that has not completed.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Construct a runtime from the given configuration.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self, Error> {
        config.normalize();
        let clock = Arc::new(WallClock::new());
        let mut refs = FiberRefs::default();
        refs.set(&FiberRef::max_ops_before_yield(), config.max_ops_before_yield);
        let dyn_clock: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        let shared = RuntimeShared::new(dyn_clock, refs);

        let mut workers = Vec::with_capacity(config.worker_threads);
        for index in 0..config.worker_threads {
            match spawn_worker(index, &config, &shared) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    warn!(index, error = %err, "failed to spawn worker thread");
                    shutdown_workers(&shared, workers);
                    clock.shutdown();
                    return Err(Error::new(ErrorKind::ThreadSpawn)
                        .with_message(format!("worker {index}"))
                        .with_source(err));
                }
            }
        }
        debug!(workers = config.worker_threads, "runtime started");
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                shared,
                clock,
                workers: Mutex::new(workers),
            }),
        })
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The runtime's current time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.clock.now()
    }

    /// Number of fibers that have not completed.
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.inner.shared.live_fibers()
    }

    /// Starts `effect` as a root fiber and returns its handle.
    pub fn run_fork<A: Data, E: Data>(&self, effect: Effect<A, E>) -> RuntimeFiber<A, E> {
        RuntimeFiber::from_shared(self.inner.shared.spawn_root(effect.into_node()))
    }

    /// Starts `effect` and calls `callback` with its exit once it is done.
    ///
    /// The callback runs on whichever thread completes the fiber.
    pub fn run_callback<A, E, F>(&self, effect: Effect<A, E>, callback: F) -> RuntimeFiber<A, E>
    where
        A: Data,
        E: Data,
        F: FnOnce(Exit<A, E>) + Send + 'static,
    {
        let fiber = self.run_fork(effect);
        fiber.on_done(callback);
        fiber
    }

    /// Runs `effect` and blocks the calling thread until it exits.
    ///
    /// Must not be called from a fiber of this runtime.
    pub fn run_sync<A: Data, E: Data>(&self, effect: Effect<A, E>) -> Exit<A, E> {
        self.run_fork(effect).await_blocking()
    }

    /// Like [`run_sync`](Self::run_sync), with the failure surfaced as a
    /// [`FiberFailure`] carrying the full cause.
    pub fn run_sync_or_throw<A: Data, E: Data>(
        &self,
        effect: Effect<A, E>,
    ) -> Result<A, FiberFailure<E>> {
        self.run_sync(effect).into_result().map_err(FiberFailure::new)
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("shared", &self.inner.shared)
            .finish()
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    shared: Arc<RuntimeShared>,
    clock: Arc<WallClock>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        shutdown_workers(&self.shared, workers);
        self.clock.shutdown();
        debug!("runtime stopped");
    }
}

fn spawn_worker(
    index: usize,
    config: &RuntimeConfig,
    shared: &Arc<RuntimeShared>,
) -> std::io::Result<JoinHandle<()>> {
    let worker = Worker::new(index, Arc::clone(shared), config.enable_parking);
    let on_start = config.on_thread_start.clone();
    let on_stop = config.on_thread_stop.clone();
    std::thread::Builder::new()
        .name(format!("{}-{index}", config.thread_name_prefix))
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            let _span = debug_span!("fibra-worker", index).entered();
            if let Some(callback) = on_start.as_ref() {
                callback();
            }
            worker.run_loop();
            if let Some(callback) = on_stop.as_ref() {
                callback();
            }
        })
}

fn shutdown_workers(shared: &RuntimeShared, workers: Vec<JoinHandle<()>>) {
    shared.stop();
    for handle in workers {
        if handle.join().is_err() {
            warn!("worker thread panicked");
        }
    }
    shared.shutdown();
}
