//! The fiber interpreter.
//!
//! A [`FiberRuntime`] owns everything a fiber needs while it runs: the next
//! instruction, an explicit continuation stack, the interruptibility stack,
//! the stack of open scopes, and the fiber's refs. [`FiberRuntime::run`]
//! steps through nodes until the fiber completes, suspends in an `Async`
//! node, or exhausts its operation budget. `FlatMap` chains never grow the
//! host stack, so arbitrarily long sequential programs run in constant host
//! stack space.
//!
//! Interruption is only observed at checkpoints: before `Sync`, `Async`,
//! `Fork`, `UpdateFiberRef`, `WithScope`, `WithFiber` and `Yield` nodes, and
//! when an uninterruptible region ends. While unwinding an interrupted fiber,
//! typed-failure handlers are skipped; finalizers and scope closes still run.

use crate::effect::node::{
    fail_node, fold_node, interrupt_status_node, succeed_node, unit_value, value,
    with_fiber_node, Cont, ErasedCause, ErasedExit, Handler, Node, NodeRef, Value,
};
use crate::effect::resume::RawResume;
use crate::fiber_ref::FiberRefs;
use crate::record::FiberShared;
use crate::runtime::shared::{fatal, RuntimeShared};
use crate::scope::close_node;
use crate::time::Clock;
use crate::tracing_compat::trace;
use crate::types::{Cause, Defect, Exit, FiberId, FiberRefId, ScopeId};
use smallvec::{smallvec, SmallVec};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// What the interpreter does next.
pub(crate) enum Instr {
    Eval(NodeRef),
    Return(Value),
    Throw(ErasedCause),
}

enum Frame {
    /// Holds a `FlatMap` node.
    OnSuccess(NodeRef),
    /// Holds a `Fold` node.
    Fold(NodeRef),
    RestoreInterrupt,
    CloseScope(ScopeId),
}

/// How a call to [`FiberRuntime::run`] ended.
pub(crate) enum RunOutcome {
    /// Budget exhausted or explicit yield; re-enqueue at the back.
    Yielded(Box<FiberRuntime>),
    /// Parked in its record until resumed or interrupted.
    Suspended,
    /// Completed; observers have been notified.
    Done,
}

pub(crate) struct FiberRuntime {
    shared: Arc<FiberShared>,
    runtime: Arc<RuntimeShared>,
    refs: FiberRefs,
    next: Instr,
    stack: Vec<Frame>,
    interruptible: SmallVec<[bool; 8]>,
    scopes: SmallVec<[ScopeId; 8]>,
    max_ops: usize,
}

impl FiberRuntime {
    pub(crate) fn new(
        shared: Arc<FiberShared>,
        runtime: Arc<RuntimeShared>,
        effect: NodeRef,
        refs: FiberRefs,
        owned_scope: ScopeId,
        interruptible: bool,
    ) -> Box<Self> {
        let max_ops = refs.max_ops();
        Box::new(Self {
            shared,
            runtime,
            refs,
            next: Instr::Eval(effect),
            stack: vec![Frame::CloseScope(owned_scope)],
            interruptible: smallvec![interruptible],
            scopes: smallvec![owned_scope],
            max_ops,
        })
    }

    pub(crate) fn id(&self) -> FiberId {
        self.shared.id()
    }

    pub(crate) fn set_next(&mut self, next: Instr) {
        self.next = next;
    }

    /// Puts the fiber back on its runtime's ready queue.
    pub(crate) fn reschedule(self: Box<Self>) {
        let runtime = Arc::clone(&self.runtime);
        runtime.schedule(self);
    }

    fn is_interruptible(&self) -> bool {
        self.interruptible.last().copied().unwrap_or(false)
    }

    fn should_interrupt(&self) -> bool {
        self.is_interruptible() && self.shared.interrupt_requested()
    }

    fn current_scope(&self) -> ScopeId {
        self.scopes
            .last()
            .copied()
            .unwrap_or_else(|| self.runtime.root_scope())
    }

    /// Interprets until the fiber completes, suspends or yields.
    pub(crate) fn run(mut self: Box<Self>) -> RunOutcome {
        let mut ops = 0_usize;
        loop {
            let instr = std::mem::replace(&mut self.next, Instr::Return(unit_value()));
            let next = match instr {
                Instr::Return(v) => match self.unwind_success(v) {
                    Ok(next) => next,
                    Err(v) => return self.complete(Exit::Success(v)),
                },
                Instr::Throw(cause) => match self.unwind_failure(cause) {
                    Ok(next) => next,
                    Err(cause) => return self.complete(Exit::Failure(cause)),
                },
                Instr::Eval(node) => {
                    if ops >= self.max_ops {
                        self.next = Instr::Eval(node);
                        return RunOutcome::Yielded(self);
                    }
                    ops += 1;
                    if node.is_checkpoint() && self.should_interrupt() {
                        Instr::Throw(self.shared.interrupt_cause())
                    } else {
                        match &*node {
                            Node::Async(register) => match self.suspend(register) {
                                Some(this) => {
                                    self = this;
                                    continue;
                                }
                                None => return RunOutcome::Suspended,
                            },
                            Node::Yield => {
                                self.next = Instr::Return(unit_value());
                                return RunOutcome::Yielded(self);
                            }
                            _ => self.eval(&node),
                        }
                    }
                }
            };
            self.next = next;
        }
    }

    fn eval(&mut self, node: &NodeRef) -> Instr {
        match &**node {
            Node::Succeed(v) => Instr::Return(Arc::clone(v)),
            Node::Fail(cause) => Instr::Throw(cause.clone()),
            Node::Sync(thunk) => match catch_unwind(AssertUnwindSafe(|| thunk())) {
                Ok(Ok(v)) => Instr::Return(v),
                Ok(Err(cause)) => Instr::Throw(cause),
                Err(panic) => Instr::Throw(Cause::Die(Defect::from_panic(panic))),
            },
            Node::FlatMap(effect, _) => {
                self.stack.push(Frame::OnSuccess(Arc::clone(node)));
                Instr::Eval(Arc::clone(effect))
            }
            Node::Fold { effect, .. } => {
                self.stack.push(Frame::Fold(Arc::clone(node)));
                Instr::Eval(Arc::clone(effect))
            }
            Node::InterruptStatus {
                effect,
                interruptible,
            } => {
                if *interruptible != self.is_interruptible() {
                    self.interruptible.push(*interruptible);
                    self.stack.push(Frame::RestoreInterrupt);
                }
                Instr::Eval(Arc::clone(effect))
            }
            Node::Fork { effect, daemon } => {
                let supervisor = if *daemon {
                    self.runtime.root_scope()
                } else {
                    self.current_scope()
                };
                let child = self.runtime.spawn(
                    Arc::clone(effect),
                    self.refs.fork(),
                    Some(self.id()),
                    supervisor,
                    self.is_interruptible(),
                );
                Instr::Return(value(child))
            }
            Node::UpdateFiberRef { def, f } => {
                let current = self.refs.get_value(def);
                match catch_unwind(AssertUnwindSafe(|| f(&current))) {
                    Ok((out, updated)) => {
                        if let Some(updated) = updated {
                            self.refs.set_value(def, updated);
                            if def.id == FiberRefId::MAX_OPS_BEFORE_YIELD {
                                self.max_ops = self.refs.max_ops();
                            }
                        }
                        Instr::Return(out)
                    }
                    Err(panic) => Instr::Throw(Cause::Die(Defect::from_panic(panic))),
                }
            }
            Node::WithScope(effect) => {
                let scope = self.runtime.open_scope(Some(self.current_scope()));
                self.scopes.push(scope);
                self.stack.push(Frame::CloseScope(scope));
                Instr::Eval(Arc::clone(effect))
            }
            Node::WithFiber(f) => {
                let mut ctx = FiberContext {
                    shared: &self.shared,
                    runtime: &self.runtime,
                    refs: &mut self.refs,
                    scope: self
                        .scopes
                        .last()
                        .copied()
                        .unwrap_or_else(|| self.runtime.root_scope()),
                    interruptible: self.interruptible.last().copied().unwrap_or(false),
                };
                let out = catch_unwind(AssertUnwindSafe(|| f(&mut ctx)));
                self.max_ops = self.refs.max_ops();
                match out {
                    Ok(next) => Instr::Eval(next),
                    Err(panic) => Instr::Throw(Cause::Die(Defect::from_panic(panic))),
                }
            }
            Node::Async(_) | Node::Yield => fatal("suspending node reached the evaluator"),
        }
    }

    /// Runs an `Async` registration. Returns the runtime if the fiber can
    /// keep going, or `None` once it is parked in its record.
    fn suspend(self: Box<Self>, register: &crate::effect::node::Register) -> Option<Box<Self>> {
        let interruptible = self.is_interruptible();
        let epoch = self.shared.begin_suspend(interruptible);
        let resume = RawResume::new(Arc::clone(&self.shared), epoch);
        let registered = catch_unwind(AssertUnwindSafe(|| register(resume)));

        let shared = Arc::clone(&self.shared);
        let mut cell = shared.lock_cell();
        let mut this = self;
        match registered {
            Err(panic) => {
                cell.abandon_suspend();
                drop(cell);
                this.next = Instr::Throw(Cause::Die(Defect::from_panic(panic)));
                Some(this)
            }
            Ok(canceler) => {
                if let Some(next) = cell.take_early_resume() {
                    drop(cell);
                    this.next = Instr::Eval(next);
                    Some(this)
                } else if interruptible && shared.interrupt_requested() {
                    cell.abandon_suspend();
                    drop(cell);
                    this.next = Instr::Eval(cancel_then_interrupt(canceler));
                    Some(this)
                } else {
                    cell.park(this, canceler);
                    None
                }
            }
        }
    }

    fn call(k: &Cont, v: Value) -> Instr {
        match catch_unwind(AssertUnwindSafe(|| k(v))) {
            Ok(next) => Instr::Eval(next),
            Err(panic) => Instr::Throw(Cause::Die(Defect::from_panic(panic))),
        }
    }

    fn handle(h: &Handler, cause: ErasedCause) -> Instr {
        match catch_unwind(AssertUnwindSafe(|| h(cause))) {
            Ok(next) => Instr::Eval(next),
            Err(panic) => Instr::Throw(Cause::Die(Defect::from_panic(panic))),
        }
    }

    /// Pops frames until one consumes `v`. `Err` means the stack is empty.
    fn unwind_success(&mut self, v: Value) -> Result<Instr, Value> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::OnSuccess(node) => {
                    let Node::FlatMap(_, k) = &*node else {
                        fatal("OnSuccess frame without a FlatMap node");
                    };
                    return Ok(Self::call(k, v));
                }
                Frame::Fold(node) => {
                    let Node::Fold { on_success, .. } = &*node else {
                        fatal("Fold frame without a Fold node");
                    };
                    return Ok(Self::call(on_success, v));
                }
                Frame::RestoreInterrupt => {
                    self.interruptible.pop();
                    if self.should_interrupt() {
                        return Ok(Instr::Throw(self.shared.interrupt_cause()));
                    }
                }
                Frame::CloseScope(scope) => {
                    let close = fold_node(
                        close_node(scope, Exit::Success(())),
                        fail_node,
                        move |_| succeed_node(Arc::clone(&v)),
                    );
                    return Ok(self.pop_scope(close));
                }
            }
        }
        Err(v)
    }

    /// Pops frames until a handler takes `cause`. `Err` means the stack is
    /// empty.
    fn unwind_failure(&mut self, mut cause: ErasedCause) -> Result<Instr, ErasedCause> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::OnSuccess(_) => {}
                Frame::Fold(node) => {
                    if self.should_interrupt() {
                        cause = self.with_interruption(cause.strip_failures());
                        continue;
                    }
                    let Node::Fold { on_failure, .. } = &*node else {
                        fatal("Fold frame without a Fold node");
                    };
                    return Ok(Self::handle(on_failure, cause));
                }
                Frame::RestoreInterrupt => {
                    self.interruptible.pop();
                    if self.should_interrupt() {
                        cause = self.with_interruption(cause);
                    }
                }
                Frame::CloseScope(scope) => {
                    let exit = ErasedExit::Failure(cause.clone()).discard();
                    let kept = cause.clone();
                    let close = fold_node(
                        close_node(scope, exit),
                        move |failed| fail_node(Cause::sequential(cause.clone(), failed)),
                        move |_| fail_node(kept.clone()),
                    );
                    return Ok(self.pop_scope(close));
                }
            }
        }
        Err(cause)
    }

    fn with_interruption(&self, cause: ErasedCause) -> ErasedCause {
        if cause.is_interrupted() {
            cause
        } else {
            Cause::sequential(cause, self.shared.interrupt_cause())
        }
    }

    fn pop_scope(&mut self, close: NodeRef) -> Instr {
        self.scopes.pop();
        if self.scopes.is_empty() {
            // The owned scope: the fiber is finishing and stays
            // uninterruptible from here on.
            self.interruptible.clear();
            self.interruptible.push(false);
            Instr::Eval(close)
        } else {
            Instr::Eval(interrupt_status_node(close, false))
        }
    }

    fn complete(self: Box<Self>, exit: ErasedExit) -> RunOutcome {
        let Self {
            shared,
            runtime,
            refs,
            ..
        } = *self;
        let observers = shared.complete(exit.clone(), refs);
        runtime.fiber_completed(shared.id());
        trace!(
            fiber = %shared.id(),
            success = exit.is_success(),
            observers = observers.len(),
            "fiber completed"
        );
        for observer in observers {
            observer(&exit);
        }
        RunOutcome::Done
    }
}

/// Runs `canceler` uninterruptibly, ignoring its outcome, then fails with
/// the fiber's interruption cause.
pub(crate) fn cancel_then_interrupt(canceler: Option<NodeRef>) -> NodeRef {
    let interrupt = with_fiber_node(|ctx| fail_node(ctx.interrupt_cause()));
    match canceler {
        None => interrupt,
        Some(canceler) => {
            let after_failure = Arc::clone(&interrupt);
            let cancel = fold_node(
                canceler,
                move |_| Arc::clone(&after_failure),
                move |_| Arc::clone(&interrupt),
            );
            interrupt_status_node(cancel, false)
        }
    }
}

/// What a `WithFiber` node sees of the running fiber.
pub(crate) struct FiberContext<'a> {
    shared: &'a Arc<FiberShared>,
    runtime: &'a Arc<RuntimeShared>,
    refs: &'a mut FiberRefs,
    scope: ScopeId,
    interruptible: bool,
}

impl FiberContext<'_> {
    pub(crate) fn fiber_id(&self) -> FiberId {
        self.shared.id()
    }

    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        self.runtime
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        self.runtime.clock()
    }

    pub(crate) fn refs(&self) -> &FiberRefs {
        self.refs
    }

    pub(crate) fn refs_mut(&mut self) -> &mut FiberRefs {
        self.refs
    }

    /// The innermost open scope.
    pub(crate) fn scope(&self) -> ScopeId {
        self.scope
    }

    pub(crate) fn is_interruptible(&self) -> bool {
        self.interruptible
    }

    pub(crate) fn interrupt_cause(&self) -> ErasedCause {
        self.shared.interrupt_cause()
    }
}
