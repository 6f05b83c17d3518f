//! Resource safety through scopes.
//!
//! Finalizers registered with [`Effect::add_finalizer`] or
//! [`Effect::acquire_release`] attach to the innermost scope of the running
//! fiber: the region opened by the nearest enclosing [`Effect::scoped`], or
//! the fiber's own scope when there is none.

use crate::effect::node::{
    flat_map_node, from_value, interrupt_status_node, succeed_node, value, with_fiber_node, Node,
};
use crate::effect::{Data, Effect};
use crate::record::Finalizer;
use crate::scope::{add_finalizer_node, Scope};
use crate::types::Exit;
use std::convert::Infallible;
use std::sync::Arc;

impl<A: Data, E: Data> Effect<A, E> {
    /// Runs `self` in a fresh scope that is closed, with the outcome of
    /// `self`, as soon as `self` completes.
    pub fn scoped(self) -> Self {
        Self::from_node(Arc::new(Node::WithScope(self.into_node())))
    }

    /// Acquires a resource uninterruptibly and registers `release` on the
    /// current scope.
    ///
    /// `release` runs exactly once with the acquired value and the exit the
    /// scope closes with. If `acquire` fails nothing is registered.
    pub fn acquire_release<F>(acquire: Self, release: F) -> Self
    where
        F: Fn(A, &Exit<(), ()>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let release = Arc::new(release);
        let body = flat_map_node(acquire.into_node(), move |acquired| {
            let resource: A = from_value(acquired);
            let release = Arc::clone(&release);
            let held = resource.clone();
            let finalizer: Finalizer = Arc::new(move |exit: &Exit<(), ()>| {
                release(held.clone(), exit).into_node()
            });
            with_fiber_node(move |ctx| {
                let resource = resource.clone();
                flat_map_node(
                    add_finalizer_node(ctx.scope(), Arc::clone(&finalizer)),
                    move |_| succeed_node(value(resource.clone())),
                )
            })
        });
        Self::from_node(interrupt_status_node(body, false))
    }

    /// Acquires a resource, uses it, and releases it when `use_` completes,
    /// whatever the outcome.
    pub fn acquire_use_release<B, U, R>(acquire: Self, use_: U, release: R) -> Effect<B, E>
    where
        B: Data,
        U: Fn(A) -> Effect<B, E> + Send + Sync + 'static,
        R: Fn(A, &Exit<(), ()>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        Self::acquire_release(acquire, release)
            .flat_map(use_)
            .scoped()
    }
}

impl<E: Data> Effect<(), E> {
    /// Registers `finalizer` on the current scope.
    pub fn add_finalizer<F>(finalizer: F) -> Self
    where
        F: Fn(&Exit<(), ()>) -> Effect<(), Infallible> + Send + Sync + 'static,
    {
        let finalizer: Finalizer =
            Arc::new(move |exit: &Exit<(), ()>| finalizer(exit).into_node());
        Self::from_node(with_fiber_node(move |ctx| {
            add_finalizer_node(ctx.scope(), Arc::clone(&finalizer))
        }))
    }
}

impl<E: Data> Effect<Scope, E> {
    /// The innermost scope of the running fiber.
    pub fn scope() -> Self {
        Self::from_node(with_fiber_node(|ctx| {
            succeed_node(value(Scope::from_id(ctx.scope())))
        }))
    }
}
