//! Sleeping and reading the clock from effects.

use crate::effect::node::{
    async_node, succeed_node, sync_node, unit_node, unit_value, value, with_fiber_node, NodeRef,
};
use crate::effect::{Data, Effect};
use crate::types::Time;
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn sleep_node(duration: Duration) -> NodeRef {
    with_fiber_node(move |ctx| {
        let clock = Arc::clone(ctx.clock());
        async_node(move |resume| {
            let id = clock.schedule(duration, Box::new(move || resume.resume(unit_node())));
            let clock = Arc::clone(&clock);
            Some(sync_node(move || {
                clock.cancel(id);
                Ok(unit_value())
            }))
        })
    })
}

impl<E: Data> Effect<(), E> {
    /// Suspends the fiber for `duration` of the runtime's clock.
    ///
    /// Interrupting the sleep cancels its timer.
    pub fn sleep(duration: Duration) -> Self {
        Self::from_node(sleep_node(duration))
    }
}

impl<E: Data> Effect<Time, E> {
    /// The current time of the runtime's clock.
    pub fn now() -> Self {
        Self::from_node(with_fiber_node(|ctx| succeed_node(value(ctx.clock().now()))))
    }
}
