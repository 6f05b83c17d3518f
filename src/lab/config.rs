//! Configuration for the lab runtime.
//!
//! The lab configuration controls deterministic execution:
//! - Random seed for scheduling decisions
//! - Operation budget of each fiber before it yields
//! - Step limit guarding against runaway programs

use crate::fiber_ref::DEFAULT_MAX_OPS_BEFORE_YIELD;
use crate::util::DetRng;

/// Configuration for the lab runtime.
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Random seed for deterministic scheduling.
    pub seed: u64,
    /// Operations a fiber runs before it yields.
    pub max_ops_before_yield: usize,
    /// Maximum number of fiber slices before forced termination.
    pub max_steps: Option<u64>,
    /// Pick the next runnable fiber at random (seeded) instead of in FIFO
    /// order.
    pub shuffle_ready: bool,
}

impl LabConfig {
    /// Creates a new lab configuration with the given seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            max_ops_before_yield: DEFAULT_MAX_OPS_BEFORE_YIELD,
            max_steps: Some(1_000_000),
            shuffle_ready: false,
        }
    }

    /// Sets the per-fiber operation budget. Zero is clamped to one.
    #[must_use]
    pub const fn max_ops_before_yield(mut self, ops: usize) -> Self {
        self.max_ops_before_yield = if ops == 0 { 1 } else { ops };
        self
    }

    /// Sets the maximum number of steps.
    #[must_use]
    pub const fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = Some(steps);
        self
    }

    /// Disables the step limit.
    #[must_use]
    pub const fn no_step_limit(mut self) -> Self {
        self.max_steps = None;
        self
    }

    /// Enables seeded random selection of the next runnable fiber.
    #[must_use]
    pub const fn shuffle_ready(mut self, value: bool) -> Self {
        self.shuffle_ready = value;
        self
    }

    /// Creates a deterministic RNG from this configuration.
    #[must_use]
    pub fn rng(&self) -> DetRng {
        DetRng::new(self.seed)
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        Self::new(42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LabConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.max_ops_before_yield, 2048);
        assert!(!config.shuffle_ready);
        assert!(config.max_steps.is_some());
    }

    #[test]
    fn zero_budget_is_clamped() {
        let config = LabConfig::new(1).max_ops_before_yield(0).no_step_limit();
        assert_eq!(config.max_ops_before_yield, 1);
        assert_eq!(config.max_steps, None);
    }

    #[test]
    fn rng_is_deterministic() {
        let config = LabConfig::new(12345);
        let mut rng1 = config.rng();
        let mut rng2 = config.rng();

        assert_eq!(rng1.next_u64(), rng2.next_u64());
    }
}
