//! Random load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{
    backend::Backend, nth_up, registry::Registry, SelectionContext, Strategy,
};

/// Uniform choice over the Up backends.
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select<'r>(
        &self,
        registry: &'r Registry,
        _ctx: &SelectionContext<'_>,
    ) -> Option<&'r Arc<Backend>> {
        let up = registry.up_count();
        if up == 0 {
            return None;
        }
        nth_up(registry, fastrand::usize(..up)).or_else(|| nth_up(registry, 0))
    }
}
