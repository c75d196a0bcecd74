//! Weighted load balancing strategy.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, registry::Registry, SelectionContext, Strategy};

/// Weighted selector.
///
/// Maps the shared cursor onto the cumulative weights of the Up backends, so
/// over any window of `sum(weights)` consecutive picks with a stable Up set
/// each backend receives exactly its weight.
#[derive(Debug, Default)]
pub struct Weighted;

impl Weighted {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for Weighted {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn select<'r>(
        &self,
        registry: &'r Registry,
        ctx: &SelectionContext<'_>,
    ) -> Option<&'r Arc<Backend>> {
        let total: u64 = registry
            .iter()
            .filter(|b| b.is_up())
            .map(|b| u64::from(b.weight()))
            .sum();
        if total == 0 {
            return None;
        }

        let point = ctx.cursor.fetch_add(1, Ordering::Relaxed) as u64 % total;
        let mut accumulated = 0u64;
        let mut last_up = None;
        for backend in registry.iter().filter(|b| b.is_up()) {
            accumulated += u64::from(backend.weight());
            if point < accumulated {
                return Some(backend);
            }
            last_up = Some(backend);
        }
        // The Up set or a weight shrank between the two passes.
        last_up
    }
}
