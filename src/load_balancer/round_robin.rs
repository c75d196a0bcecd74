//! Round-robin load balancing strategy.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, registry::Registry, SelectionContext, Strategy};

/// Round-robin selector.
/// Advances the context's shared cursor once per probe, skipping non-Up
/// backends, for at most `count` probes.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for RoundRobin {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    fn select<'r>(
        &self,
        registry: &'r Registry,
        ctx: &SelectionContext<'_>,
    ) -> Option<&'r Arc<Backend>> {
        let count = registry.snapshot_count();
        if count == 0 {
            return None;
        }

        for _ in 0..count {
            let index = ctx.cursor.fetch_add(1, Ordering::Relaxed) % count;
            match registry.get(index) {
                Some(backend) if backend.is_up() => return Some(backend),
                _ => continue,
            }
        }
        None
    }
}
