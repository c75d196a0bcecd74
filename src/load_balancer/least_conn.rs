//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, registry::Registry, SelectionContext, Strategy};

/// Least connections selector.
/// Selects the Up backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for LeastConnections {
    fn name(&self) -> &'static str {
        "leastconn"
    }

    fn select<'r>(
        &self,
        registry: &'r Registry,
        _ctx: &SelectionContext<'_>,
    ) -> Option<&'r Arc<Backend>> {
        // Strict `<` keeps the lowest index on ties.
        let mut best: Option<(&'r Arc<Backend>, usize)> = None;
        for backend in registry.iter().filter(|b| b.is_up()) {
            let active = backend.active_connections();
            match best {
                Some((_, min)) if active >= min => {}
                _ => best = Some((backend, active)),
            }
        }
        best.map(|(backend, _)| backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::registry_with;
    use crate::load_balancer::{BackendState, SelectionKey};
    use std::sync::atomic::AtomicUsize;

    fn pick(reg: &Registry) -> Option<usize> {
        let cursor = AtomicUsize::new(0);
        let ctx = SelectionContext {
            key: SelectionKey::default(),
            cursor: &cursor,
        };
        LeastConnections::new().select(reg, &ctx).map(|b| b.index())
    }

    fn load(reg: &Registry, index: usize, n: usize) {
        for _ in 0..n {
            reg.get(index).unwrap().inc_connections();
        }
    }

    #[test]
    fn test_least_conn() {
        let reg = registry_with(&[BackendState::Up; 3]);
        load(&reg, 0, 3);
        load(&reg, 1, 1);
        load(&reg, 2, 2);

        assert_eq!(pick(&reg), Some(1));

        // [3, 2, 2] after one more on index 1: lowest index among the minimum.
        load(&reg, 1, 1);
        assert_eq!(pick(&reg), Some(1));

        // [2, 2, 2]: tie resolves to index 0.
        reg.get(0).unwrap().dec_connections();
        assert_eq!(pick(&reg), Some(0));
    }

    #[test]
    fn ignores_non_up_backends() {
        let reg = registry_with(&[BackendState::Down, BackendState::Draining, BackendState::Up]);
        load(&reg, 2, 10);
        assert_eq!(pick(&reg), Some(2));
    }

    #[test]
    fn none_when_no_backend_up() {
        assert_eq!(pick(&Registry::with_capacity(1)), None);
        assert_eq!(pick(&registry_with(&[BackendState::Down; 2])), None);
    }
}
