//! Hash-based (session affinity) load balancing strategy.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::load_balancer::{
    backend::Backend, nth_up, registry::Registry, SelectionContext, Strategy,
};

/// Which part of the selection key feeds the hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSource {
    /// Client source IP (port ignored).
    ClientAddr,
    /// Request path.
    Path,
}

/// Maps a key onto the Up subset: `hash(key) % up_count`.
///
/// The same key lands on the same backend as long as the Up set is
/// unchanged. Path hashing falls back to the client address when the
/// connection carries no path. Without any key the first Up backend is used.
#[derive(Debug)]
pub struct HashStrategy {
    source: HashSource,
}

impl HashStrategy {
    pub fn new(source: HashSource) -> Self {
        Self { source }
    }

    fn key_hash(&self, ctx: &SelectionContext<'_>) -> Option<u64> {
        let mut hasher = DefaultHasher::new();
        match self.source {
            HashSource::ClientAddr => ctx.key.client?.hash(&mut hasher),
            HashSource::Path => match ctx.key.path {
                Some(path) => path.hash(&mut hasher),
                None => ctx.key.client?.hash(&mut hasher),
            },
        }
        Some(hasher.finish())
    }
}

impl Strategy for HashStrategy {
    fn name(&self) -> &'static str {
        match self.source {
            HashSource::ClientAddr => "iphash",
            HashSource::Path => "urihash",
        }
    }

    fn select<'r>(
        &self,
        registry: &'r Registry,
        ctx: &SelectionContext<'_>,
    ) -> Option<&'r Arc<Backend>> {
        let up = registry.up_count();
        if up == 0 {
            return None;
        }
        let Some(hash) = self.key_hash(ctx) else {
            return nth_up(registry, 0);
        };
        let target = (hash % up as u64) as usize;
        // A backend may go down between counting and walking.
        nth_up(registry, target).or_else(|| nth_up(registry, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_support::registry_with;
    use crate::load_balancer::{BackendState, SelectionKey};
    use std::net::IpAddr;
    use std::sync::atomic::AtomicUsize;

    fn pick(lb: &HashStrategy, reg: &Registry, key: SelectionKey<'_>) -> Option<usize> {
        let cursor = AtomicUsize::new(0);
        let ctx = SelectionContext { key, cursor: &cursor };
        lb.select(reg, &ctx).map(|b| b.index())
    }

    #[test]
    fn same_client_same_backend() {
        let reg = registry_with(&[BackendState::Up; 4]);
        let lb = HashStrategy::new(HashSource::ClientAddr);
        for last in 1..=50u8 {
            let ip: IpAddr = [192, 168, 1, last].into();
            let first = pick(&lb, &reg, SelectionKey::client(ip)).unwrap();
            for _ in 0..5 {
                assert_eq!(pick(&lb, &reg, SelectionKey::client(ip)), Some(first));
            }
        }
    }

    #[test]
    fn spreads_clients_over_backends() {
        let reg = registry_with(&[BackendState::Up; 4]);
        let lb = HashStrategy::new(HashSource::ClientAddr);
        let mut seen = [false; 4];
        for last in 0..=255u8 {
            let ip: IpAddr = [10, 0, 0, last].into();
            seen[pick(&lb, &reg, SelectionKey::client(ip)).unwrap()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn never_picks_down_backend() {
        let reg = registry_with(&[BackendState::Up, BackendState::Down, BackendState::Up]);
        let lb = HashStrategy::new(HashSource::Path);
        for i in 0..100 {
            let path = format!("/item/{i}");
            assert_ne!(pick(&lb, &reg, SelectionKey::path(&path)), Some(1));
        }
    }

    #[test]
    fn missing_key_falls_back_to_first_up() {
        let reg = registry_with(&[BackendState::Down, BackendState::Up, BackendState::Up]);
        for source in [HashSource::Path, HashSource::ClientAddr] {
            let lb = HashStrategy::new(source);
            assert_eq!(pick(&lb, &reg, SelectionKey::default()), Some(1));
        }
    }

    #[test]
    fn path_hash_without_path_uses_client() {
        let reg = registry_with(&[BackendState::Up; 4]);
        let by_path = HashStrategy::new(HashSource::Path);
        let by_client = HashStrategy::new(HashSource::ClientAddr);
        let mut seen = [false; 4];
        for last in 0..=255u8 {
            let ip: IpAddr = [10, 0, 0, last].into();
            let picked = pick(&by_path, &reg, SelectionKey::client(ip)).unwrap();
            assert_eq!(Some(picked), pick(&by_client, &reg, SelectionKey::client(ip)));
            seen[picked] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn none_when_all_down() {
        let reg = registry_with(&[BackendState::Down; 2]);
        let lb = HashStrategy::new(HashSource::ClientAddr);
        let ip: IpAddr = [10, 0, 0, 1].into();
        assert_eq!(pick(&lb, &reg, SelectionKey::client(ip)), None);
    }
}
