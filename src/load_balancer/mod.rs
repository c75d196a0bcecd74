//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Work item accepted (client address known)
//!     → SelectionContext (client key + shared round-robin cursor)
//!     → Strategy::select over the Registry:
//!         - round_robin.rs (shared cursor, skip non-Up)
//!         - least_conn.rs (fewest in-flight, lowest index wins ties)
//!         - weighted.rs (share proportional to weight)
//!         - hash.rs (source address / request path affinity)
//!         - random.rs (uniform over Up backends)
//!     → backend.rs (lease: in-flight count held until work completes)
//! ```
//!
//! # Design Decisions
//! - Strategies are read-only over the registry and never block
//! - Every strategy runs in time bounded by the registry size
//! - "No backend" is `None`, not an error
//! - Built-in strategies are plain types behind one trait; no dynamic loading

pub mod backend;
pub mod hash;
pub mod least_conn;
pub mod random;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::engine::error::{EngineError, EngineResult};
use backend::Backend;
use registry::Registry;

pub use backend::{BackendLease, BackendSnapshot, BackendState};
pub use hash::{HashSource, HashStrategy};
pub use least_conn::LeastConnections;
pub use random::RandomStrategy;
pub use round_robin::RoundRobin;
pub use weighted::Weighted;

/// Optional per-request affinity key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionKey<'a> {
    /// Client source address.
    pub client: Option<IpAddr>,
    /// Request path, when the protocol layer knows it.
    pub path: Option<&'a str>,
}

impl<'a> SelectionKey<'a> {
    pub fn client(ip: IpAddr) -> Self {
        Self {
            client: Some(ip),
            path: None,
        }
    }

    pub fn path(path: &'a str) -> Self {
        Self {
            client: None,
            path: Some(path),
        }
    }
}

/// Everything a strategy may read besides the registry.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub key: SelectionKey<'a>,
    /// Round-robin cursor owned by the core context.
    pub cursor: &'a AtomicUsize,
}

/// A backend selection policy.
///
/// `init` runs once before the strategy is installed and may allocate
/// strategy-local state; `teardown` runs once when it is replaced or the
/// context is destroyed.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn init(&mut self, _registry: &Registry) -> EngineResult<()> {
        Ok(())
    }

    /// Pick one backend, or `None` if none is eligible.
    fn select<'r>(
        &self,
        registry: &'r Registry,
        ctx: &SelectionContext<'_>,
    ) -> Option<&'r Arc<Backend>>;

    fn teardown(&self) {}
}

/// Built-in algorithms, resolvable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RoundRobin,
    LeastConnections,
    Weighted,
    SourceHash,
    UriHash,
    Random,
}

impl Algorithm {
    /// Resolve a name, falling back to least-connections for unknown names.
    pub fn resolve(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(algorithm = %name, "Unknown algorithm, using least-connections");
            Algorithm::LeastConnections
        })
    }

    /// Instantiate the strategy (not yet initialized).
    pub fn build(self) -> Box<dyn Strategy> {
        match self {
            Algorithm::RoundRobin => Box::new(RoundRobin::new()),
            Algorithm::LeastConnections => Box::new(LeastConnections::new()),
            Algorithm::Weighted => Box::new(Weighted::new()),
            Algorithm::SourceHash => Box::new(HashStrategy::new(HashSource::ClientAddr)),
            Algorithm::UriHash => Box::new(HashStrategy::new(HashSource::Path)),
            Algorithm::Random => Box::new(RandomStrategy::new()),
        }
    }
}

impl FromStr for Algorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roundrobin" | "round_robin" | "round-robin" | "rr" => Ok(Algorithm::RoundRobin),
            "leastconn" | "least_connections" | "least-connections" | "lc" => {
                Ok(Algorithm::LeastConnections)
            }
            "weighted" | "wrr" => Ok(Algorithm::Weighted),
            "iphash" | "ip_hash" | "source" => Ok(Algorithm::SourceHash),
            "urihash" | "uri_hash" | "uri" => Ok(Algorithm::UriHash),
            "random" => Ok(Algorithm::Random),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown algorithm {other:?}"
            ))),
        }
    }
}

/// The `n`-th backend in state `Up`, in registry order.
pub(crate) fn nth_up(registry: &Registry, n: usize) -> Option<&Arc<Backend>> {
    registry.iter().filter(|b| b.is_up()).nth(n)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names_resolve() {
        assert_eq!(Algorithm::resolve("roundrobin"), Algorithm::RoundRobin);
        assert_eq!(Algorithm::resolve("RR"), Algorithm::RoundRobin);
        assert_eq!(Algorithm::resolve("leastconn"), Algorithm::LeastConnections);
        assert_eq!(Algorithm::resolve("wrr"), Algorithm::Weighted);
        assert_eq!(Algorithm::resolve("ip_hash"), Algorithm::SourceHash);
        assert_eq!(Algorithm::resolve("uri"), Algorithm::UriHash);
        assert_eq!(Algorithm::resolve("random"), Algorithm::Random);
        assert_eq!(Algorithm::resolve("bogus"), Algorithm::LeastConnections);
        assert!("bogus".parse::<Algorithm>().is_err());
    }

    #[test]
    fn built_strategies_carry_names() {
        assert_eq!(Algorithm::RoundRobin.build().name(), "roundrobin");
        assert_eq!(Algorithm::LeastConnections.build().name(), "leastconn");
        assert_eq!(Algorithm::SourceHash.build().name(), "iphash");
        assert_eq!(Algorithm::UriHash.build().name(), "urihash");
    }
}
