//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the dispatch engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Listening socket.
    pub listener: ListenerConfig,

    /// Selection algorithm name (e.g. "roundrobin", "leastconn").
    pub algorithm: String,

    /// Initial backend list, admitted in order.
    pub backends: Vec<BackendConfig>,

    /// Connection timeouts.
    pub timeouts: TimeoutConfig,

    /// Per-socket options.
    pub socket: SocketConfig,

    /// Backend registry sizing.
    pub registry: RegistryConfig,

    /// Pre-reserved buffer arena.
    pub arena: ArenaConfig,

    /// Worker pool sizing.
    pub workers: WorkerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            algorithm: "leastconn".to_string(),
            backends: Vec::new(),
            timeouts: TimeoutConfig::default(),
            socket: SocketConfig::default(),
            registry: RegistryConfig::default(),
            arena: ArenaConfig::default(),
            workers: WorkerConfig::default(),
            health_check: HealthCheckConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with the given port and algorithm.
    pub fn new(port: u16, algorithm: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.listener.port = port;
        config.algorithm = algorithm.into();
        config
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address without port (e.g., "0.0.0.0").
    pub bind_address: String,

    /// Listening port.
    pub port: u16,

    /// Listen backlog.
    pub backlog: u32,

    /// Maximum concurrent client connections.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            backlog: 1024,
            max_connections: 65_535,
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Host name or IP literal.
    pub host: String,

    /// Backend port.
    pub port: u16,

    /// Relative weight (0 is treated as 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl std::str::FromStr for BackendConfig {
    type Err = String;

    /// Parse `host:port[:weight]`; IPv6 hosts go in brackets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, rest) = if let Some(stripped) = s.strip_prefix('[') {
            let end = stripped
                .find(']')
                .ok_or_else(|| format!("unterminated '[' in {s:?}"))?;
            let rest = stripped[end + 1..]
                .strip_prefix(':')
                .ok_or_else(|| format!("missing port in {s:?}"))?;
            (&stripped[..end], rest)
        } else {
            s.split_once(':')
                .ok_or_else(|| format!("missing port in {s:?}"))?
        };

        let (port, weight) = match rest.split_once(':') {
            Some((port, weight)) => (port, Some(weight)),
            None => (rest, None),
        };
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("bad port in {s:?}: {e}"))?;
        let weight = match weight {
            Some(w) => w.parse::<u32>().map_err(|e| format!("bad weight in {s:?}: {e}"))?,
            None => default_weight(),
        };
        Ok(Self {
            host: host.to_string(),
            port,
            weight,
        })
    }
}

/// Timeout configuration, in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment.
    pub connect_ms: u64,

    /// Maximum wait for the next read on either side of a relay.
    pub read_ms: u64,

    /// Maximum time for a single write.
    pub write_ms: u64,

    /// TCP keepalive idle time.
    pub keepalive_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            read_ms: 30_000,
            write_ms: 30_000,
            keepalive_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }
}

/// Socket options applied to the listener and accepted connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    pub tcp_nodelay: bool,
    pub so_reuseport: bool,
    pub keepalive: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            so_reuseport: true,
            keepalive: true,
        }
    }
}

/// Backend registry sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of backends.
    pub capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: crate::load_balancer::registry::DEFAULT_CAPACITY,
        }
    }
}

/// Buffer arena configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Reserve the arena at startup.
    pub enabled: bool,

    /// Total reserved bytes.
    pub size_bytes: usize,

    /// Size of one relay buffer.
    pub slot_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_bytes: 64 * 1024 * 1024,
            slot_size: 16 * 1024,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of workers; 0 uses the detected parallelism.
    pub threads: usize,

    /// Bounded dispatch queue length.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            queue_capacity: 1024,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Number of consecutive failures before marking down.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking up.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            timeout_ms: 1_000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Event loop bookkeeping tick in milliseconds.
    pub tick_ms: u64,

    /// Interval between logged performance summaries, in seconds.
    pub stats_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            tick_ms: 1_000,
            stats_interval_secs: 60,
        }
    }
}
