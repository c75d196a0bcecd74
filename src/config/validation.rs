//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports non-zero, sizes consistent)
//! - Check that the initial backend list fits the registry
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: EngineConfig → Result<(), Vec<ValidationError>>

use thiserror::Error;

use crate::config::schema::EngineConfig;
use crate::load_balancer::Algorithm;

/// Largest registry capacity accepted from configuration.
pub const MAX_REGISTRY_CAPACITY: usize = 4096;

/// A single semantic violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.port must be non-zero")]
    ListenerPort,
    #[error("unknown algorithm {0:?}")]
    UnknownAlgorithm(String),
    #[error("backends[{index}]: {reason}")]
    Backend { index: usize, reason: String },
    #[error("registry.capacity must be in 1..={MAX_REGISTRY_CAPACITY}, got {0}")]
    RegistryCapacity(usize),
    #[error("{count} backends configured but registry.capacity is {capacity}")]
    TooManyBackends { count: usize, capacity: usize },
    #[error("arena.slot_size {slot} must be in 1..=arena.size_bytes ({size})")]
    ArenaGeometry { slot: usize, size: usize },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError::ListenerPort);
    }
    if config.algorithm.parse::<Algorithm>().is_err() {
        errors.push(ValidationError::UnknownAlgorithm(config.algorithm.clone()));
    }

    let capacity = config.registry.capacity;
    if capacity == 0 || capacity > MAX_REGISTRY_CAPACITY {
        errors.push(ValidationError::RegistryCapacity(capacity));
    } else if config.backends.len() > capacity {
        errors.push(ValidationError::TooManyBackends {
            count: config.backends.len(),
            capacity,
        });
    }

    for (index, backend) in config.backends.iter().enumerate() {
        if backend.host.trim().is_empty() {
            errors.push(ValidationError::Backend {
                index,
                reason: "host is empty".into(),
            });
        }
        if backend.port == 0 {
            errors.push(ValidationError::Backend {
                index,
                reason: "port is zero".into(),
            });
        }
    }

    if config.arena.enabled
        && (config.arena.slot_size == 0 || config.arena.slot_size > config.arena.size_bytes)
    {
        errors.push(ValidationError::ArenaGeometry {
            slot: config.arena.slot_size,
            size: config.arena.size_bytes,
        });
    }

    let non_zero = [
        ("workers.queue_capacity", config.workers.queue_capacity as u64),
        ("listener.max_connections", config.listener.max_connections as u64),
        ("observability.tick_ms", config.observability.tick_ms),
        ("timeouts.connect_ms", config.timeouts.connect_ms),
        ("timeouts.read_ms", config.timeouts.read_ms),
        ("timeouts.write_ms", config.timeouts.write_ms),
    ];
    for (name, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }
    if config.health_check.enabled && config.health_check.interval_ms == 0 {
        errors.push(ValidationError::Zero("health_check.interval_ms"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
