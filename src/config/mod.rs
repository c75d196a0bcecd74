//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → threaded into CoreContext::create
//! ```
//!
//! # Design Decisions
//! - Config is a plain value; nothing reads it from process-wide globals
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{
    ArenaConfig, BackendConfig, EngineConfig, HealthCheckConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, RegistryConfig, SocketConfig, TimeoutConfig, WorkerConfig,
};
