//! Connection-level load balancer.
//!
//! Accepts TCP connections, picks a backend with a pluggable strategy and
//! relays bytes between the two.

pub mod config;
pub mod engine;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{CoreContext, EngineError, EngineResult, LifecycleState};
pub use lifecycle::Shutdown;
pub use load_balancer::{Algorithm, BackendState, SelectionKey, Strategy};
