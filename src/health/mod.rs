//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → TCP connect to every non-draining backend, concurrently
//!     → CoreContext::record_probe (hysteresis)
//!     → Backend state Down ←→ Up
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Draining is operator-owned; probes never move a backend out of it
//! - The engine itself never probes; it only consumes the feed

pub mod active;

pub use active::HealthMonitor;
