//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → Log output (stdout, pretty or JSON)
//!     → Whatever recorder the embedding process installs
//! ```
//!
//! # Design Decisions
//! - Metric updates are no-ops until a recorder is installed
//! - Per-backend series are labelled by `host:port`
//! - Log level comes from configuration, overridable with `RUST_LOG`

pub mod logging;
pub mod metrics;
