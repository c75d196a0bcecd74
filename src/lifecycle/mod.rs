//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful stop requested
//!     SIGHUP → logged, configuration stays as loaded
//!
//! Shutdown (shutdown.rs):
//!     trigger() → event loop stops accepting
//!              → CoreContext::destroy drains and joins the worker pool
//! ```
//!
//! # Design Decisions
//! - Shutdown is cooperative: a flag observed by every long-running task
//! - The flag is level-triggered, so late subscribers still see it

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
