//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind with reuse options, accept, per-socket options)
//!     → connection.rs (connection id + slot permit packaged as a WorkItem)
//!     → Hand off to the worker pool
//! ```
//!
//! # Design Decisions
//! - Connection limit enforced without waiting: no slot, no connection
//! - Non-blocking and close-on-exec come from the runtime's socket setup

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, WorkItem};
pub use listener::{bind, configure_accepted, ListenerError};
