//! Dispatch engine.
//!
//! # Data Flow
//! ```text
//! CoreContext::create(EngineConfig)
//!     → registry (fixed capacity) + arena (optional) + strategy + worker pool
//!
//! CoreContext::run
//!     → event_loop.rs: accept → socket options → WorkItem → worker queue
//!     → workers: select_backend → lease → ConnectionHandler::connect
//!     → sessions.rs: relay task per connection
//!
//! CoreContext::destroy
//!     → stop workers → wait for sessions → strategy teardown → release arena
//! ```
//!
//! # Design Decisions
//! - One context owns every resource; nothing is process-global
//! - "No backend" is an ordinary outcome, logged at debug
//! - Errors carry their OS cause where one exists

pub mod arena;
pub mod context;
pub mod error;
mod event_loop;
mod sessions;

pub use context::{CoreContext, EngineStats, LifecycleState};
pub use error::{EngineError, EngineResult, ErrorKind};
