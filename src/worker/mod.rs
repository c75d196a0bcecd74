//! Worker pool subsystem.
//!
//! # Data Flow
//! ```text
//! Event loop
//!     → pool.rs (bounded queue, try_send; full queue = rejected connection)
//!     → N worker tasks pulling from the shared queue
//!     → CoreContext selects a backend and takes a lease
//!     → handler.rs connect (backend socket opened on the worker)
//!     → Session task (relay runs off the pool, worker takes the next item)
//! ```
//!
//! # Design Decisions
//! - Pool size fixed at creation; no dynamic resizing
//! - A failing or panicking item never takes its worker down
//! - Workers never hold a connection past hookup
//! - Shutdown closes the queue, lets workers drain it, then joins them

pub mod handler;
pub mod pool;

pub use handler::{ConnectionHandler, HandlerContext, RelayBuf, Session, TcpRelay};
pub use pool::{PoolStats, SubmitError, WorkerPool};
