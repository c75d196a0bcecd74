//! Connection identity and dispatched work items.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Package an accepted connection with its slot permit

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One accepted connection awaiting a backend decision.
///
/// Owned by exactly one worker until it completes; dropping it closes the
/// client socket and frees the connection slot.
#[derive(Debug)]
pub struct WorkItem {
    pub id: ConnectionId,
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub accepted_at: Instant,
    _permit: Option<OwnedSemaphorePermit>,
}

impl WorkItem {
    pub fn new(stream: TcpStream, peer: SocketAddr, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            id: ConnectionId::new(),
            stream,
            peer,
            accepted_at: Instant::now(),
            _permit: permit,
        }
    }
}
