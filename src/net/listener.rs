//! TCP listener construction and accepted-socket configuration.
//!
//! # Responsibilities
//! - Bind to the configured address with SO_REUSEADDR / SO_REUSEPORT
//! - Apply TCP_NODELAY and keepalive to accepted connections

use socket2::{SockRef, TcpKeepalive};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::config::{ListenerConfig, SocketConfig, TimeoutConfig};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// Failed to set a socket option.
    #[error("Failed to set {option}: {source}")]
    Options {
        option: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ListenerError {
    pub fn io(&self) -> &std::io::Error {
        match self {
            ListenerError::Bind { source, .. } | ListenerError::Options { source, .. } => source,
        }
    }
}

/// Bind a listening socket. Must run inside a Tokio runtime.
pub fn bind(listener: &ListenerConfig, socket: &SocketConfig) -> Result<TcpListener, ListenerError> {
    let display = format!("{}:{}", listener.bind_address, listener.port);
    let ip: IpAddr = listener.bind_address.parse().map_err(|e| ListenerError::Bind {
        addr: display.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
    })?;
    let addr = SocketAddr::new(ip, listener.port);

    let bind_err = |source| ListenerError::Bind {
        addr: display.clone(),
        source,
    };
    let sock = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;

    sock.set_reuseaddr(true).map_err(|source| ListenerError::Options {
        option: "SO_REUSEADDR",
        source,
    })?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    if socket.so_reuseport {
        sock.set_reuseport(true).map_err(|source| ListenerError::Options {
            option: "SO_REUSEPORT",
            source,
        })?;
    }
    #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
    let _ = socket;

    sock.bind(addr).map_err(bind_err)?;
    let inner = sock.listen(listener.backlog).map_err(bind_err)?;

    tracing::info!(
        address = %inner.local_addr().map_err(bind_err)?,
        backlog = listener.backlog,
        max_connections = listener.max_connections,
        "Listener bound"
    );
    Ok(inner)
}

/// Apply per-connection options to an accepted stream.
pub fn configure_accepted(
    stream: &TcpStream,
    socket: &SocketConfig,
    timeouts: &TimeoutConfig,
) -> Result<(), ListenerError> {
    if socket.tcp_nodelay {
        stream.set_nodelay(true).map_err(|source| ListenerError::Options {
            option: "TCP_NODELAY",
            source,
        })?;
    }
    if socket.keepalive {
        let keepalive = TcpKeepalive::new().with_time(timeouts.keepalive());
        SockRef::from(stream)
            .set_tcp_keepalive(&keepalive)
            .map_err(|source| ListenerError::Options {
                option: "SO_KEEPALIVE",
                source,
            })?;
    }
    Ok(())
}
