//! Connection hookup.
//!
//! # Responsibilities
//! - Define the seam between backend selection and protocol work
//! - Provide the default handler: a bidirectional TCP relay
//!
//! # Design Decisions
//! - Hookup is split in two: `connect` runs on a worker and opens the
//!   backend side, the returned [`Session`] runs as its own task
//! - The session owns the client socket and the backend lease; dropping
//!   either closes the connection or releases the backend count
//! - Relay buffers come from the arena when one is available, the heap
//!   otherwise
//! - Each direction half-closes independently; read and write timeouts
//!   bound every individual operation
//! - Shutdown does not cut a relay short; it ends on EOF or a timeout

use bytes::BytesMut;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::TimeoutConfig;
use crate::engine::arena::{Arena, ArenaBuf};
use crate::load_balancer::BackendLease;
use crate::net::WorkItem;

/// Heap buffer size when no arena is attached.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Per-connection resources handed to a [`ConnectionHandler`].
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub arena: Option<Arc<Arena>>,
    pub timeouts: TimeoutConfig,
    pub tcp_nodelay: bool,
}

impl HandlerContext {
    /// A relay buffer: an arena slot if one is free, else a heap buffer.
    pub fn buffer(&self) -> RelayBuf {
        match &self.arena {
            Some(arena) => match arena.lease() {
                Some(slot) => RelayBuf::Arena(slot),
                None => {
                    tracing::trace!("Arena exhausted, using heap buffer");
                    RelayBuf::Heap(BytesMut::with_capacity(arena.slot_size()))
                }
            },
            None => RelayBuf::Heap(BytesMut::with_capacity(DEFAULT_BUFFER_SIZE)),
        }
    }
}

/// A byte buffer used for relaying.
#[derive(Debug)]
pub enum RelayBuf {
    Arena(ArenaBuf),
    Heap(BytesMut),
}

impl RelayBuf {
    pub fn is_pooled(&self) -> bool {
        matches!(self, RelayBuf::Arena(_))
    }
}

impl Deref for RelayBuf {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        match self {
            RelayBuf::Arena(buf) => buf,
            RelayBuf::Heap(buf) => buf,
        }
    }
}

impl DerefMut for RelayBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        match self {
            RelayBuf::Arena(buf) => buf,
            RelayBuf::Heap(buf) => buf,
        }
    }
}

/// The long-lived part of a connection, run outside the worker pool.
pub type Session = BoxFuture<'static, io::Result<()>>;

/// Performs the protocol work for one dispatched connection.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Open the backend side and return the session that carries the
    /// connection to completion.
    fn connect(
        &self,
        item: WorkItem,
        lease: BackendLease,
        ctx: HandlerContext,
    ) -> BoxFuture<'static, io::Result<Session>>;
}

/// Byte-for-byte relay between client and backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpRelay;

impl ConnectionHandler for TcpRelay {
    fn connect(
        &self,
        item: WorkItem,
        lease: BackendLease,
        ctx: HandlerContext,
    ) -> BoxFuture<'static, io::Result<Session>> {
        async move {
            let upstream = connect_upstream(&lease, &ctx).await?;
            Ok::<Session, io::Error>(relay(item, upstream, lease, ctx).boxed())
        }
        .boxed()
    }
}

async fn connect_upstream(lease: &BackendLease, ctx: &HandlerContext) -> io::Result<TcpStream> {
    let authority = lease.authority();
    let upstream = timeout(ctx.timeouts.connect(), TcpStream::connect(authority.as_str()))
        .await
        .map_err(|_| timed_out("connect", ctx.timeouts.connect()))??;
    if ctx.tcp_nodelay {
        upstream.set_nodelay(true)?;
    }
    Ok(upstream)
}

async fn relay(
    item: WorkItem,
    upstream: TcpStream,
    lease: BackendLease,
    ctx: HandlerContext,
) -> io::Result<()> {
    let authority = lease.authority();
    tracing::debug!(
        connection_id = %item.id,
        client = %item.peer,
        backend = %authority,
        "Relaying connection"
    );

    let WorkItem { stream: client, .. } = item;
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let to_backend = pump(client_read, upstream_write, ctx.buffer(), &ctx.timeouts);
    let to_client = pump(upstream_read, client_write, ctx.buffer(), &ctx.timeouts);

    let (sent, received) = tokio::try_join!(to_backend, to_client)?;
    tracing::debug!(backend = %authority, sent, received, "Relay finished");
    Ok(())
}

/// Copy `src` into `dst` until EOF, then half-close `dst`.
async fn pump<R, W>(mut src: R, mut dst: W, mut buf: RelayBuf, timeouts: &TimeoutConfig) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    loop {
        buf.clear();
        let n = timeout(timeouts.read(), src.read_buf(&mut *buf))
            .await
            .map_err(|_| timed_out("read", timeouts.read()))??;
        if n == 0 {
            let _ = dst.shutdown().await;
            return Ok(total);
        }
        timeout(timeouts.write(), dst.write_all(&buf[..n]))
            .await
            .map_err(|_| timed_out("write", timeouts.write()))??;
        total += n as u64;
    }
}

fn timed_out(op: &str, after: Duration) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{op} timed out after {after:?}"))
}
