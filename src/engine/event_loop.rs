//! Event core: accept, tick, stop.
//!
//! # Responsibilities
//! - Accept connections and apply per-socket options
//! - Enforce the connection limit and queue without blocking
//! - Drive periodic bookkeeping (metrics snapshot, summary log)
//!
//! # Design Decisions
//! - The loop only ever waits inside `select!`
//! - Interrupted and aborted accepts are retried; other accept errors end the loop

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::context::Shared;
use crate::engine::error::{EngineError, EngineResult};
use crate::lifecycle::ShutdownSignal;
use crate::net::{configure_accepted, WorkItem};
use crate::observability::metrics;

/// Where accepted connections go.
pub(crate) enum Dispatch {
    /// Bounded worker queue.
    Queue(mpsc::Sender<WorkItem>),
    /// No pool: one task per connection.
    Inline(Handle),
}

pub(crate) struct EventLoop {
    pub(crate) listener: TcpListener,
    pub(crate) shared: Arc<Shared>,
    pub(crate) dispatch: Dispatch,
    pub(crate) shutdown: ShutdownSignal,
}

impl EventLoop {
    pub(crate) async fn run(mut self) -> EngineResult<()> {
        let observability = &self.shared.config.observability;
        let limiter = Arc::new(Semaphore::new(self.shared.config.listener.max_connections));
        let mut tick = interval(Duration::from_millis(observability.tick_ms.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let summary_every = Duration::from_secs(observability.stats_interval_secs);
        let mut last_summary = Instant::now();

        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(address = %addr, "Event loop running");
        }

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    tracing::info!("Event loop stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.on_accept(stream, peer, &limiter),
                    Err(e) if is_transient(&e) => {
                        tracing::debug!(error = %e, "Transient accept error, retrying");
                    }
                    Err(e) => {
                        return Err(EngineError::system("accept", e));
                    }
                },
                _ = tick.tick() => {
                    metrics::emit_snapshot(&self.shared.registry);
                    if !summary_every.is_zero() && last_summary.elapsed() >= summary_every {
                        self.log_summary(&limiter);
                        last_summary = Instant::now();
                    }
                }
            }
        }
    }

    fn on_accept(&self, stream: TcpStream, peer: SocketAddr, limiter: &Arc<Semaphore>) {
        let Ok(permit) = Arc::clone(limiter).try_acquire_owned() else {
            self.reject(peer, "max_connections");
            return;
        };

        let config = &self.shared.config;
        if let Err(e) = configure_accepted(&stream, &config.socket, &config.timeouts) {
            tracing::debug!(client = %peer, error = %e, "Failed to apply socket options");
        }

        let item = WorkItem::new(stream, peer, Some(permit));
        tracing::trace!(connection_id = %item.id, client = %peer, "Connection accepted");

        match &self.dispatch {
            Dispatch::Queue(sender) => match sender.try_send(item) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => self.reject(peer, "queue_full"),
                Err(mpsc::error::TrySendError::Closed(_)) => self.reject(peer, "shutting_down"),
            },
            Dispatch::Inline(runtime) => {
                let shared = Arc::clone(&self.shared);
                runtime.spawn(async move {
                    match shared.dispatch(item).await {
                        Ok(()) | Err(EngineError::EmptyResult) => {}
                        Err(e) => tracing::warn!(error = %e, "Work item failed"),
                    }
                });
            }
        }
    }

    fn reject(&self, peer: SocketAddr, reason: &'static str) {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_rejected(reason);
        tracing::debug!(client = %peer, reason, "Connection rejected");
    }

    fn log_summary(&self, limiter: &Semaphore) {
        let stats = self.shared.stats();
        let registry = &self.shared.registry;
        let in_flight: usize = registry.iter().map(|b| b.active_connections()).sum();
        tracing::info!(
            dispatched = stats.dispatched,
            rejected = stats.rejected,
            selection_failures = stats.selection_failures,
            backend_connections = in_flight,
            client_connections = self.shared.config.listener.max_connections - limiter.available_permits(),
            backends_up = registry.up_count(),
            backends = registry.snapshot_count(),
            "Engine summary"
        );
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient(&io::Error::from_raw_os_error(24)));
    }
}
