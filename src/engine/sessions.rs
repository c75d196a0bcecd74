//! Relay sessions running off the worker pool.
//!
//! A worker selects a backend and opens the backend socket, then parks the
//! relay here and goes back to the queue. `destroy` waits for whatever is
//! still running.

use parking_lot::Mutex;
use tokio::task::{JoinError, JoinSet};

use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::worker::Session;

#[derive(Debug, Default)]
pub(crate) struct SessionSet {
    tasks: Mutex<JoinSet<()>>,
}

impl SessionSet {
    /// Run `session` as its own task. Must be called inside a runtime.
    pub(crate) fn spawn(&self, id: ConnectionId, backend: String, session: Session) {
        let mut tasks = self.tasks.lock();
        while let Some(done) = tasks.try_join_next() {
            log_join(done);
        }
        tasks.spawn(async move {
            if let Err(e) = session.await {
                metrics::record_worker_failure("relay");
                tracing::debug!(connection_id = %id, backend = %backend, error = %e, "Relay ended with error");
            }
        });
    }

    /// Sessions spawned and not yet reaped.
    pub(crate) fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Wait until every session has finished.
    pub(crate) async fn wait(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            tracing::debug!(sessions = tasks.len(), "Waiting for relay sessions");
            while let Some(done) = tasks.join_next().await {
                log_join(done);
            }
        }
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            metrics::record_worker_failure("panic");
            tracing::error!(error = %e, "Relay session panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_joins_every_session() {
        let set = SessionSet::default();
        let finished = Arc::new(AtomicUsize::new(0));
        for delay in [10u64, 30, 50] {
            let finished = Arc::clone(&finished);
            let session = async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<(), std::io::Error>(())
            }
            .boxed();
            set.spawn(ConnectionId::new(), "127.0.0.1:1".into(), session);
        }
        assert_eq!(set.tracked(), 3);
        set.wait().await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(set.tracked(), 0);
    }

    #[tokio::test]
    async fn failed_and_panicked_sessions_are_absorbed() {
        let set = SessionSet::default();
        set.spawn(
            ConnectionId::new(),
            "127.0.0.1:1".into(),
            async { Err::<(), _>(std::io::Error::from(std::io::ErrorKind::ConnectionReset)) }.boxed(),
        );
        set.spawn(
            ConnectionId::new(),
            "127.0.0.1:1".into(),
            async {
                if true {
                    panic!("relay blew up");
                }
                Ok::<(), std::io::Error>(())
            }
            .boxed(),
        );
        set.wait().await;
        assert_eq!(set.tracked(), 0);
    }
}
