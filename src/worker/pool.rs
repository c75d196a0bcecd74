//! Fixed-size worker pool over a bounded queue.
//!
//! # Responsibilities
//! - Spawn N worker tasks draining one shared queue
//! - Isolate per-item failures and panics
//! - Drain and join on shutdown

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::engine::error::{EngineError, EngineResult};
use crate::observability::metrics;

/// Work performed for each queued item.
pub type Job<T> = Arc<dyn Fn(T) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

/// Why an item was not queued. The item is handed back.
#[derive(Debug)]
pub enum SubmitError<T> {
    /// Queue at capacity.
    Full(T),
    /// Pool is shutting down.
    Closed(T),
}

impl<T> SubmitError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SubmitError::Full(item) | SubmitError::Closed(item) => item,
        }
    }
}

/// Counters shared by all workers.
#[derive(Debug, Default)]
pub struct PoolStats {
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

impl PoolStats {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }
}

/// A bounded set of tasks draining a shared queue.
pub struct WorkerPool<T: Send + 'static> {
    sender: Option<mpsc::Sender<T>>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
    stats: Arc<PoolStats>,
}

impl<T: Send + 'static> std::fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("running", &self.sender.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start `size` workers sharing a queue of `queue_capacity` items.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(size: usize, queue_capacity: usize, job: Job<T>) -> EngineResult<Self> {
        if size == 0 {
            return Err(EngineError::InvalidArgument("worker pool size must be > 0".into()));
        }
        if queue_capacity == 0 {
            return Err(EngineError::InvalidArgument("worker queue capacity must be > 0".into()));
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            EngineError::system(
                "worker pool requires a tokio runtime",
                std::io::Error::new(std::io::ErrorKind::Other, e),
            )
        })?;

        let (sender, receiver) = mpsc::channel(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(PoolStats::default());

        let workers = (0..size)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let job = Arc::clone(&job);
                let stats = Arc::clone(&stats);
                handle.spawn(worker_loop(id, receiver, job, stats))
            })
            .collect();

        tracing::info!(workers = size, queue_capacity, "Worker pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
            size,
            stats,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> &Arc<PoolStats> {
        &self.stats
    }

    /// A cloneable handle for enqueueing. `None` once shutdown began.
    pub fn submitter(&self) -> Option<mpsc::Sender<T>> {
        self.sender.clone()
    }

    /// Enqueue without waiting.
    pub fn submit(&self, item: T) -> Result<(), SubmitError<T>> {
        match &self.sender {
            Some(sender) => sender.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(item) => SubmitError::Full(item),
                mpsc::error::TrySendError::Closed(item) => SubmitError::Closed(item),
            }),
            None => Err(SubmitError::Closed(item)),
        }
    }

    /// Stop accepting work, let workers drain the queue, and join them.
    ///
    /// Items already queued still run. Idempotent. Outstanding submitters
    /// keep the queue open until they are dropped.
    pub async fn shutdown(&mut self) {
        if self.sender.take().is_none() && self.workers.is_empty() {
            return;
        }
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
        tracing::info!(
            completed = self.stats.completed(),
            failed = self.stats.failed(),
            panicked = self.stats.panicked(),
            "Worker pool stopped"
        );
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop<T: Send + 'static>(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    job: Job<T>,
    stats: Arc<PoolStats>,
) {
    tracing::debug!(worker = id, "Worker started");
    loop {
        // The lock is held only while waiting for the next item.
        let item = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(item) = item else { break };

        match AssertUnwindSafe(job(item)).catch_unwind().await {
            Ok(Ok(())) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(EngineError::EmptyResult)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker = id, "No backend available for work item");
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_worker_failure("error");
                tracing::warn!(worker = id, error = %e, "Work item failed");
            }
            Err(payload) => {
                stats.panicked.fetch_add(1, Ordering::Relaxed);
                metrics::record_worker_failure("panic");
                tracing::error!(worker = id, panic = %panic_message(&*payload), "Work item panicked");
            }
        }
    }
    tracing::debug!(worker = id, "Worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_job(seen: Arc<AtomicUsize>) -> Job<usize> {
        Arc::new(move |n: usize| {
            let seen = Arc::clone(&seen);
            async move {
                if n == 13 {
                    panic!("unlucky item");
                }
                if n % 2 == 1 {
                    return Err(EngineError::EmptyResult);
                }
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drains_queue_and_isolates_failures() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::start(3, 64, counting_job(Arc::clone(&seen))).unwrap();
        for n in 0..20 {
            pool.submit(n).unwrap();
        }
        pool.shutdown().await;

        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(pool.stats().completed(), 10);
        assert_eq!(pool.stats().failed(), 9);
        assert_eq!(pool.stats().panicked(), 1);
    }

    #[tokio::test]
    async fn full_queue_hands_item_back() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let job: Job<u32> = {
            let gate = Arc::clone(&gate);
            Arc::new(move |_: u32| {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok::<(), EngineError>(())
                }
                .boxed()
            })
        };
        let pool = WorkerPool::start(1, 1, job).unwrap();
        // One item may be in flight, one queued; the rest must be refused.
        let mut refused = None;
        for n in 0..8 {
            if let Err(e) = pool.submit(n) {
                refused = Some(e);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(matches!(refused, Some(SubmitError::Full(_))));
        gate.notify_waiters();
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_closed() {
        let mut pool = WorkerPool::start(1, 4, counting_job(Arc::new(AtomicUsize::new(0)))).unwrap();
        pool.shutdown().await;
        pool.shutdown().await;
        assert!(matches!(pool.submit(2), Err(SubmitError::Closed(2))));
        assert!(pool.submitter().is_none());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let job = counting_job(Arc::new(AtomicUsize::new(0)));
        assert!(WorkerPool::start(0, 4, Arc::clone(&job)).is_err());
        assert!(WorkerPool::start(2, 0, job).is_err());
    }

    #[test]
    fn start_outside_runtime_is_system_failure() {
        let job = counting_job(Arc::new(AtomicUsize::new(0)));
        let err = WorkerPool::start(1, 1, job).unwrap_err();
        assert_eq!(err.kind(), crate::engine::error::ErrorKind::SystemResourceFailure);
    }
}
