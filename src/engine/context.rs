//! Core context: owns every engine resource and its lifecycle.
//!
//! # Responsibilities
//! - Acquire resources in order (runtime, registry, arena, strategy, workers)
//! - Release them in reverse on `destroy`, exactly once
//! - Front the registry and the active strategy for callers
//!
//! # Lifecycle
//! ```text
//! Created → Running → Stopping → Destroyed
//! ```
//!
//! # Design Decisions
//! - Arena and worker pool failures degrade, strategy failure aborts creation
//! - The strategy sits behind an `ArcSwap`; selection never takes a lock
//! - Partial construction is released by ordinary drops

use arc_swap::{ArcSwap, ArcSwapOption};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Handle;

use crate::config::EngineConfig;
use crate::engine::arena::Arena;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::event_loop::{Dispatch, EventLoop};
use crate::engine::sessions::SessionSet;
use crate::lifecycle::Shutdown;
use crate::load_balancer::backend::Backend;
use crate::load_balancer::registry::Registry;
use crate::load_balancer::{
    Algorithm, BackendSnapshot, BackendState, SelectionContext, SelectionKey, Strategy,
};
use crate::net::{self, WorkItem};
use crate::observability::metrics;
use crate::worker::{ConnectionHandler, HandlerContext, TcpRelay, WorkerPool};

/// Position in the context lifecycle. Transitions only move forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Destroyed = 3,
}

impl From<u8> for LifecycleState {
    fn from(val: u8) -> Self {
        match val {
            0 => LifecycleState::Created,
            1 => LifecycleState::Running,
            2 => LifecycleState::Stopping,
            _ => LifecycleState::Destroyed,
        }
    }
}

/// Engine-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub dispatched: u64,
    pub rejected: u64,
    pub selection_failures: u64,
}

/// State reachable from workers and the event loop.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) registry: Registry,
    strategy: ArcSwap<Box<dyn Strategy>>,
    cursor: AtomicUsize,
    arena: ArcSwapOption<Arena>,
    state: AtomicU8,
    handler: Arc<dyn ConnectionHandler>,
    sessions: SessionSet,
    pub(crate) shutdown: Shutdown,
    dispatched: AtomicU64,
    pub(crate) rejected: AtomicU64,
    selection_failures: AtomicU64,
}

impl Shared {
    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LifecycleState) {
        // Forward-only; a later state is never overwritten by an earlier one.
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    fn select(&self, key: SelectionKey<'_>) -> Option<Arc<Backend>> {
        if self.state() == LifecycleState::Destroyed {
            return None;
        }
        let strategy = self.strategy.load();
        let ctx = SelectionContext {
            key,
            cursor: &self.cursor,
        };
        let picked = strategy.select(&self.registry, &ctx).cloned();
        if picked.is_none() {
            self.selection_failures.fetch_add(1, Ordering::Relaxed);
            metrics::record_selection_failure();
            tracing::debug!(strategy = strategy.name(), "No backend available");
        }
        picked
    }

    pub(crate) fn stats(&self) -> EngineStats {
        EngineStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            selection_failures: self.selection_failures.load(Ordering::Relaxed),
        }
    }

    /// Select a backend for one accepted connection, open the backend side
    /// and start the relay session.
    ///
    /// Returns once the session is running; the relay itself never holds
    /// the caller.
    pub(crate) async fn dispatch(self: Arc<Self>, item: WorkItem) -> EngineResult<()> {
        let id = item.id;
        let waited = item.accepted_at.elapsed();
        metrics::record_queue_wait(waited);
        if self.shutdown.is_triggered() {
            tracing::debug!(connection_id = %id, "Dropping queued connection during shutdown");
            return Ok(());
        }

        let key = SelectionKey::client(item.peer.ip());
        let backend = self.select(key).ok_or(EngineError::EmptyResult)?;
        let lease = backend.lease();
        let authority = backend.authority();
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::record_dispatch(&authority);

        let ctx = HandlerContext {
            arena: self.arena.load_full(),
            timeouts: self.config.timeouts.clone(),
            tcp_nodelay: self.config.socket.tcp_nodelay,
        };
        let session = self
            .handler
            .connect(item, lease, ctx)
            .await
            .map_err(|e| EngineError::system(format!("connect to {authority}"), e))?;
        tracing::trace!(
            connection_id = %id,
            backend = %authority,
            queued_us = waited.as_micros() as u64,
            "Session started"
        );
        self.sessions.spawn(id, authority, session);
        Ok(())
    }
}

/// The dispatch engine.
pub struct CoreContext {
    shared: Arc<Shared>,
    pool: Mutex<Option<WorkerPool<WorkItem>>>,
    workers: usize,
    runtime: Handle,
    destroyed: AtomicBool,
}

impl CoreContext {
    /// Create a context using the configured algorithm and the TCP relay handler.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create(config: EngineConfig) -> EngineResult<Self> {
        let strategy = Algorithm::resolve(&config.algorithm).build();
        Self::create_with(config, strategy, Arc::new(TcpRelay))
    }

    /// Create a context with an explicit strategy and connection handler.
    pub fn create_with(
        config: EngineConfig,
        mut strategy: Box<dyn Strategy>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> EngineResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            EngineError::system(
                "core context requires a tokio runtime",
                std::io::Error::new(std::io::ErrorKind::Other, e),
            )
        })?;

        if config.registry.capacity == 0 {
            return Err(EngineError::InvalidArgument(
                "registry capacity must be > 0".into(),
            ));
        }
        let registry = Registry::with_capacity(config.registry.capacity);
        for backend in &config.backends {
            let index = registry.add(&backend.host, backend.port, backend.weight)?;
            tracing::info!(index, host = %backend.host, port = backend.port, weight = backend.weight, "Backend added");
        }

        let arena = if config.arena.enabled {
            match Arena::reserve(config.arena.size_bytes, config.arena.slot_size) {
                Ok(arena) => {
                    tracing::info!(
                        size_bytes = arena.size_bytes(),
                        slots = arena.total_slots(),
                        "Buffer arena reserved"
                    );
                    Some(arena)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Buffer arena unavailable, continuing with heap buffers");
                    None
                }
            }
        } else {
            None
        };

        init_strategy(strategy.as_mut(), &registry)?;

        let shared = Arc::new(Shared {
            registry,
            strategy: ArcSwap::from_pointee(strategy),
            cursor: AtomicUsize::new(0),
            arena: ArcSwapOption::new(arena),
            state: AtomicU8::new(LifecycleState::Created as u8),
            handler,
            sessions: SessionSet::default(),
            shutdown: Shutdown::new(),
            dispatched: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            selection_failures: AtomicU64::new(0),
            config,
        });

        let workers = match shared.config.workers.threads {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        };
        let job = {
            let shared = Arc::clone(&shared);
            Arc::new(move |item: WorkItem| Arc::clone(&shared).dispatch(item).boxed())
        };
        let pool = match WorkerPool::start(workers, shared.config.workers.queue_capacity, job) {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!(error = %e, "Worker pool failed to start, running degraded");
                None
            }
        };

        tracing::info!(
            strategy = shared.strategy.load().name(),
            backends = shared.registry.snapshot_count(),
            workers = pool.as_ref().map_or(0, WorkerPool::size),
            "Core context created"
        );

        Ok(Self {
            workers: pool.as_ref().map_or(0, WorkerPool::size),
            pool: Mutex::new(pool),
            shared,
            runtime,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Name of the active strategy.
    pub fn strategy_name(&self) -> &'static str {
        self.shared.strategy.load().name()
    }

    /// Whether relay buffers come from a reserved arena.
    pub fn has_arena(&self) -> bool {
        self.shared.arena.load().is_some()
    }

    /// Number of pool workers; 0 when running degraded.
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats()
    }

    /// Relay sessions started and not yet reaped.
    pub fn open_sessions(&self) -> usize {
        self.shared.sessions.tracked()
    }

    /// Coordinator that stops the event loop when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shared.shutdown.clone()
    }

    fn ensure_live(&self, operation: &'static str) -> EngineResult<()> {
        match self.state() {
            LifecycleState::Created | LifecycleState::Running => Ok(()),
            state => Err(EngineError::InvalidState { operation, state }),
        }
    }

    /// Admit a backend. It starts `Down` until the health feed marks it up.
    pub fn add_backend(&self, host: &str, port: u16, weight: u32) -> EngineResult<usize> {
        self.ensure_live("add_backend")?;
        let index = self.shared.registry.add(host, port, weight)?;
        tracing::info!(index, host, port, weight = weight.max(1), "Backend added");
        Ok(index)
    }

    /// Health feed: set the state of the backend at `index`.
    pub fn mark_state(&self, index: usize, state: BackendState) -> EngineResult<BackendState> {
        if self.state() == LifecycleState::Destroyed {
            return Err(EngineError::InvalidState {
                operation: "mark_state",
                state: LifecycleState::Destroyed,
            });
        }
        let previous = self.shared.registry.mark_state(index, state)?;
        if let Some(backend) = self.shared.registry.get(index) {
            report_transition(backend, previous, state);
        }
        Ok(previous)
    }

    /// Health feed keyed by identity rather than index.
    pub fn mark_state_by_addr(
        &self,
        host: &str,
        port: u16,
        state: BackendState,
    ) -> EngineResult<BackendState> {
        let index = self
            .shared
            .registry
            .find(host, port)
            .map(|b| b.index())
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown backend {host}:{port}")))?;
        self.mark_state(index, state)
    }

    /// Change weight and state of one backend as a single update.
    pub fn update_backend(&self, index: usize, weight: u32, state: BackendState) -> EngineResult<()> {
        self.ensure_live("update_backend")?;
        let backend = self.shared.registry.get(index).ok_or_else(|| {
            EngineError::InvalidArgument(format!("backend index {index} out of bounds"))
        })?;
        let previous = backend.state();
        backend.update(weight, state);
        report_transition(backend, previous, state);
        Ok(())
    }

    /// Health feed with hysteresis: one probe result for the backend at `index`.
    ///
    /// Applies the configured thresholds; returns the new state when the
    /// result completed a transition. Draining backends are left alone.
    pub fn record_probe(&self, index: usize, healthy: bool) -> EngineResult<Option<BackendState>> {
        self.ensure_live("record_probe")?;
        let backend = self.shared.registry.get(index).ok_or_else(|| {
            EngineError::InvalidArgument(format!("backend index {index} out of bounds"))
        })?;
        let thresholds = &self.shared.config.health_check;
        let previous = backend.state();
        let changed = if healthy {
            backend.mark_success(thresholds.healthy_threshold as usize)
        } else {
            backend.mark_failure(thresholds.unhealthy_threshold as usize)
        };
        if let Some(next) = changed {
            report_transition(backend, previous, next);
        }
        Ok(changed)
    }

    /// Pick a backend with the active strategy. `None` when nothing is eligible
    /// or the context is destroyed.
    pub fn select_backend(&self, key: SelectionKey<'_>) -> Option<Arc<Backend>> {
        self.shared.select(key)
    }

    /// Initialize `strategy`, install it, and tear down the one it replaces.
    pub fn set_strategy(&self, mut strategy: Box<dyn Strategy>) -> EngineResult<()> {
        self.ensure_live("set_strategy")?;
        init_strategy(strategy.as_mut(), &self.shared.registry)?;
        let to = strategy.name();
        let old = self.shared.strategy.swap(Arc::new(strategy));
        old.teardown();
        tracing::info!(from = old.name(), to, "Strategy replaced");
        Ok(())
    }

    /// Switch to a built-in algorithm by name.
    pub fn set_algorithm(&self, name: &str) -> EngineResult<()> {
        let algorithm: Algorithm = name.parse()?;
        self.set_strategy(algorithm.build())
    }

    /// Point-in-time view of every backend.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.shared.registry.iter().map(|b| b.snapshot()).collect()
    }

    /// Bind the configured listener and run the event loop until shutdown.
    pub async fn run(&self) -> EngineResult<()> {
        self.ensure_state("run", LifecycleState::Created)?;
        let listener = net::bind(&self.shared.config.listener, &self.shared.config.socket)
            .map_err(|e| {
                let context = e.to_string();
                match e {
                    net::ListenerError::Bind { source, .. }
                    | net::ListenerError::Options { source, .. } => {
                        EngineError::system(context, source)
                    }
                }
            })?;
        self.run_with_listener(listener).await
    }

    /// Run the event loop on an already bound listener until shutdown.
    ///
    /// A fatal accept error moves the context to `Stopping` and is returned.
    pub async fn run_with_listener(&self, listener: TcpListener) -> EngineResult<()> {
        self.shared
            .state
            .compare_exchange(
                LifecycleState::Created as u8,
                LifecycleState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|current| EngineError::InvalidState {
                operation: "run",
                state: LifecycleState::from(current),
            })?;

        let submitter = self.pool.lock().as_ref().and_then(WorkerPool::submitter);
        let dispatch = match submitter {
            Some(sender) => Dispatch::Queue(sender),
            None => Dispatch::Inline(self.runtime.clone()),
        };

        let event_loop = EventLoop {
            listener,
            shared: Arc::clone(&self.shared),
            dispatch,
            shutdown: self.shared.shutdown.subscribe(),
        };
        let result = event_loop.run().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Event loop failed, stopping");
            self.shared.set_state(LifecycleState::Stopping);
            self.shared.shutdown.trigger();
        }
        result
    }

    fn ensure_state(&self, operation: &'static str, expected: LifecycleState) -> EngineResult<()> {
        match self.state() {
            state if state == expected => Ok(()),
            state => Err(EngineError::InvalidState { operation, state }),
        }
    }

    /// Stop workers, wait for open relays, tear down the strategy and
    /// release the arena.
    ///
    /// Relays are not cut short, so this returns once each has reached EOF
    /// or a timeout. Safe to call more than once.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.set_state(LifecycleState::Stopping);
        self.shared.shutdown.trigger();

        let pool = self.pool.lock().take();
        if let Some(mut pool) = pool {
            pool.shutdown().await;
        }
        self.shared.sessions.wait().await;

        self.shared.strategy.load().teardown();
        self.shared.arena.store(None);
        self.shared.set_state(LifecycleState::Destroyed);

        let stats = self.shared.stats();
        tracing::info!(
            dispatched = stats.dispatched,
            rejected = stats.rejected,
            selection_failures = stats.selection_failures,
            "Core context destroyed"
        );
    }
}

impl Drop for CoreContext {
    fn drop(&mut self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.shared.shutdown.trigger();
            self.shared.strategy.load().teardown();
            self.shared.set_state(LifecycleState::Destroyed);
        }
    }
}

impl fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreContext")
            .field("state", &self.state())
            .field("strategy", &self.strategy_name())
            .field("backends", &self.shared.registry.snapshot_count())
            .field("workers", &self.workers)
            .field("arena", &self.has_arena())
            .finish()
    }
}

fn init_strategy(strategy: &mut dyn Strategy, registry: &Registry) -> EngineResult<()> {
    let name = strategy.name();
    strategy.init(registry).map_err(|e| {
        tracing::error!(strategy = name, error = %e, "Strategy initialization failed");
        match e {
            EngineError::StrategyInit { .. } => e,
            other => EngineError::StrategyInit {
                strategy: name,
                reason: other.to_string(),
            },
        }
    })
}

fn report_transition(backend: &Backend, previous: BackendState, next: BackendState) {
    let authority = backend.authority();
    metrics::record_backend_state(&authority, next);
    if previous != next {
        tracing::info!(
            index = backend.index(),
            backend = %authority,
            from = %previous,
            to = %next,
            "Backend state changed"
        );
    }
}
