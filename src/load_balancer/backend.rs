//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream target (immutable host/port identity)
//! - Track live state (Down/Up/Draining), weight and in-flight connections
//! - Pair every dispatch with exactly one decrement via [`BackendLease`]
//! - Apply health hysteresis when fed by the health checker

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Longest accepted host name, in bytes.
pub const MAX_HOST_LEN: usize = 255;

/// Backend eligibility state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    /// Not eligible for selection.
    Down = 0,
    /// Eligible for selection.
    Up = 1,
    /// Finishing in-flight work; receives nothing new.
    Draining = 2,
}

impl From<u8> for BackendState {
    fn from(val: u8) -> Self {
        match val {
            1 => BackendState::Up,
            2 => BackendState::Draining,
            _ => BackendState::Down,
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendState::Down => "down",
            BackendState::Up => "up",
            BackendState::Draining => "draining",
        };
        f.write_str(s)
    }
}

/// A single backend server.
///
/// Single-field reads and writes are atomic and lock-free. The `update` lock
/// only serializes compound changes that must appear as one.
#[derive(Debug)]
pub struct Backend {
    index: usize,
    host: String,
    port: u16,
    weight: AtomicU32,
    state: AtomicU8,
    active_connections: AtomicUsize,
    total_dispatched: AtomicU64,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    update: Mutex<()>,
}

impl Backend {
    /// Create a backend at `index`. Starts `Down` with no connections.
    ///
    /// A weight of 0 is normalized to 1.
    pub(crate) fn new(index: usize, host: String, port: u16, weight: u32) -> Self {
        Self {
            index,
            host,
            port,
            weight: AtomicU32::new(weight.max(1)),
            state: AtomicU8::new(BackendState::Down as u8),
            active_connections: AtomicUsize::new(0),
            total_dispatched: AtomicU64::new(0),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            update: Mutex::new(()),
        }
    }

    /// Stable position in the registry.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form suitable for connecting and for metric labels.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn state(&self) -> BackendState {
        BackendState::from(self.state.load(Ordering::Acquire))
    }

    /// Atomically replace the state, returning the previous one.
    pub fn set_state(&self, state: BackendState) -> BackendState {
        BackendState::from(self.state.swap(state as u8, Ordering::AcqRel))
    }

    /// Eligible for new work.
    pub fn is_up(&self) -> bool {
        self.state() == BackendState::Up
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    /// Change the weight. 0 is normalized to 1.
    pub fn set_weight(&self, weight: u32) {
        self.weight.store(weight.max(1), Ordering::Relaxed);
    }

    /// Change weight and state together.
    ///
    /// Concurrent `update` calls are serialized so two compound changes never
    /// interleave; lock-free readers may still observe the weight before the
    /// state flips.
    pub fn update(&self, weight: u32, state: BackendState) {
        let _guard = self.update.lock();
        self.weight.store(weight.max(1), Ordering::Relaxed);
        self.state.store(state as u8, Ordering::Release);
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Total number of leases ever handed out for this backend.
    pub fn total_dispatched(&self) -> u64 {
        self.total_dispatched.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count. Saturates at zero.
    pub fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1));
    }

    /// Take a lease: increments the in-flight count now, decrements on drop.
    pub fn lease(self: &Arc<Self>) -> BackendLease {
        self.inc_connections();
        self.total_dispatched.fetch_add(1, Ordering::Relaxed);
        BackendLease {
            backend: Arc::clone(self),
        }
    }

    // --- Health hysteresis ---

    /// Report a successful probe. Returns the new state on a Down → Up transition.
    ///
    /// Draining backends are operator-owned and never changed here.
    pub fn mark_success(&self, healthy_threshold: usize) -> Option<BackendState> {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self.state() != BackendState::Down {
            return None;
        }
        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes < healthy_threshold.max(1) {
            return None;
        }
        let swapped = self.state.compare_exchange(
            BackendState::Down as u8,
            BackendState::Up as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.consecutive_successes.store(0, Ordering::Relaxed);
        swapped.ok().map(|_| BackendState::Up)
    }

    /// Report a failed probe. Returns the new state on an Up → Down transition.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> Option<BackendState> {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        if self.state() != BackendState::Up {
            return None;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < unhealthy_threshold.max(1) {
            return None;
        }
        let swapped = self.state.compare_exchange(
            BackendState::Up as u8,
            BackendState::Down as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.consecutive_failures.store(0, Ordering::Relaxed);
        swapped.ok().map(|_| BackendState::Down)
    }

    /// Point-in-time copy of the live fields.
    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            index: self.index,
            host: self.host.clone(),
            port: self.port,
            state: self.state(),
            weight: self.weight(),
            active_connections: self.active_connections(),
            total_dispatched: self.total_dispatched(),
        }
    }
}

/// Serializable view of a backend, for admin and metrics consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub index: usize,
    pub host: String,
    pub port: u16,
    pub state: BackendState,
    pub weight: u32,
    pub active_connections: usize,
    pub total_dispatched: u64,
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct BackendLease {
    backend: Arc<Backend>,
}

impl BackendLease {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for BackendLease {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.backend.dec_connections();
    }
}
