//! Backend registry.
//!
//! # Responsibilities
//! - Own a fixed-capacity, insertion-ordered set of backends
//! - Hand out stable indices that never move while the registry lives
//! - Let selection iterate without taking any lock
//!
//! # Design Decisions
//! - Slots are pre-sized `OnceLock`s; a slot is written exactly once
//! - `len` is published with `Release` after the slot is filled, so any reader
//!   that observes `len = n` also observes slots `0..n`
//! - Only the append path takes the short exclusive lock

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::engine::error::{EngineError, EngineResult};
use crate::load_balancer::backend::{Backend, BackendState, MAX_HOST_LEN};

/// Default registry capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// Append-only, fixed-capacity backend registry.
#[derive(Debug)]
pub struct Registry {
    slots: Box<[OnceLock<Arc<Backend>>]>,
    len: AtomicUsize,
    append: Mutex<()>,
}

impl Registry {
    /// Create an empty registry able to hold `capacity` backends.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| OnceLock::new()).collect();
        Self {
            slots,
            len: AtomicUsize::new(0),
            append: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current number of backends.
    pub fn snapshot_count(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot_count() == 0
    }

    /// Append a backend, returning its index.
    ///
    /// New backends start `Down`; the health feed brings them up.
    pub fn add(&self, host: &str, port: u16, weight: u32) -> EngineResult<usize> {
        validate_identity(host, port)?;

        let _guard = self.append.lock();
        let index = self.len.load(Ordering::Relaxed);
        if index >= self.slots.len() {
            return Err(EngineError::CapacityExceeded {
                capacity: self.slots.len(),
            });
        }

        let backend = Arc::new(Backend::new(index, host.to_string(), port, weight));
        if self.slots[index].set(backend).is_err() {
            // Slots past `len` are only written under the append lock.
            return Err(EngineError::InvalidArgument(format!(
                "registry slot {index} already occupied"
            )));
        }
        self.len.store(index + 1, Ordering::Release);
        Ok(index)
    }

    /// Backend at `index`, if admitted.
    pub fn get(&self, index: usize) -> Option<&Arc<Backend>> {
        if index >= self.snapshot_count() {
            return None;
        }
        self.slots[index].get()
    }

    /// Locate a backend by its identity.
    pub fn find(&self, host: &str, port: u16) -> Option<&Arc<Backend>> {
        self.iter().find(|b| b.port() == port && b.host() == host)
    }

    /// Atomically change the state of the backend at `index`.
    ///
    /// Returns the previous state.
    pub fn mark_state(&self, index: usize, state: BackendState) -> EngineResult<BackendState> {
        let backend = self.get(index).ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "backend index {index} out of bounds (count {})",
                self.snapshot_count()
            ))
        })?;
        Ok(backend.set_state(state))
    }

    /// Iterate backends in insertion order, bounded by the count observed now.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> + '_ {
        let len = self.snapshot_count();
        self.slots[..len].iter().filter_map(OnceLock::get)
    }

    /// Number of backends currently `Up`.
    pub fn up_count(&self) -> usize {
        self.iter().filter(|b| b.is_up()).count()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

fn validate_identity(host: &str, port: u16) -> EngineResult<()> {
    if port == 0 {
        return Err(EngineError::InvalidArgument("backend port must be non-zero".into()));
    }
    if host.is_empty() {
        return Err(EngineError::InvalidArgument("backend host must not be empty".into()));
    }
    if host.len() > MAX_HOST_LEN {
        return Err(EngineError::InvalidArgument(format!(
            "backend host longer than {MAX_HOST_LEN} bytes"
        )));
    }
    if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(EngineError::InvalidArgument(format!(
            "backend host {host:?} contains whitespace or control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ErrorKind;

    #[test]
    fn add_appends_in_order() {
        let reg = Registry::with_capacity(4);
        assert_eq!(reg.add("a", 1, 1).unwrap(), 0);
        assert_eq!(reg.add("b", 2, 1).unwrap(), 1);
        let hosts: Vec<_> = reg.iter().map(|b| b.host().to_string()).collect();
        assert_eq!(hosts, vec!["a", "b"]);
        assert_eq!(reg.get(1).unwrap().index(), 1);
        assert!(reg.get(2).is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let reg = Registry::with_capacity(3);
        for i in 0..3 {
            reg.add("h", 1000 + i, 1).unwrap();
        }
        let err = reg.add("h", 2000, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(reg.snapshot_count(), 3);
    }

    #[test]
    fn malformed_identity_is_rejected() {
        let reg = Registry::with_capacity(2);
        assert_eq!(reg.add("", 80, 1).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(reg.add("h", 0, 1).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(reg.add("a b", 80, 1).unwrap_err().kind(), ErrorKind::InvalidArgument);
        let long = "x".repeat(MAX_HOST_LEN + 1);
        assert_eq!(reg.add(&long, 80, 1).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(reg.is_empty());
    }

    #[test]
    fn mark_state_checks_bounds() {
        let reg = Registry::with_capacity(2);
        reg.add("h", 80, 1).unwrap();
        assert_eq!(reg.mark_state(0, BackendState::Up).unwrap(), BackendState::Down);
        assert_eq!(reg.up_count(), 1);
        assert!(reg.mark_state(1, BackendState::Up).is_err());
    }

    #[test]
    fn find_by_identity() {
        let reg = Registry::with_capacity(4);
        reg.add("a", 80, 1).unwrap();
        reg.add("a", 81, 1).unwrap();
        assert_eq!(reg.find("a", 81).unwrap().index(), 1);
        assert!(reg.find("b", 80).is_none());
    }

    #[test]
    fn concurrent_appends_never_exceed_capacity() {
        let reg = Arc::new(Registry::with_capacity(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    (0..16)
                        .filter(|i| reg.add("h", (t * 100 + i + 1) as u16, 1).is_ok())
                        .count()
                })
            })
            .collect();
        let ok: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(ok, 64);
        assert_eq!(reg.snapshot_count(), 64);
        for (i, b) in reg.iter().enumerate() {
            assert_eq!(b.index(), i);
        }
    }
}
