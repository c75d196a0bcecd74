//! Fixed-size byte arena.
//!
//! # Responsibilities
//! - Reserve one region at startup and carve it into equal buffer slots
//! - Lend slots to connections without per-request allocation
//! - Reclaim slots when the lease drops
//!
//! # Design Decisions
//! - The region is a single `Vec<u8>` split into `BytesMut` views; no copy,
//!   no unsafe
//! - Free slots are spread over shards so concurrent workers rarely contend
//!   on the same lock
//! - A slot that grew past its size (reallocated) is dropped instead of
//!   returned; the arena shrinks rather than leaking foreign memory into it

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::engine::error::{EngineError, EngineResult};

const SHARDS: usize = 16;

/// A pre-reserved region partitioned into buffer slots.
#[derive(Debug)]
pub struct Arena {
    shards: Box<[Mutex<Vec<BytesMut>>]>,
    next_shard: AtomicUsize,
    slot_size: usize,
    total_slots: usize,
    size_bytes: usize,
    leased: AtomicUsize,
    retired: AtomicUsize,
}

impl Arena {
    /// Reserve `size_bytes` and split it into `slot_size` slots.
    ///
    /// Fails with `OutOfMemory` if the reservation cannot be satisfied; the
    /// caller decides whether that is fatal.
    pub fn reserve(size_bytes: usize, slot_size: usize) -> EngineResult<Arc<Self>> {
        if slot_size == 0 || slot_size > size_bytes {
            return Err(EngineError::InvalidArgument(format!(
                "arena slot size {slot_size} must be in 1..={size_bytes}"
            )));
        }
        let total_slots = size_bytes / slot_size;
        let usable = total_slots * slot_size;

        let mut region = Vec::new();
        region
            .try_reserve_exact(usable)
            .map_err(|e| EngineError::OutOfMemory(format!("arena of {usable} bytes: {e}")))?;
        region.resize(usable, 0);

        let mut region = BytesMut::from(Bytes::from(region));
        let mut shards: Vec<Vec<BytesMut>> = (0..SHARDS)
            .map(|_| Vec::with_capacity(total_slots / SHARDS + 1))
            .collect();
        for i in 0..total_slots {
            let mut slot = region.split_to(slot_size);
            slot.clear();
            shards[i % SHARDS].push(slot);
        }

        Ok(Arc::new(Self {
            shards: shards.into_iter().map(Mutex::new).collect(),
            next_shard: AtomicUsize::new(0),
            slot_size,
            total_slots,
            size_bytes: usable,
            leased: AtomicUsize::new(0),
            retired: AtomicUsize::new(0),
        }))
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn total_slots(&self) -> usize {
        self.total_slots
    }

    /// Slots currently lent out.
    pub fn leased(&self) -> usize {
        self.leased.load(Ordering::Relaxed)
    }

    /// Slots permanently dropped because their buffer was reallocated.
    pub fn retired(&self) -> usize {
        self.retired.load(Ordering::Relaxed)
    }

    /// Lend one empty slot, or `None` when every slot is in use.
    ///
    /// Visits each shard at most once.
    pub fn lease(self: &Arc<Self>) -> Option<ArenaBuf> {
        let start = self.next_shard.fetch_add(1, Ordering::Relaxed);
        for offset in 0..SHARDS {
            let shard = (start + offset) % SHARDS;
            if let Some(buf) = self.shards[shard].lock().pop() {
                self.leased.fetch_add(1, Ordering::Relaxed);
                return Some(ArenaBuf {
                    buf: Some(buf),
                    arena: Arc::clone(self),
                    shard,
                });
            }
        }
        None
    }

    fn reclaim(&self, shard: usize, mut buf: BytesMut) {
        self.leased.fetch_sub(1, Ordering::Relaxed);
        if buf.capacity() != self.slot_size {
            self.retired.fetch_add(1, Ordering::Relaxed);
            return;
        }
        buf.clear();
        self.shards[shard].lock().push(buf);
    }
}

/// A buffer leased from the [`Arena`]; returned to it on drop.
#[derive(Debug)]
pub struct ArenaBuf {
    buf: Option<BytesMut>,
    arena: Arc<Arena>,
    shard: usize,
}

impl Deref for ArenaBuf {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().unwrap_or_else(|| unreachable!("arena buffer taken before drop"))
    }
}

impl DerefMut for ArenaBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().unwrap_or_else(|| unreachable!("arena buffer taken before drop"))
    }
}

impl Drop for ArenaBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.arena.reclaim(self.shard, buf);
        }
    }
}
