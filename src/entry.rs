//! The resident-entry type.
//!
//! One `Entry` per compressed page held in RAM. Shared between the store's tree, its LRU ordering,
//! and any in-flight operation (`load`, flush) via `Arc`; the single destruction site is whichever
//! operation drives `refcount` to zero, per the design notes' "cooperative handoff" model.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::pool::Handle;

/// Sentinel recency sequence meaning "not currently linked into the LRU ordering".
pub const NOT_IN_LRU: u64 = u64::MAX;

pub struct Entry {
    pub store_id: u32,
    pub offset: u64,
    pub handle: Handle,
    pub length: usize,
    pub frames: u64,
    refcount: AtomicU32,
    /// The key this entry is (or was) filed under in the store's recency-ordered index. `NOT_IN_LRU`
    /// means detached, in transit through `load` or the flush engine.
    recency_seq: AtomicU64,
}

impl Entry {
    pub fn new(store_id: u32, offset: u64, handle: Handle, length: usize, frames: u64) -> Self {
        Entry {
            store_id,
            offset,
            handle,
            length,
            frames,
            refcount: AtomicU32::new(1),
            recency_seq: AtomicU64::new(NOT_IN_LRU),
        }
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    /// Increments the refcount. Must be called while holding the owning store's lock.
    pub fn incref(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the refcount and returns the new value. Must be called while holding the owning
    /// store's lock.
    pub fn decref(&self) -> u32 {
        self.refcount.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn recency_seq(&self) -> Option<u64> {
        match self.recency_seq.load(Ordering::Relaxed) {
            NOT_IN_LRU => None,
            seq => Some(seq),
        }
    }

    pub fn set_recency_seq(&self, seq: Option<u64>) {
        self.recency_seq
            .store(seq.unwrap_or(NOT_IN_LRU), Ordering::Relaxed);
    }

    pub fn in_lru(&self) -> bool {
        self.recency_seq().is_some()
    }
}
