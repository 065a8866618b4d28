//! The compressed-object pool.
//!
//! A thin shim over an external opaque-handle allocator (`SlabPool`), generic over the backend so
//! the admission gate and page accounting below work the same regardless of what actually backs a
//! handle. The handle allocator itself stays opaque to every other module.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Tunables;
use crate::counters::Counters;

/// An opaque handle into the compressed-object pool. Callers never inspect its internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub(crate) usize);

/// The interface the compressed-object allocator exposes. `SlabBackend` below is the one
/// production implementation this crate ships.
pub trait SlabPool: Send + Sync {
    /// Allocates space for `len` compressed bytes, returning an opaque handle.
    fn allocate(&self, len: usize) -> Option<Handle>;
    /// Writes `data` into the object behind `handle`. `data.len()` must match the `len` passed to
    /// the `allocate` call that produced `handle`.
    fn write(&self, handle: Handle, data: &[u8]);
    /// Reads the bytes behind `handle` back out.
    fn read(&self, handle: Handle) -> Vec<u8>;
    /// Releases the object behind `handle`. The handle must not be used again.
    fn free(&self, handle: Handle);
    /// The number of page-frames an allocation of `len` bytes costs, for pool accounting.
    fn frames_for(&self, len: usize) -> u64;
}

/// A simple slab-backed allocator: one slab slot per compressed object, sized to the exact
/// compressed length. Stands in for a real zsmalloc-style sub-page allocator; see DESIGN.md for
/// why a byte-exact `Vec` slab is an acceptable substitute for a simulation of this shape.
pub struct SlabBackend {
    slots: Mutex<slab::Slab<Vec<u8>>>,
    frame_size: usize,
}

impl SlabBackend {
    pub fn new(frame_size: usize) -> Self {
        SlabBackend {
            slots: Mutex::new(slab::Slab::new()),
            frame_size,
        }
    }
}

impl SlabPool for SlabBackend {
    fn allocate(&self, len: usize) -> Option<Handle> {
        let key = self.slots.lock().insert(vec![0u8; len]);
        Some(Handle(key))
    }

    fn write(&self, handle: Handle, data: &[u8]) {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(handle.0).expect("write to freed handle");
        slot.clear();
        slot.extend_from_slice(data);
    }

    fn read(&self, handle: Handle) -> Vec<u8> {
        self.slots
            .lock()
            .get(handle.0)
            .expect("read from freed handle")
            .clone()
    }

    fn free(&self, handle: Handle) {
        self.slots.lock().remove(handle.0);
    }

    fn frames_for(&self, len: usize) -> u64 {
        len.div_ceil(self.frame_size) as u64
    }
}

/// The bounded, accounted view of the compressed-object pool the rest of the crate uses.
pub struct Pool<S: SlabPool> {
    backend: S,
    tunables: Arc<Tunables>,
}

impl<S: SlabPool> Pool<S> {
    pub fn new(backend: S, tunables: Arc<Tunables>) -> Self {
        Pool { backend, tunables }
    }

    /// Attempts a non-blocking allocation of `len` bytes, respecting the pool ceiling.
    ///
    /// On success returns the handle and the number of page-frames it consumed (the caller is
    /// responsible for crediting that to `counters.pool_pages` once the allocation is durably
    /// linked into the store; the ceiling is never transiently exceeded because `store` fails
    /// before the pool grows past it). The check-and-reserve against `counters.pool_pages` is a
    /// compare-exchange loop rather than a plain load-then-add, so two concurrent callers racing
    /// the same headroom cannot both pass the gate and push the total past `ceiling`.
    pub fn try_allocate(&self, len: usize, counters: &Counters) -> Option<(Handle, u64)> {
        let frames = self.backend.frames_for(len);
        let ceiling = self.tunables.pool_page_ceiling();

        let mut current = counters.pool_pages.load(Ordering::Relaxed);
        loop {
            if current + frames > ceiling {
                Counters::inc(&counters.pool_limit_hit);
                return None;
            }
            match counters.pool_pages.compare_exchange_weak(
                current,
                current + frames,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        match self.backend.allocate(len) {
            Some(handle) => Some((handle, frames)),
            None => {
                Counters::sub(&counters.pool_pages, frames);
                None
            }
        }
    }

    pub fn write(&self, handle: Handle, data: &[u8]) {
        self.backend.write(handle, data);
    }

    pub fn read(&self, handle: Handle) -> Vec<u8> {
        self.backend.read(handle)
    }

    /// Frees `handle`, crediting `frames` page-frames back to the pool.
    pub fn free(&self, handle: Handle, frames: u64, counters: &Counters) {
        self.backend.free(handle);
        Counters::sub(&counters.pool_pages, frames);
    }
}
