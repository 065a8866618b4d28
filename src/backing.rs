//! The backing-store writer interface (consumed).
//!
//! Out of scope as an implementation: the flush engine only needs a slot-acquisition call and a
//! fire-and-forget submit. The crate ships one in-memory test double so its own test suite doesn't
//! need a real device.

/// The result of asking the host paging layer for the backing-store slot at `(store_id, offset)`.
pub enum SlotResult {
    /// Another actor is already reclaiming this page; the flush engine abandons this victim.
    AlreadyPresent,
    /// We own the write: a freshly allocated, locked page ready to receive the decompressed bytes.
    Fresh(Vec<u8>),
}

/// Consumed by the flush engine. Implemented by the host's backing-store writer.
pub trait BackingStore: Send + Sync {
    /// Acquires the backing-store slot for `(store_id, offset)`. Must not block for long; this is
    /// called while the entry is pinned by an extra refcount but outside the store lock.
    fn acquire_slot(&self, store_id: u32, offset: u64) -> SlotResult;

    /// Fire-and-forget: submits `page` (already filled with the decompressed bytes, marked
    /// ready-for-writeback) for asynchronous write. `completion` is invoked once, from whatever
    /// thread the device signals completion on, with the write's result.
    fn submit_write(&self, store_id: u32, offset: u64, page: Vec<u8>, completion: Completion);
}

/// A boxed one-shot completion callback, invoked once the device signals a write finished.
pub type Completion = Box<dyn FnOnce(Result<(), WriteError>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteError;

/// An in-memory backing store, standing in for the real device. Writes never fail and complete
/// synchronously on the calling thread, which is enough to drive the crate's own tests without
/// pulling in an I/O runtime.
pub struct MemoryBackingStore {
    pages: parking_lot::Mutex<std::collections::HashMap<(u32, u64), Vec<u8>>>,
    /// Offsets currently "locked" by a slot acquisition that hasn't been released yet, so a second
    /// concurrent flush of the same key observes `AlreadyPresent`.
    locked: parking_lot::Mutex<std::collections::HashSet<(u32, u64)>>,
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        MemoryBackingStore {
            pages: parking_lot::Mutex::new(std::collections::HashMap::new()),
            locked: parking_lot::Mutex::new(std::collections::HashSet::new()),
        }
    }
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, store_id: u32, offset: u64) -> Option<Vec<u8>> {
        self.pages.lock().get(&(store_id, offset)).cloned()
    }
}

impl BackingStore for MemoryBackingStore {
    fn acquire_slot(&self, store_id: u32, offset: u64) -> SlotResult {
        let mut locked = self.locked.lock();
        if !locked.insert((store_id, offset)) {
            return SlotResult::AlreadyPresent;
        }
        SlotResult::Fresh(Vec::new())
    }

    fn submit_write(&self, store_id: u32, offset: u64, page: Vec<u8>, completion: Completion) {
        self.pages.lock().insert((store_id, offset), page);
        self.locked.lock().remove(&(store_id, offset));
        completion(Ok(()));
    }
}
