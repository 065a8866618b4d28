//! The raw/FFI-flavored adapter, for a host that expects the five-callback, integer-return
//! calling convention instead of the idiomatic `Result`-returning [`Cache`] API.
//!
//! Nothing here does any work of its own; every function is a thin wrapper translating one calling
//! convention into the other.

use crate::backing::BackingStore;
use crate::cache::Cache;
use crate::pool::SlabPool;

impl<S: SlabPool, B: BackingStore> Cache<S, B> {
    /// `init_store(store_id)`. Never sleeps, never fails.
    pub fn raw_init_store(&self, store_id: u32) {
        self.init_store(store_id);
    }

    /// `store(store_id, offset, page) -> 0 | error-code`.
    pub fn raw_store(&self, store_id: u32, offset: u64, page: &[u8]) -> i32 {
        match self.store(store_id, offset, page) {
            Ok(()) => 0,
            Err(err) => err.code(),
        }
    }

    /// `load(store_id, offset, page) -> 0 | -1`.
    pub fn raw_load(&self, store_id: u32, offset: u64, page: &mut [u8]) -> i32 {
        match self.load(store_id, offset, page) {
            Ok(()) => 0,
            Err(_) => -1,
        }
    }

    /// `invalidate_page(store_id, offset)`. No return value.
    pub fn raw_invalidate_page(&self, store_id: u32, offset: u64) {
        self.invalidate_page(store_id, offset);
    }

    /// `invalidate_store(store_id)`. No return value.
    pub fn raw_invalidate_store(&self, store_id: u32) {
        self.invalidate_store(store_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use slog::Logger;

    use crate::backing::MemoryBackingStore;
    use crate::cache::{Cache, PAGE_SIZE};
    use crate::config::Config;
    use crate::error::CacheError;
    use crate::pool::SlabBackend;

    fn cache() -> Cache<SlabBackend, MemoryBackingStore> {
        Cache::new(
            Config {
                compressor: "lz4".to_owned(),
                ..Config::default()
            },
            SlabBackend::new(PAGE_SIZE),
            Arc::new(MemoryBackingStore::new()),
            Logger::root(slog::Discard, slog::o!()),
        )
        .unwrap()
    }

    #[test]
    fn raw_store_load_round_trip_returns_zero() {
        let cache = cache();
        cache.raw_init_store(0);
        let page = vec![0x5Au8; PAGE_SIZE];
        assert_eq!(cache.raw_store(0, 1, &page), 0);

        let mut out = vec![0u8; PAGE_SIZE];
        assert_eq!(cache.raw_load(0, 1, &mut out), 0);
        assert_eq!(out, page);
    }

    #[test]
    fn raw_load_absent_returns_negative_one() {
        let cache = cache();
        cache.raw_init_store(0);
        let mut out = vec![0u8; PAGE_SIZE];
        assert_eq!(cache.raw_load(0, 99, &mut out), -1);
    }

    #[test]
    fn raw_store_unregistered_store_returns_no_device_code() {
        let cache = cache();
        let page = vec![0u8; PAGE_SIZE];
        assert_eq!(cache.raw_store(0, 0, &page), CacheError::NoDevice { store_id: 0 }.code());
    }

    #[test]
    fn raw_invalidate_page_then_load_returns_negative_one() {
        let cache = cache();
        cache.raw_init_store(0);
        let page = vec![0x11u8; PAGE_SIZE];
        cache.raw_store(0, 2, &page);
        cache.raw_invalidate_page(0, 2);

        let mut out = vec![0u8; PAGE_SIZE];
        assert_eq!(cache.raw_load(0, 2, &mut out), -1);
    }
}
