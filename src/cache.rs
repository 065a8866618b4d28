//! The frontend: `init_store`, `store`, `load`, `invalidate_page`, `invalidate_store`.
//!
//! This is the surface the host paging layer drives. The idiomatic, `Result`-returning API lives
//! here; [`crate::raw`] is a thin adapter for a host that expects a five-callback, integer-return
//! calling convention instead.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use slog::{debug, info, trace, Logger};

use crate::backing::BackingStore;
use crate::compressor::{self, Compressor};
use crate::config::{Config, Tunables};
use crate::counters::{Counters, CountersSnapshot};
use crate::entry::Entry;
use crate::error::CacheError;
use crate::flush::FlushEngine;
use crate::pool::{Pool, SlabPool};
use crate::scratch::{self, TempPagePool};
use crate::store::{BorrowReturn, Invalidate, Replace, Store};

/// Fixed page size this cache is instantiated for. A real host negotiates this at boot; this crate
/// fixes one value since the scratch-buffer and temp-page pools are sized against it and are not
/// resized dynamically.
pub const PAGE_SIZE: usize = 4096;

/// The maximum number of LRU victims a single `store` will ask the flush engine to attempt before
/// giving up and failing with `no-memory`.
const FLUSH_BATCH: usize = 16;

/// Outcome of [`Cache::load`]: callers only distinguish present vs. absent/failed, so this carries
/// no further detail. Decompression failure and "not found" are deliberately indistinguishable
/// here, matching the `-1` a raw-ABI host sees for either case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFound;

pub struct Cache<S: SlabPool, B: BackingStore> {
    stores: RwLock<HashMap<u32, Arc<Store<S>>>>,
    pool: Arc<Pool<S>>,
    compressor: Arc<dyn Compressor>,
    tunables: Arc<Tunables>,
    counters: Arc<Counters>,
    temp_pages: TempPagePool,
    flush_engine: FlushEngine<B>,
    log: Logger,
}

impl<S: SlabPool, B: BackingStore> Cache<S, B> {
    /// Builds the cache from boot-time `config`. Fails only if neither the configured compressor
    /// nor the default (`"lzo"`) can be resolved.
    pub fn new(config: Config, pool_backend: S, backing: Arc<B>, log: Logger) -> Result<Self, String> {
        let tunables = Arc::new(Tunables::new(&config));
        let compressor = compressor::init(&config.compressor)?;
        let counters = Arc::new(Counters::default());
        let pool = Arc::new(Pool::new(pool_backend, tunables.clone()));
        let temp_pages = TempPagePool::new(16, PAGE_SIZE);
        let flush_engine = FlushEngine::new(backing, counters.clone(), log.new(slog::o!("component" => "flush")));

        info!(log, "cache initialized"; "compressor" => config.compressor.clone());

        Ok(Cache {
            stores: RwLock::new(HashMap::new()),
            pool,
            compressor,
            tunables,
            counters,
            temp_pages,
            flush_engine,
            log,
        })
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Registers `store_id` with the cache. Idempotent: re-registering an already-known store is a
    /// no-op. Must not sleep.
    pub fn init_store(&self, store_id: u32) {
        let mut stores = self.stores.write();
        stores
            .entry(store_id)
            .or_insert_with(|| Arc::new(Store::new(store_id, self.pool.clone())));
        info!(self.log, "store registered"; "store_id" => store_id);
    }

    fn get_store(&self, store_id: u32) -> Option<Arc<Store<S>>> {
        self.stores.read().get(&store_id).cloned()
    }

    /// Admits `page` into the cache at `(store_id, offset)`, replacing any prior entry there.
    pub fn store(&self, store_id: u32, offset: u64, page: &[u8]) -> Result<(), CacheError> {
        let store = self
            .get_store(store_id)
            .ok_or(CacheError::NoDevice { store_id })?;

        let page_size = page.len();
        let limit = self.tunables.compression_limit(page_size);

        // Steps 1-5 run under the per-execution-context output buffer: compress, check the ratio
        // ceiling, and either commit straight into the pool or, if the pool is full, copy the
        // compressed bytes into a temp page so they survive past this closure (the pin and the
        // output buffer are both released when it returns).
        enum Staged {
            Written(crate::pool::Handle, u64),
            NeedsFlush(Box<[u8]>, usize),
        }

        let staged = scratch::with_output_buffer(page_size, |scratch| -> Result<Staged, CacheError> {
            let compressed_len =
                compressor::with_pinned(&self.compressor, |c| c.compress(page, scratch))
                    .map_err(|_| CacheError::Invalid { store_id, offset })?;
            if compressed_len > limit {
                Counters::inc(&self.counters.reject_compress_poor);
                return Err(CacheError::TooBig {
                    store_id,
                    offset,
                    compressed_len,
                    limit,
                });
            }

            match self.pool.try_allocate(compressed_len, &self.counters) {
                Some((handle, frames)) => {
                    self.pool.write(handle, &scratch[..compressed_len]);
                    Ok(Staged::Written(handle, frames))
                }
                None => {
                    Counters::inc(&self.counters.flush_attempted);
                    let mut temp = self.temp_pages.acquire().ok_or_else(|| {
                        Counters::inc(&self.counters.reject_tmppage_fail);
                        CacheError::NoMemoryTmpPage { store_id, offset }
                    })?;
                    temp[..compressed_len].copy_from_slice(&scratch[..compressed_len]);
                    Ok(Staged::NeedsFlush(temp, compressed_len))
                }
            }
        })?;

        let (handle, frames) = match staged {
            Staged::Written(handle, frames) => (handle, frames),
            Staged::NeedsFlush(temp, compressed_len) => {
                debug!(
                    self.log, "pool exhausted, invoking flush engine";
                    "store_id" => store_id, "offset" => offset
                );
                self.flush_engine.flush_victims(
                    store.as_ref(),
                    self.compressor.as_ref(),
                    page_size,
                    FLUSH_BATCH,
                );

                let retried = self.pool.try_allocate(compressed_len, &self.counters);
                let result = match retried {
                    Some((handle, frames)) => {
                        self.pool.write(handle, &temp[..compressed_len]);
                        Counters::inc(&self.counters.saved_by_flush);
                        Ok((handle, frames))
                    }
                    None => {
                        Counters::inc(&self.counters.reject_zsmalloc_fail);
                        Err(CacheError::NoMemoryPool { store_id, offset })
                    }
                };
                self.temp_pages.release(temp);
                result?
            }
        };

        // Step 6: allocate the entry record. `Arc::new` is infallible in safe Rust, so
        // `NoMemorySlab`/`reject_kmemcache_fail` are carried in the taxonomy for fidelity but are
        // not reachable through this constructor (see DESIGN.md).
        let entry = Arc::new(Entry::new(store_id, offset, handle, compressed_len, frames));

        // Step 7: insert, resolving any duplicate-key collision.
        match store.insert_replacing(entry) {
            Replace::Fresh => {}
            Replace::DuplicateDeferred => {
                Counters::inc(&self.counters.duplicate_entry);
            }
            Replace::DuplicateDestroy(old) => {
                Counters::inc(&self.counters.duplicate_entry);
                self.pool.free(old.handle, old.frames, &self.counters);
                Counters::sub(&self.counters.stored_pages, 1);
            }
        }
        Counters::inc(&self.counters.stored_pages);
        trace!(self.log, "page stored"; "store_id" => store_id, "offset" => offset, "compressed_len" => compressed_len);
        Ok(())
    }

    /// Fills `page` with the decompressed contents at `(store_id, offset)`.
    pub fn load(&self, store_id: u32, offset: u64, page: &mut [u8]) -> Result<(), NotFound> {
        let store = self.get_store(store_id).ok_or(NotFound)?;
        let entry = store.borrow_for_load(offset).ok_or(NotFound)?;

        let compressed = store.pool.read(entry.handle);
        let decompressed =
            compressor::with_pinned(&self.compressor, |c| c.decompress(&compressed, page));

        match store.return_after_borrow(entry) {
            BorrowReturn::Resident | BorrowReturn::StillReferenced => {}
            BorrowReturn::Destroy(destroyed) => {
                self.pool.free(destroyed.handle, destroyed.frames, &self.counters);
                Counters::sub(&self.counters.stored_pages, 1);
            }
        }

        decompressed.map_err(|_| NotFound)
    }

    /// Removes the entry at `(store_id, offset)` if present. Never fails.
    pub fn invalidate_page(&self, store_id: u32, offset: u64) {
        let Some(store) = self.get_store(store_id) else {
            return;
        };
        if let Invalidate::Destroy(entry) = store.invalidate(offset) {
            self.pool.free(entry.handle, entry.frames, &self.counters);
            Counters::sub(&self.counters.stored_pages, 1);
        }
        trace!(self.log, "page invalidated"; "store_id" => store_id, "offset" => offset);
    }

    /// Removes every entry belonging to `store_id`. Never fails.
    pub fn invalidate_store(&self, store_id: u32) {
        let Some(store) = self.get_store(store_id) else {
            return;
        };
        let entries = store.drain_all();
        let freed = entries.len();
        for entry in entries {
            self.pool.free(entry.handle, entry.frames, &self.counters);
        }
        Counters::sub(&self.counters.stored_pages, freed as u64);
        info!(self.log, "store invalidated"; "store_id" => store_id, "entries_freed" => freed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryBackingStore;
    use crate::pool::SlabBackend;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn test_cache(max_pool_percent: u8, total_ram_pages: u64) -> Cache<SlabBackend, MemoryBackingStore> {
        let config = Config {
            max_pool_percent,
            total_ram_pages,
            compressor: "lz4".to_owned(),
            ..Config::default()
        };
        Cache::new(
            config,
            SlabBackend::new(PAGE_SIZE),
            Arc::new(MemoryBackingStore::new()),
            test_log(),
        )
        .unwrap()
    }

    #[test]
    fn register_store_then_load_missing_is_not_found() {
        let cache = test_cache(20, 1 << 16);
        cache.init_store(0);
        let mut buf = vec![0u8; PAGE_SIZE];
        assert_eq!(cache.load(0, 7, &mut buf), Err(NotFound));
    }

    #[test]
    fn store_not_registered_fails_with_no_device() {
        let cache = test_cache(20, 1 << 16);
        let page = vec![0xAAu8; PAGE_SIZE];
        match cache.store(0, 7, &page) {
            Err(CacheError::NoDevice { store_id }) => assert_eq!(store_id, 0),
            other => panic!("expected NoDevice, got {other:?}"),
        }
    }

    #[test]
    fn register_store_load_invalidate_scenario() {
        let cache = test_cache(20, 1 << 16);
        cache.init_store(0);
        let page = vec![0xAAu8; PAGE_SIZE];

        cache.store(0, 7, &page).unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        cache.load(0, 7, &mut buf).unwrap();
        assert_eq!(buf, page);

        cache.invalidate_page(0, 7);
        assert_eq!(cache.load(0, 7, &mut buf), Err(NotFound));
    }

    #[test]
    fn duplicate_store_replaces_value_and_counts_once() {
        let cache = test_cache(20, 1 << 16);
        cache.init_store(0);
        let a = vec![0xAAu8; PAGE_SIZE];
        let b = vec![0xBBu8; PAGE_SIZE];

        cache.store(0, 7, &a).unwrap();
        cache.store(0, 7, &b).unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        cache.load(0, 7, &mut buf).unwrap();
        assert_eq!(buf, b);
        assert_eq!(cache.counters().stored_pages, 1);
        assert_eq!(cache.counters().duplicate_entry, 1);
    }

    #[test]
    fn poor_compression_is_rejected() {
        let cache = test_cache(20, 1 << 16);
        cache.init_store(0);
        // Feed the compressor a buffer it cannot shrink (already looks like noise to it): force
        // rejection by cranking the ratio down to something no payload can satisfy.
        cache.tunables().set_max_compression_ratio(1);
        let page: Vec<u8> = (0..PAGE_SIZE).map(|i| (i * 2654435761u64 as usize) as u8).collect();

        match cache.store(0, 0, &page) {
            Err(CacheError::TooBig { .. }) => {}
            other => panic!("expected TooBig, got {other:?}"),
        }
        assert_eq!(cache.counters().stored_pages, 0);
        assert_eq!(cache.counters().reject_compress_poor, 1);
    }

    #[test]
    fn pool_full_triggers_flush_and_admits_new_entry() {
        // Ceiling of exactly one page's worth of frames; storing a second page must evict the
        // first via the flush engine.
        let cache = test_cache(100, 1);
        cache.init_store(0);

        let page0 = vec![0x11u8; PAGE_SIZE];
        cache.store(0, 0, &page0).unwrap();

        let page1 = vec![0x22u8; PAGE_SIZE];
        cache.store(0, 1, &page1).unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        assert_eq!(cache.load(0, 0, &mut buf), Err(NotFound));
        cache.load(0, 1, &mut buf).unwrap();
        assert_eq!(buf, page1);
        assert!(cache.counters().flushed_pages >= 1);
    }

    #[test]
    fn invalidate_store_frees_everything() {
        let cache = test_cache(100, 1 << 20);
        cache.init_store(0);
        for offset in 0..8 {
            let page = vec![offset as u8; PAGE_SIZE];
            cache.store(0, offset, &page).unwrap();
        }
        assert_eq!(cache.counters().stored_pages, 8);

        cache.invalidate_store(0);
        assert_eq!(cache.counters().stored_pages, 0);
        assert_eq!(cache.counters().pool_pages, 0);

        let mut buf = vec![0u8; PAGE_SIZE];
        assert_eq!(cache.load(0, 3, &mut buf), Err(NotFound));
    }
}
