//! The flush engine.
//!
//! Reclaims room by writing LRU victims out through the backing-store writer. Never blocks waiting
//! for writeback completion: backpressure is expressed by returning control to the `store` caller,
//! which sees the next pool allocation fail.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use slog::{debug, trace, Logger};

use crate::backing::{BackingStore, SlotResult};
use crate::compressor::Compressor;
use crate::counters::Counters;
use crate::entry::Entry;
use crate::store::{FlushFinalize, Store};
use crate::pool::SlabPool;

/// Default cap on writes in flight at once; the flush engine refuses to enqueue past this.
pub const MAX_OUTSTANDING_FLUSHES: u64 = 64;

pub struct FlushEngine<B: BackingStore> {
    backing: Arc<B>,
    counters: Arc<Counters>,
    log: Logger,
}

impl<B: BackingStore> FlushEngine<B> {
    pub fn new(backing: Arc<B>, counters: Arc<Counters>, log: Logger) -> Self {
        FlushEngine {
            backing,
            counters,
            log,
        }
    }

    /// Attempts to evict up to `max_victims` LRU-head entries from `store`, freeing their pool
    /// objects as each writeback is durably submitted. Returns the number of pages actually
    /// flushed synchronously with this call (writeback completion is asynchronous and is not
    /// waited on).
    pub fn flush_victims<S: SlabPool>(
        &self,
        store: &Store<S>,
        compressor: &dyn Compressor,
        page_size: usize,
        max_victims: usize,
    ) -> u64 {
        let mut flushed = 0;
        for _ in 0..max_victims {
            if self.counters.outstanding_flushes.load(Ordering::Relaxed) >= MAX_OUTSTANDING_FLUSHES
            {
                debug!(self.log, "flush engine at outstanding-write cap; stopping early");
                break;
            }
            let Some(entry) = store.pop_lru_head_for_flush() else {
                break;
            };
            if self.flush_one(store, &entry, compressor, page_size) {
                flushed += 1;
            }
        }
        flushed
    }

    /// Drives one victim through the per-entry writeback protocol. Returns whether a write was
    /// actually submitted for it (a write-collision abandon returns `false`).
    fn flush_one<S: SlabPool>(
        &self,
        store: &Store<S>,
        entry: &Arc<Entry>,
        compressor: &dyn Compressor,
        page_size: usize,
    ) -> bool {
        trace!(self.log, "attempting flush"; "store_id" => entry.store_id, "offset" => entry.offset);

        match self.backing.acquire_slot(entry.store_id, entry.offset) {
            SlotResult::AlreadyPresent => {
                trace!(
                    self.log, "victim already being reclaimed by another actor";
                    "store_id" => entry.store_id, "offset" => entry.offset
                );
                if let FlushFinalize::Destroy(destroyed) = store.abandon_flush(entry.clone()) {
                    self.destroy(store, &destroyed);
                }
                false
            }
            SlotResult::Fresh(mut page) => {
                page.resize(page_size, 0);
                let compressed = store.pool.read(entry.handle);
                if let Err(err) = compressor.decompress(&compressed, &mut page) {
                    // The backing device write is simply skipped and retried on a future flush
                    // pass; this never propagates as an error to a `store` caller.
                    debug!(
                        self.log, "decompression failed during flush, leaving entry resident";
                        "store_id" => entry.store_id, "offset" => entry.offset, "error" => format!("{err:?}")
                    );
                    if let FlushFinalize::Destroy(destroyed) = store.abandon_flush(entry.clone()) {
                        self.destroy(store, &destroyed);
                    }
                    return false;
                }

                Counters::inc(&self.counters.outstanding_flushes);
                let counters = self.counters.clone();
                let completion_log = self.log.clone();
                let store_id = entry.store_id;
                let offset = entry.offset;
                self.backing.submit_write(
                    store_id,
                    offset,
                    page,
                    Box::new(move |result| {
                        Counters::sub(&counters.outstanding_flushes, 1);
                        match result {
                            Ok(()) => {
                                Counters::inc(&counters.flushed_pages);
                            }
                            Err(_) => {
                                Counters::inc(&counters.reject_flush_fail);
                                debug!(completion_log, "writeback failed"; "store_id" => store_id, "offset" => offset);
                            }
                        }
                    }),
                );

                match store.finalize_flush_write(entry.clone()) {
                    FlushFinalize::StillBorrowed => {
                        trace!(
                            self.log, "concurrent load outlives flush, deferring destruction";
                            "store_id" => entry.store_id, "offset" => entry.offset
                        );
                    }
                    FlushFinalize::Destroy(destroyed) => self.destroy(store, &destroyed),
                }
                true
            }
        }
    }

    fn destroy<S: SlabPool>(&self, store: &Store<S>, entry: &Arc<Entry>) {
        store.pool.free(entry.handle, entry.frames, &self.counters);
        Counters::sub(&self.counters.stored_pages, 1);
        trace!(self.log, "entry destroyed"; "store_id" => entry.store_id, "offset" => entry.offset);
    }
}
