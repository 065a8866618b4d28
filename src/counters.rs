//! Diagnostic counters.
//!
//! The counters sink itself (wherever the host surfaces these for `/proc`-style inspection or a
//! metrics exporter) is an external collaborator. This module only owns the flat namespace of
//! atomics and a cheap way to snapshot them.

use std::sync::atomic::{AtomicU64, Ordering};

const ORDERING: Ordering = Ordering::Relaxed;

/// All counters are monotonically increasing except `pool_pages` and `outstanding_flushes`, which
/// track live state and can go back down.
#[derive(Default, Debug)]
pub struct Counters {
    pub pool_pages: AtomicU64,
    pub stored_pages: AtomicU64,
    pub outstanding_flushes: AtomicU64,
    pub pool_limit_hit: AtomicU64,
    pub reject_compress_poor: AtomicU64,
    pub reject_tmppage_fail: AtomicU64,
    pub reject_flush_fail: AtomicU64,
    pub reject_zsmalloc_fail: AtomicU64,
    pub reject_kmemcache_fail: AtomicU64,
    pub flushed_pages: AtomicU64,
    pub flush_attempted: AtomicU64,
    pub saved_by_flush: AtomicU64,
    pub duplicate_entry: AtomicU64,
}

/// A plain-data snapshot of [`Counters`], suitable for serializing out to the host's diagnostic
/// sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub pool_pages: u64,
    pub stored_pages: u64,
    pub outstanding_flushes: u64,
    pub pool_limit_hit: u64,
    pub reject_compress_poor: u64,
    pub reject_tmppage_fail: u64,
    pub reject_flush_fail: u64,
    pub reject_zsmalloc_fail: u64,
    pub reject_kmemcache_fail: u64,
    pub flushed_pages: u64,
    pub flush_attempted: u64,
    pub saved_by_flush: u64,
    pub duplicate_entry: u64,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            pool_pages: self.pool_pages.load(ORDERING),
            stored_pages: self.stored_pages.load(ORDERING),
            outstanding_flushes: self.outstanding_flushes.load(ORDERING),
            pool_limit_hit: self.pool_limit_hit.load(ORDERING),
            reject_compress_poor: self.reject_compress_poor.load(ORDERING),
            reject_tmppage_fail: self.reject_tmppage_fail.load(ORDERING),
            reject_flush_fail: self.reject_flush_fail.load(ORDERING),
            reject_zsmalloc_fail: self.reject_zsmalloc_fail.load(ORDERING),
            reject_kmemcache_fail: self.reject_kmemcache_fail.load(ORDERING),
            flushed_pages: self.flushed_pages.load(ORDERING),
            flush_attempted: self.flush_attempted.load(ORDERING),
            saved_by_flush: self.saved_by_flush.load(ORDERING),
            duplicate_entry: self.duplicate_entry.load(ORDERING),
        }
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, ORDERING);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, ORDERING);
    }

    pub(crate) fn sub(counter: &AtomicU64, n: u64) {
        counter.fetch_sub(n, ORDERING);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let counters = Counters::default();
        Counters::inc(&counters.duplicate_entry);
        Counters::add(&counters.pool_pages, 5);
        Counters::sub(&counters.pool_pages, 2);

        let snap = counters.snapshot();
        assert_eq!(snap.duplicate_entry, 1);
        assert_eq!(snap.pool_pages, 3);
    }
}
