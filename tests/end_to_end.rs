//! End-to-end scenarios driving the public `Cache` API the way a host paging layer would.

use std::sync::Arc;
use std::thread;

use rand::RngCore;
use slog::Logger;

use swapcache::backing::MemoryBackingStore;
use swapcache::cache::PAGE_SIZE;
use swapcache::pool::SlabBackend;
use swapcache::{Cache, CacheError, Config};

fn test_log() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

fn cache_with(config: Config) -> Cache<SlabBackend, MemoryBackingStore> {
    Cache::new(
        config,
        SlabBackend::new(PAGE_SIZE),
        Arc::new(MemoryBackingStore::new()),
        test_log(),
    )
    .unwrap()
}

fn roomy_cache() -> Cache<SlabBackend, MemoryBackingStore> {
    cache_with(Config {
        compressor: "lz4".to_owned(),
        max_pool_percent: 100,
        total_ram_pages: 1 << 20,
        ..Config::default()
    })
}

fn random_page() -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    rand::thread_rng().fill_bytes(&mut page);
    page
}

#[test]
fn register_store_load_invalidate() {
    let cache = roomy_cache();
    cache.init_store(3);

    let page = vec![0x42u8; PAGE_SIZE];
    cache.store(3, 10, &page).unwrap();

    let mut out = vec![0u8; PAGE_SIZE];
    cache.load(3, 10, &mut out).unwrap();
    assert_eq!(out, page);

    cache.invalidate_page(3, 10);
    assert!(cache.load(3, 10, &mut out).is_err());
}

#[test]
fn duplicate_store_counts_as_one_replacement() {
    let cache = roomy_cache();
    cache.init_store(0);

    let first = vec![0x11u8; PAGE_SIZE];
    let second = vec![0x22u8; PAGE_SIZE];
    cache.store(0, 0, &first).unwrap();
    cache.store(0, 0, &second).unwrap();

    let mut out = vec![0u8; PAGE_SIZE];
    cache.load(0, 0, &mut out).unwrap();
    assert_eq!(out, second);

    let counters = cache.counters();
    assert_eq!(counters.duplicate_entry, 1);
    assert_eq!(counters.stored_pages, 1);
}

#[test]
fn poor_compression_is_rejected_and_counted() {
    let cache = cache_with(Config {
        compressor: "lz4".to_owned(),
        max_pool_percent: 100,
        max_compression_ratio: 1,
        total_ram_pages: 1 << 20,
        ..Config::default()
    });
    cache.init_store(0);

    let noise = random_page();
    match cache.store(0, 0, &noise) {
        Err(CacheError::TooBig { .. }) => {}
        other => panic!("expected a too-big rejection, got {other:?}"),
    }
    assert_eq!(cache.counters().reject_compress_poor, 1);
    assert_eq!(cache.counters().stored_pages, 0);
}

#[test]
fn pool_pressure_evicts_lru_victim_via_flush() {
    // Ceiling admits exactly one compressed page's worth of frames.
    let cache = cache_with(Config {
        compressor: "lz4".to_owned(),
        max_pool_percent: 100,
        total_ram_pages: 1,
        ..Config::default()
    });
    cache.init_store(0);

    let oldest = vec![0x01u8; PAGE_SIZE];
    let newest = vec![0x02u8; PAGE_SIZE];
    cache.store(0, 0, &oldest).unwrap();
    cache.store(0, 1, &newest).unwrap();

    let mut out = vec![0u8; PAGE_SIZE];
    assert!(cache.load(0, 0, &mut out).is_err(), "oldest entry should have been flushed out");
    cache.load(0, 1, &mut out).unwrap();
    assert_eq!(out, newest);

    let counters = cache.counters();
    assert!(counters.flush_attempted >= 1);
    assert!(counters.flushed_pages >= 1);
    assert!(counters.saved_by_flush >= 1);
}

#[test]
fn invalidate_store_clears_every_entry() {
    let cache = roomy_cache();
    cache.init_store(1);
    for offset in 0..16u64 {
        let page = vec![offset as u8; PAGE_SIZE];
        cache.store(1, offset, &page).unwrap();
    }
    assert_eq!(cache.counters().stored_pages, 16);

    cache.invalidate_store(1);

    assert_eq!(cache.counters().stored_pages, 0);
    assert_eq!(cache.counters().pool_pages, 0);
    let mut out = vec![0u8; PAGE_SIZE];
    for offset in 0..16u64 {
        assert!(cache.load(1, offset, &mut out).is_err());
    }
}

/// A `load` racing a concurrent `invalidate_page` on the same offset must never panic, corrupt the
/// page buffer, or leak pool accounting, regardless of which wins.
#[test]
fn concurrent_load_and_invalidate_do_not_corrupt_state() {
    let cache = Arc::new(roomy_cache());
    cache.init_store(0);
    let page = vec![0x77u8; PAGE_SIZE];
    cache.store(0, 0, &page).unwrap();

    let mut joins = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let expected = page.clone();
        joins.push(thread::spawn(move || {
            let mut out = vec![0u8; PAGE_SIZE];
            if cache.load(0, 0, &mut out).is_ok() {
                assert_eq!(out, expected, "a successful load must never return garbage");
            }
        }));
    }
    joins.push(thread::spawn({
        let cache = cache.clone();
        move || cache.invalidate_page(0, 0)
    }));

    for join in joins {
        join.join().unwrap();
    }

    // Whichever way the race resolved, the entry is gone and accounting reflects exactly that.
    let mut out = vec![0u8; PAGE_SIZE];
    assert!(cache.load(0, 0, &mut out).is_err());
    assert_eq!(cache.counters().stored_pages, 0);
    assert_eq!(cache.counters().pool_pages, 0);
}

/// Many threads hammering distinct offsets on the same store concurrently.
#[test]
fn concurrent_store_across_many_offsets() {
    let cache = Arc::new(roomy_cache());
    cache.init_store(0);

    let mut joins = Vec::new();
    for t in 0..8u64 {
        let cache = cache.clone();
        joins.push(thread::spawn(move || {
            for i in t * 64..(t + 1) * 64 {
                let page = vec![(i % 256) as u8; PAGE_SIZE];
                cache.store(0, i, &page).unwrap();
            }
        }));
    }
    for join in joins {
        join.join().unwrap();
    }

    let mut out = vec![0u8; PAGE_SIZE];
    for i in 0..512u64 {
        cache.load(0, i, &mut out).unwrap();
        assert_eq!(out, vec![(i % 256) as u8; PAGE_SIZE]);
    }
    assert_eq!(cache.counters().stored_pages, 512);
}
