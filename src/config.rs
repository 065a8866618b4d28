//! Boot-time configuration and runtime-mutable tunables.
//!
//! The boot-time configuration *loader* is an external collaborator. The host decides whether that
//! means a config file, a sysfs-style knob, or a command line flag. This module only owns the shape
//! of the data once loaded, separate from the atomics the rest of the crate actually consults at
//! runtime.

use std::sync::atomic::{AtomicU8, AtomicBool, Ordering};

use serde::Deserialize;

/// Boot-time configuration, as read once by the host's configuration loader.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// If `false`, the cache does not register with the host at all.
    pub enabled: bool,
    /// Name of the compression algorithm to pin per execution context.
    pub compressor: String,
    /// Ceiling on the fraction of total RAM the compressed pool may consume, as a percentage.
    pub max_pool_percent: u8,
    /// Reject any page whose compressed/original ratio exceeds this percentage.
    pub max_compression_ratio: u8,
    /// Total pages of RAM on the host, used to translate `max_pool_percent` into a page ceiling.
    pub total_ram_pages: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: true,
            compressor: "lzo".to_owned(),
            max_pool_percent: 20,
            max_compression_ratio: 80,
            total_ram_pages: 1 << 20,
        }
    }
}

/// The runtime-mutable half of the configuration: `max_pool_percent` and `max_compression_ratio`
/// can be adjusted from an administrative thread while stores are actively being served, so they
/// live behind atomics rather than the per-store lock.
#[derive(Debug)]
pub struct Tunables {
    enabled: AtomicBool,
    max_pool_percent: AtomicU8,
    max_compression_ratio: AtomicU8,
    total_ram_pages: u64,
}

impl Tunables {
    pub fn new(config: &Config) -> Self {
        Tunables {
            enabled: AtomicBool::new(config.enabled),
            max_pool_percent: AtomicU8::new(config.max_pool_percent.min(100)),
            max_compression_ratio: AtomicU8::new(config.max_compression_ratio.min(100)),
            total_ram_pages: config.total_ram_pages,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn max_pool_percent(&self) -> u8 {
        self.max_pool_percent.load(Ordering::Relaxed)
    }

    pub fn set_max_pool_percent(&self, value: u8) {
        self.max_pool_percent.store(value.min(100), Ordering::Relaxed);
    }

    pub fn max_compression_ratio(&self) -> u8 {
        self.max_compression_ratio.load(Ordering::Relaxed)
    }

    pub fn set_max_compression_ratio(&self, value: u8) {
        self.max_compression_ratio.store(value.min(100), Ordering::Relaxed);
    }

    /// The ceiling on pool pages, derived from the current `max_pool_percent` and the host's total
    /// RAM. Recomputed on every admission check since the percent is runtime-mutable.
    pub fn pool_page_ceiling(&self) -> u64 {
        let percent = u64::from(self.max_pool_percent());
        (percent * self.total_ram_pages).div_ceil(100)
    }

    /// The maximum number of compressed bytes admitted for one page, given `page_size`.
    pub fn compression_limit(&self, page_size: usize) -> usize {
        let ratio = usize::from(self.max_compression_ratio());
        (page_size * ratio) / 100
    }
}
