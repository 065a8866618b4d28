//! Error taxonomy for the cache.
//!
//! One `quick_error!`-generated enum, one variant per failure mode a `store` can report, each
//! carrying enough context (`store_id`/`offset`) to produce a useful `Display` message and log
//! line.

use quick_error::quick_error;

quick_error! {
    /// Everything that can go wrong while admitting, fetching, or evicting a page.
    #[derive(Debug)]
    pub enum CacheError {
        /// `store_id` has not been registered with `init_store`.
        NoDevice { store_id: u32 } {
            display("store {} is not registered", store_id)
        }
        /// The compressor returned an error while compressing the page.
        Invalid { store_id: u32, offset: u64 } {
            display("compressor failed on store {} offset {}", store_id, offset)
        }
        /// Compressed length exceeded `max_compression_ratio` of the page size.
        TooBig { store_id: u32, offset: u64, compressed_len: usize, limit: usize } {
            display(
                "compressed length {} exceeds limit {} on store {} offset {}",
                compressed_len, limit, store_id, offset,
            )
        }
        /// The shared temporary-page pool was empty when eviction needed one.
        NoMemoryTmpPage { store_id: u32, offset: u64 } {
            display("temp page pool exhausted on store {} offset {}", store_id, offset)
        }
        /// The compressed-object pool allocation failed even after a flush attempt.
        NoMemoryPool { store_id: u32, offset: u64 } {
            display("compressed object pool exhausted on store {} offset {}", store_id, offset)
        }
        /// The entry slab allocator could not produce a slot for the new entry.
        NoMemorySlab { store_id: u32, offset: u64 } {
            display("entry slab allocation failed on store {} offset {}", store_id, offset)
        }
    }
}

impl CacheError {
    /// Maps this error onto the small integer error-code space the `raw` adapter exposes to a host
    /// that expects a C-style calling convention (see `crate::raw`).
    pub fn code(&self) -> i32 {
        match self {
            CacheError::NoDevice { .. } => -1,
            CacheError::Invalid { .. } => -2,
            CacheError::TooBig { .. } => -3,
            CacheError::NoMemoryTmpPage { .. } => -4,
            CacheError::NoMemoryPool { .. } => -5,
            CacheError::NoMemorySlab { .. } => -6,
        }
    }
}
