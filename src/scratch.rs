//! Scratch-buffer pool.
//!
//! Two disjoint facilities:
//!
//! - a per-execution-context output buffer, acquired by pinning the caller to its context before
//!   compression runs (modeled here with a thread-local cell, the closest safe-Rust analogue to
//!   pinning a caller to its execution context outside an actual kernel scheduler);
//! - a small shared pool of temporary pages, used when a `store` must evict before it can finish.

use std::cell::RefCell;

use parking_lot::Mutex;

/// One dual-page-sized scratch buffer, sized to hold worst-case compressor output for a single
/// page.
pub fn scratch_capacity(page_size: usize) -> usize {
    page_size * 2
}

thread_local! {
    static OUTPUT_BUFFER: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

/// Acquires this execution context's output buffer, sized for `page_size`, and hands a mutable
/// slice of it to `f`. The buffer is released (logically, it stays thread-local for reuse) on
/// every exit path from `f`, including unwinding, since ownership never leaves the closure.
pub fn with_output_buffer<R>(page_size: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
    OUTPUT_BUFFER.with(|cell| {
        let mut buf = cell.borrow_mut();
        let capacity = scratch_capacity(page_size);
        if buf.len() < capacity {
            buf.resize(capacity, 0);
        }
        f(&mut buf[..capacity])
    })
}

/// A fixed-capacity LIFO of temporary pages, used when compressed bytes must survive a context
/// switch during eviction.
///
/// Uses the same LIFO discipline as a Treiber free-stack, implemented here with a plain locked
/// `Vec` since the store lock already bounds contention on this path.
pub struct TempPagePool {
    pages: Mutex<Vec<Box<[u8]>>>,
    page_size: usize,
}

impl TempPagePool {
    pub fn new(capacity: usize, page_size: usize) -> Self {
        let pages = (0..capacity)
            .map(|_| vec![0u8; scratch_capacity(page_size)].into_boxed_slice())
            .collect();
        TempPagePool {
            pages: Mutex::new(pages),
            page_size,
        }
    }

    /// Borrows one temp page, if any are free. The caller must return it via [`release`].
    pub fn acquire(&self) -> Option<Box<[u8]>> {
        self.pages.lock().pop()
    }

    /// Returns a temp page to the pool. Callers must only return pages obtained from
    /// [`acquire`](Self::acquire) on this same pool.
    pub fn release(&self, mut page: Box<[u8]>) {
        for byte in page.iter_mut() {
            *byte = 0;
        }
        self.pages.lock().push(page);
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}
