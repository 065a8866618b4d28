//! Per-store tree: the offset-indexed ordered map plus its LRU ordering, both behind one lock.
//!
//! A single per-store lock is sufficient and simpler than finer-grained schemes, since every
//! expensive operation (compression, pool I/O, writeback submission) happens outside it. The LRU
//! ordering itself is modeled as a second `BTreeMap`, keyed by a monotonically increasing recency
//! sequence number, rather than a hand-rolled intrusive linked list, which keeps the implementation
//! in safe Rust with no unsafe cells.
//!
//! Every method here that touches `refcount` also holds the store lock across the decision that
//! depends on it (destroy vs. keep vs. re-splice), so the lock really is guarding the refcount,
//! even though the counter itself is stored as an atomic for convenience of sharing through
//! `Arc<Entry>`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::Entry;
use crate::pool::{Pool, SlabPool};

struct StoreInner {
    tree: BTreeMap<u64, Arc<Entry>>,
    /// Recency order: sequence number -> offset. The smallest key is the LRU head.
    lru: BTreeMap<u64, u64>,
    next_seq: u64,
}

pub struct Store<S: SlabPool> {
    pub store_id: u32,
    inner: Mutex<StoreInner>,
    pub pool: Arc<Pool<S>>,
}

/// Outcome of [`Store::insert_replacing`].
pub enum Replace {
    /// No entry previously occupied this offset.
    Fresh,
    /// An entry was replaced; it is still referenced elsewhere (e.g. an in-flight flush), so its
    /// destruction is deferred to whichever operation drops the last reference.
    DuplicateDeferred,
    /// An entry was replaced and its refcount hit zero; the caller must destroy it (free its pool
    /// object and update counters) outside the lock.
    DuplicateDestroy(Arc<Entry>),
}

/// Outcome of [`Store::return_after_borrow`].
pub enum BorrowReturn {
    /// The entry is still live and back at the LRU tail.
    Resident,
    /// The entry is still live but no longer reachable from the tree (a concurrent invalidate or
    /// duplicate-store collision removed it while it was borrowed), so there is nothing to splice.
    StillReferenced,
    /// Refcount hit zero; the caller must destroy the entry.
    Destroy(Arc<Entry>),
}

/// Outcome of [`Store::invalidate`].
pub enum Invalidate {
    /// No entry was present at this offset (a concurrent flush may have already removed it).
    Absent,
    /// The entry was detached but remains referenced by an in-flight operation.
    Deferred,
    /// The caller must destroy the entry.
    Destroy(Arc<Entry>),
}

/// Outcome of [`Store::finalize_flush_write`].
pub enum FlushFinalize {
    /// A concurrent `load` still holds a reference; it will finalize destruction itself.
    StillBorrowed,
    /// The caller must destroy the entry: the write succeeded and nothing else references it.
    Destroy(Arc<Entry>),
}

impl<S: SlabPool> Store<S> {
    pub fn new(store_id: u32, pool: Arc<Pool<S>>) -> Self {
        Store {
            store_id,
            inner: Mutex::new(StoreInner {
                tree: BTreeMap::new(),
                lru: BTreeMap::new(),
                next_seq: 0,
            }),
            pool,
        }
    }

    /// Looks up `offset` without affecting refcount or LRU position.
    pub fn search(&self, offset: u64) -> Option<Arc<Entry>> {
        self.inner.lock().tree.get(&offset).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn splice_to_tail_locked(inner: &mut StoreInner, entry: &Arc<Entry>) {
        if let Some(old_seq) = entry.recency_seq() {
            inner.lru.remove(&old_seq);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.lru.insert(seq, entry.offset);
        entry.set_recency_seq(Some(seq));
    }

    fn unlink_lru_locked(inner: &mut StoreInner, entry: &Arc<Entry>) {
        if let Some(seq) = entry.recency_seq() {
            inner.lru.remove(&seq);
            entry.set_recency_seq(None);
        }
    }

    /// Inserts `new_entry`, replacing whatever previously occupied its offset. This is the single
    /// atomic resolution of the duplicate-key collision: the old entry (if any) is unlinked from
    /// the tree and LRU and has its refcount dropped in the same critical section as the new
    /// entry's insertion, so no other operation can observe a half-replaced slot.
    pub fn insert_replacing(&self, new_entry: Arc<Entry>) -> Replace {
        let mut inner = self.inner.lock();
        let offset = new_entry.offset;
        let outcome = if let Some(old_entry) = inner.tree.remove(&offset) {
            Self::unlink_lru_locked(&mut inner, &old_entry);
            if old_entry.decref() == 0 {
                Replace::DuplicateDestroy(old_entry)
            } else {
                Replace::DuplicateDeferred
            }
        } else {
            Replace::Fresh
        };
        inner.tree.insert(offset, new_entry.clone());
        Self::splice_to_tail_locked(&mut inner, &new_entry);
        outcome
    }

    /// Borrows the entry at `offset` for a `load`: increments its refcount and detaches it from
    /// the LRU ordering (it stays in the tree so concurrent lookups still find it, but it is not a
    /// flush candidate while borrowed).
    pub fn borrow_for_load(&self, offset: u64) -> Option<Arc<Entry>> {
        let mut inner = self.inner.lock();
        let entry = inner.tree.get(&offset)?.clone();
        entry.incref();
        Self::unlink_lru_locked(&mut inner, &entry);
        Some(entry)
    }

    /// Completes a `load`'s borrow: decrements the refcount and either re-splices the entry to the
    /// LRU tail (still resident), leaves it alone (still referenced but no longer in the tree), or
    /// hands it back for destruction.
    pub fn return_after_borrow(&self, entry: Arc<Entry>) -> BorrowReturn {
        let mut inner = self.inner.lock();
        if entry.decref() == 0 {
            return BorrowReturn::Destroy(entry);
        }
        let still_in_tree = inner
            .tree
            .get(&entry.offset)
            .is_some_and(|e| Arc::ptr_eq(e, &entry));
        if still_in_tree {
            Self::splice_to_tail_locked(&mut inner, &entry);
            BorrowReturn::Resident
        } else {
            BorrowReturn::StillReferenced
        }
    }

    /// Detaches and decrements the entry at `offset`, per `invalidate_page`.
    pub fn invalidate(&self, offset: u64) -> Invalidate {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.tree.remove(&offset) else {
            return Invalidate::Absent;
        };
        Self::unlink_lru_locked(&mut inner, &entry);
        if entry.decref() == 0 {
            Invalidate::Destroy(entry)
        } else {
            Invalidate::Deferred
        }
    }

    /// Detaches and increments the refcount of the LRU head, handing it to the flush engine. The
    /// entry remains in the tree (still lookupable by `load`/`invalidate`) but leaves the LRU
    /// ordering for the duration of the flush attempt.
    pub fn pop_lru_head_for_flush(&self) -> Option<Arc<Entry>> {
        let mut inner = self.inner.lock();
        let (&seq, &offset) = inner.lru.iter().next()?;
        inner.lru.remove(&seq);
        let entry = inner.tree.get(&offset)?.clone();
        entry.set_recency_seq(None);
        entry.incref();
        Some(entry)
    }

    /// The host's backing-store slot for `(store_id, offset)` was already claimed by another
    /// actor; the flush engine abandons this victim. Decrements the flush's own reference; if that
    /// was the last one, destroys the entry, otherwise restores it to the LRU tail (it is still
    /// fully resident, just not written back this round). Only touches the tree/LRU if this entry
    /// is still the one actually occupying its offset: a concurrent duplicate `store` may already
    /// have detached it and spliced in a new entry at the same offset, in which case this must be
    /// a no-op on the tree.
    pub fn abandon_flush(&self, entry: Arc<Entry>) -> FlushFinalize {
        let mut inner = self.inner.lock();
        let still_in_tree = inner
            .tree
            .get(&entry.offset)
            .is_some_and(|e| Arc::ptr_eq(e, &entry));
        if entry.decref() == 0 {
            if still_in_tree {
                inner.tree.remove(&entry.offset);
            }
            return FlushFinalize::Destroy(entry);
        }
        if still_in_tree {
            Self::splice_to_tail_locked(&mut inner, &entry);
        }
        FlushFinalize::StillBorrowed
    }

    /// The writeback was submitted; the flush engine now relinquishes its own reference. If a
    /// concurrent `load` still holds one (refcount resolves to >1 after this decrement), that load
    /// will finalize destruction itself. Otherwise the entry is removed from the tree, if it is
    /// still the occupant of its offset, and returned for destruction. A concurrent duplicate
    /// `store` may have already detached this entry and spliced in a new one at the same offset;
    /// removing unconditionally would delete that new entry instead of being a no-op.
    pub fn finalize_flush_write(&self, entry: Arc<Entry>) -> FlushFinalize {
        let mut inner = self.inner.lock();
        if entry.decref() > 1 {
            FlushFinalize::StillBorrowed
        } else {
            let still_in_tree = inner
                .tree
                .get(&entry.offset)
                .is_some_and(|e| Arc::ptr_eq(e, &entry));
            if still_in_tree {
                inner.tree.remove(&entry.offset);
            }
            FlushFinalize::Destroy(entry)
        }
    }

    /// Detaches every entry from the tree and LRU ordering, returning them so the caller can free
    /// their pool objects outside the lock. Used by `invalidate_store`, which is allowed to skip
    /// per-entry rebalancing since the whole tree is discarded at once.
    pub fn drain_all(&self) -> Vec<Arc<Entry>> {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        let entries: Vec<_> = inner.tree.values().cloned().collect();
        inner.tree.clear();
        for entry in &entries {
            entry.set_recency_seq(None);
        }
        entries
    }
}
