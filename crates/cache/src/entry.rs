//! Cache entries
//!
//! An [`Entry`] binds a key to its current [`Cell`]. The cell slot is only
//! ever replaced as a whole, so readers observe either the old or the new
//! cell. Loads of one entry are serialized by a per-entry lock; the first
//! loader swaps in the valid cell and later loaders find it valid.
//!
//! Entries are owned by whoever holds an `Arc<Entry>`: consumers through a
//! [`CellRef`](crate::CellRef) and the cache through its retention list.
//! The entry table only holds a `Weak`. When the last owner goes away the
//! entry removes its own slot from the table.

use crate::table::EntryTable;
use crate::{CacheKey, Cell};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub(crate) struct Entry<A> {
    key: CacheKey,
    slot: RwLock<Arc<Cell<A>>>,
    load_lock: Mutex<()>,
    /// Last frame in which the key was put on a fetch queue, 0 for never
    enqueue_frame: AtomicU64,
    /// Estimated size of the loaded cell
    bytes: u64,
    table: Weak<EntryTable<A>>,
}

impl<A> Entry<A> {
    pub(crate) fn new(
        key: CacheKey,
        placeholder: Cell<A>,
        bytes: u64,
        table: Weak<EntryTable<A>>,
    ) -> Self {
        Self {
            key,
            slot: RwLock::new(Arc::new(placeholder)),
            load_lock: Mutex::new(()),
            enqueue_frame: AtomicU64::new(0),
            bytes,
            table,
        }
    }

    pub(crate) fn key(&self) -> CacheKey {
        self.key
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The current cell
    pub(crate) fn cell(&self) -> Arc<Cell<A>> {
        self.slot.read().clone()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.slot.read().is_valid()
    }

    /// Replace the cell
    pub(crate) fn swap(&self, cell: Arc<Cell<A>>) -> Arc<Cell<A>> {
        std::mem::replace(&mut *self.slot.write(), cell)
    }

    /// Serialize loads of this entry
    pub(crate) fn lock_for_load(&self) -> MutexGuard<'_, ()> {
        self.load_lock.lock()
    }

    /// Record that the key is being enqueued in `frame`
    ///
    /// Returns `false` if it already was enqueued in this frame (or a later
    /// one).
    pub(crate) fn mark_enqueued(&self, frame: u64) -> bool {
        self.enqueue_frame.fetch_max(frame, Ordering::AcqRel) < frame
    }
}

impl<A> Drop for Entry<A> {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.remove_reclaimed(&self.key);
        }
    }
}
