//! Entry table
//!
//! Maps keys to weakly held entries. Lookups and inserts of different keys
//! proceed concurrently; an insert only takes the write lock when the key
//! has no live entry.
//!
//! Lock order: the table lock is always the innermost lock. Dropping the
//! last `Arc<Entry>` re-enters the table from `Entry::drop`, so no code path
//! may release an entry while holding the table lock.

use crate::entry::Entry;
use crate::{CacheKey, Cell};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub(crate) struct EntryTable<A> {
    entries: RwLock<HashMap<CacheKey, Weak<Entry<A>>>>,
}

impl<A> EntryTable<A> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Live entry for `key`, if any
    pub(crate) fn get(&self, key: &CacheKey) -> Option<Arc<Entry<A>>> {
        self.entries.read().get(key).and_then(Weak::upgrade)
    }

    /// Live entry for `key`, inserting one built from `placeholder` if absent
    ///
    /// Returns the entry and whether it was created by this call.
    /// `placeholder` runs under the table's write lock and must be cheap.
    pub(crate) fn get_or_insert_with(
        self: &Arc<Self>,
        key: CacheKey,
        bytes: u64,
        placeholder: impl FnOnce() -> Cell<A>,
    ) -> (Arc<Entry<A>>, bool) {
        if let Some(entry) = self.get(&key) {
            return (entry, false);
        }

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(&key).and_then(Weak::upgrade) {
            return (entry, false);
        }

        let entry = Arc::new(Entry::new(
            key,
            placeholder(),
            bytes,
            Arc::downgrade(self),
        ));
        entries.insert(key, Arc::downgrade(&entry));
        (entry, true)
    }

    /// Remove the slot of a reclaimed entry
    ///
    /// The slot is left alone if it has been taken over by a newer entry.
    pub(crate) fn remove_reclaimed(&self, key: &CacheKey) {
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|weak| weak.strong_count() == 0) {
            entries.remove(key);
        }
    }

    pub(crate) fn contains_key(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Keys of all live entries, sorted
    pub(crate) fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .read()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Strong handles to all live entries
    ///
    /// The caller must drop the returned handles without holding the table
    /// lock, which is guaranteed here because the lock is released on return.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Entry<A>>> {
        self.entries
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CellLayout;
    use std::thread;

    fn placeholder() -> Cell<Vec<u8>> {
        Cell::placeholder(CellLayout::new([1, 1, 1], [0, 0, 0]), vec![0])
    }

    fn key(cell: u64) -> CacheKey {
        CacheKey::new(0, 0, 0, cell)
    }

    #[test]
    fn test_insert_and_get() {
        let table = EntryTable::new();
        assert!(table.get(&key(1)).is_none());

        let (entry, created) = table.get_or_insert_with(key(1), 1, placeholder);
        assert!(created);
        assert_eq!(entry.key(), key(1));

        let (again, created) = table.get_or_insert_with(key(1), 1, || unreachable!());
        assert!(!created);
        assert!(Arc::ptr_eq(&entry, &again));
        assert!(Arc::ptr_eq(&entry, &table.get(&key(1)).unwrap()));
    }

    #[test]
    fn test_dropping_last_owner_removes_slot() {
        let table = EntryTable::new();
        let (entry, _) = table.get_or_insert_with(key(1), 1, placeholder);
        let second = entry.clone();
        assert_eq!(table.keys().len(), 1);

        drop(entry);
        assert!(table.contains_key(&key(1)));

        drop(second);
        assert!(table.entries.read().is_empty());
        assert!(table.get(&key(1)).is_none());
    }

    #[test]
    fn test_reinserted_key_survives_old_drop() {
        let table = EntryTable::new();
        let (old, _) = table.get_or_insert_with(key(1), 1, placeholder);
        let weak_old = Arc::downgrade(&old);
        drop(old);
        assert!(weak_old.upgrade().is_none());

        let (new, created) = table.get_or_insert_with(key(1), 1, placeholder);
        assert!(created);

        // A stale removal must not evict the replacement.
        table.remove_reclaimed(&key(1));
        assert!(Arc::ptr_eq(&new, &table.get(&key(1)).unwrap()));
    }

    #[test]
    fn test_keys_and_snapshot() {
        let table = EntryTable::new();
        let held: Vec<_> = [3, 1, 2]
            .into_iter()
            .map(|c| table.get_or_insert_with(key(c), 1, placeholder).0)
            .collect();

        assert_eq!(table.keys(), vec![key(1), key(2), key(3)]);
        assert_eq!(table.snapshot().len(), 3);
        drop(held);
        assert!(table.keys().is_empty());
    }

    #[test]
    fn test_concurrent_inserts_create_one_entry() {
        let table = EntryTable::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || table.get_or_insert_with(key(7), 1, placeholder))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
        for (entry, _) in &results {
            assert!(Arc::ptr_eq(entry, &results[0].0));
        }
    }
}
