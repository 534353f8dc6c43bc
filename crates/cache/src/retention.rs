//! Soft retention of recently used entries
//!
//! The entry table holds entries weakly, so without another owner an entry
//! would be reclaimed as soon as the last consumer let go of it, taking its
//! loaded data or its pending fetch with it. The retention list keeps strong
//! handles to recently requested entries, with least recently used eviction
//! once the estimated size of their loaded data exceeds a byte limit.

use crate::entry::Entry;
use crate::CacheKey;
use lru::LruCache;
use std::sync::Arc;

pub(crate) struct Retention<A> {
    entries: LruCache<CacheKey, Arc<Entry<A>>>,
    bytes: u64,
    limit: u64,
    evictions: u64,
}

impl<A> Retention<A> {
    pub(crate) fn new(limit: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            limit,
            evictions: 0,
        }
    }

    /// Retain `entry`, or mark it most recently used if already retained
    ///
    /// Returns the entries evicted to stay within the limit. The caller must
    /// drop them after releasing the lock guarding this list.
    #[must_use]
    pub(crate) fn retain(&mut self, entry: &Arc<Entry<A>>) -> Vec<Arc<Entry<A>>> {
        if self.entries.get(&entry.key()).is_some() {
            return Vec::new();
        }
        self.bytes += entry.bytes();
        self.entries.put(entry.key(), entry.clone());
        self.shrink_to(self.limit)
    }

    /// Mark `key` most recently used if it is retained
    pub(crate) fn touch(&mut self, key: &CacheKey) -> bool {
        self.entries.get(key).is_some()
    }

    /// Change the byte limit, returning any entries evicted as a result
    #[must_use]
    pub(crate) fn set_limit(&mut self, limit: u64) -> Vec<Arc<Entry<A>>> {
        self.limit = limit;
        self.shrink_to(limit)
    }

    /// Release all retained entries
    #[must_use]
    pub(crate) fn clear(&mut self) -> Vec<Arc<Entry<A>>> {
        self.bytes = 0;
        let mut released = Vec::with_capacity(self.entries.len());
        while let Some((_, entry)) = self.entries.pop_lru() {
            released.push(entry);
        }
        released
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }

    pub(crate) fn limit(&self) -> u64 {
        self.limit
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.evictions
    }

    fn shrink_to(&mut self, limit: u64) -> Vec<Arc<Entry<A>>> {
        let mut evicted = Vec::new();
        while self.bytes > limit {
            let Some((_, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.bytes = self.bytes.saturating_sub(entry.bytes());
            self.evictions += 1;
            evicted.push(entry);
        }
        if !evicted.is_empty() {
            tracing::debug!(
                evicted = evicted.len(),
                retained = self.entries.len(),
                bytes = self.bytes,
                "retention evicted entries"
            );
        }
        evicted
    }
}
