//! The cell cache
//!
//! [`CellCache`] ties the entry table, the retention list, the fetch queues
//! and the fetcher threads together and implements the loading strategies.
//!
//! Lock order, outermost first: entry load lock, retention list, entry
//! table. The table lock is never held while an entry is released.

use crate::entry::Entry;
use crate::loader::cell_bytes;
use crate::retention::Retention;
use crate::stats::Counters;
use crate::table::EntryTable;
use crate::{
    CacheArrayLoader, CacheConfig, CacheError, CacheHints, CacheKey, CacheStats, Cell, CellLayout,
    LoadingStrategy,
};
use parking_lot::Mutex;
use pyramid_scheduler::{
    duration_to_nanos, Fetch, FetchQueues, FetcherThreads, QueueStats, ThreadGroup,
};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cell handed out by the cache
///
/// Holds the cell as it was when the request was served and keeps the
/// cache entry alive, so a background load that completes later is not
/// thrown away. Dereferences to the [`Cell`].
pub struct CellRef<A> {
    entry: Arc<Entry<A>>,
    cell: Arc<Cell<A>>,
}

impl<A> CellRef<A> {
    fn new(entry: Arc<Entry<A>>, cell: Arc<Cell<A>>) -> Self {
        Self { entry, cell }
    }

    fn current(entry: Arc<Entry<A>>) -> Self {
        let cell = entry.cell();
        Self { entry, cell }
    }

    pub fn key(&self) -> CacheKey {
        self.entry.key()
    }

    /// The cell as served
    pub fn cell(&self) -> &Arc<Cell<A>> {
        &self.cell
    }

    /// The entry's cell right now, which may have been loaded since
    pub fn latest(&self) -> Arc<Cell<A>> {
        self.entry.cell()
    }
}

impl<A> Deref for CellRef<A> {
    type Target = Cell<A>;

    fn deref(&self) -> &Cell<A> {
        &self.cell
    }
}

impl<A> Clone for CellRef<A> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<A> fmt::Debug for CellRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellRef")
            .field("key", &self.key())
            .field("cell", &self.cell)
            .finish()
    }
}

/// State shared between the cache handle and the fetcher threads
struct Shared<L: CacheArrayLoader> {
    loader: L,
    table: Arc<EntryTable<L::Array>>,
    retention: Mutex<Retention<L::Array>>,
    queues: Arc<FetchQueues<CacheKey>>,
    frame: AtomicU64,
    default_group: ThreadGroup,
    fetcher_group: ThreadGroup,
    counters: Counters,
}

impl<L: CacheArrayLoader> Shared<L> {
    fn group(&self) -> ThreadGroup {
        ThreadGroup::current_or(&self.default_group)
    }

    fn entry(&self, key: CacheKey, layout: &CellLayout) -> Arc<Entry<L::Array>> {
        let bytes = cell_bytes(&self.loader, layout);
        let (entry, created) = self.table.get_or_insert_with(key, bytes, || {
            Cell::placeholder(*layout, self.loader.empty_array(layout))
        });
        if created {
            tracing::trace!(key = %key, "placeholder created");
        }
        self.retain(&entry);
        entry
    }

    fn retain(&self, entry: &Arc<Entry<L::Array>>) {
        let evicted = self.retention.lock().retain(entry);
        drop(evicted);
    }

    fn touch(&self, key: &CacheKey) {
        self.retention.lock().touch(key);
    }

    /// Count a request and report whether `cell` is loaded
    fn record_request(&self, cell: &Cell<L::Array>) -> bool {
        if cell.is_valid() {
            Counters::bump(&self.counters.hits);
            true
        } else {
            Counters::bump(&self.counters.misses);
            false
        }
    }

    /// Load `entry` unless it is valid
    ///
    /// Concurrent callers for one entry are serialized. The first one reads
    /// storage and swaps in the loaded cell; the others find it valid and
    /// return it without touching storage. After a failed read the entry
    /// stays invalid and the next caller tries again.
    fn load(&self, entry: &Arc<Entry<L::Array>>) -> Result<Arc<Cell<L::Array>>, CacheError> {
        let current = entry.cell();
        if current.is_valid() {
            return Ok(current);
        }

        let loading = entry.lock_for_load();
        let current = entry.cell();
        if current.is_valid() {
            return Ok(current);
        }

        let key = entry.key();
        let layout = *current.layout();
        let group = self.group();
        let stats = group.statistics();

        let timer = stats.start();
        let result = self
            .loader
            .load_array(key.timepoint(), key.setup(), key.level(), &layout);
        let elapsed = timer.stop();

        match result {
            Ok(array) => {
                stats.add_io_bytes(entry.bytes());
                let cell = Arc::new(Cell::valid(layout, array));
                entry.swap(cell.clone());
                drop(loading);

                Counters::bump(&self.counters.loads);
                tracing::debug!(key = %key, group = group.name(), ?elapsed, "cell loaded");
                Ok(cell)
            }
            Err(error) => {
                Counters::bump(&self.counters.load_failures);
                Err(CacheError::from_load(key, error))
            }
        }
    }

    /// Put `entry` on the fetch queue for `hints.priority`
    fn enqueue(&self, entry: &Entry<L::Array>, hints: &CacheHints) {
        let frame = self.frame.load(Ordering::Acquire);
        let first_this_frame = entry.mark_enqueued(frame);
        if hints.update_once && !first_this_frame {
            return;
        }
        self.queues.put(entry.key(), hints.priority, true);
        Counters::bump(&self.counters.enqueued);
        tracing::trace!(key = %entry.key(), priority = hints.priority, "cell enqueued");
    }
}

impl<L: CacheArrayLoader> Fetch<CacheKey> for Shared<L> {
    type Error = CacheError;

    fn fetch(&self, key: &CacheKey) -> Result<(), CacheError> {
        let Some(entry) = self.table.get(key) else {
            tracing::trace!(key = %key, "queued cell was reclaimed");
            return Ok(());
        };
        if entry.is_valid() {
            return Ok(());
        }
        self.load(&entry).map(drop)
    }

    fn on_worker_start(&self, _worker: usize) {
        self.fetcher_group.join_current_thread();
    }
}

/// Multi-resolution cell cache with background loading
///
/// Dropping the cache stops the fetcher threads after their current load.
///
/// # Example
///
/// ```
/// use pyramid_cache::{
///     CacheArrayLoader, CacheConfig, CacheHints, CacheKey, CellCache, CellLayout, LoadError,
/// };
///
/// struct Zeros;
///
/// impl CacheArrayLoader for Zeros {
///     type Array = Vec<u8>;
///
///     fn load_array(&self, _t: u32, _s: u32, _l: u8, layout: &CellLayout) -> Result<Vec<u8>, LoadError> {
///         Ok(vec![1; layout.num_elements() as usize])
///     }
///
///     fn empty_array(&self, layout: &CellLayout) -> Vec<u8> {
///         vec![0; layout.num_elements() as usize]
///     }
///
///     fn bytes_per_element(&self) -> usize {
///         1
///     }
/// }
///
/// let cache = CellCache::new(Zeros, &CacheConfig::without_fetchers()).unwrap();
/// let key = CacheKey::new(0, 0, 0, 0);
/// let layout = CellLayout::new([4, 4, 4], [0, 0, 0]);
///
/// let cell = cache.get_with_hints(key, &layout, &CacheHints::blocking()).unwrap().unwrap();
/// assert!(cell.is_valid());
/// assert_eq!(cell.data()[0], 1);
/// ```
pub struct CellCache<L: CacheArrayLoader> {
    shared: Arc<Shared<L>>,
    fetchers: FetcherThreads,
}

impl<L: CacheArrayLoader> CellCache<L> {
    /// Create a cache and start its fetcher threads
    ///
    /// # Errors
    /// Fails if `config` is invalid or a fetcher thread cannot be spawned.
    pub fn new(loader: L, config: &CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            loader,
            table: EntryTable::new(),
            retention: Mutex::new(Retention::new(config.retention_bytes())),
            queues: Arc::new(FetchQueues::new(
                config.num_priorities,
                config.prefetch_capacity,
            )),
            frame: AtomicU64::new(1),
            default_group: ThreadGroup::new("default", config.num_priorities),
            fetcher_group: ThreadGroup::new("fetchers", config.num_priorities),
            counters: Counters::default(),
        });

        let fetchers = FetcherThreads::spawn(
            shared.queues.clone(),
            shared.clone(),
            config.fetcher_config(),
        )
        .map_err(CacheError::Spawn)?;

        tracing::debug!(
            fetchers = fetchers.num_threads(),
            priorities = config.num_priorities,
            retention_mb = config.retention_mb,
            "cell cache created"
        );
        Ok(Self { shared, fetchers })
    }

    pub fn loader(&self) -> &L {
        &self.shared.loader
    }

    /// Number of priority levels
    pub fn num_priorities(&self) -> usize {
        self.shared.queues.num_priorities()
    }

    /// The entry for `key`, if it exists. Never loads or creates anything.
    pub fn get(&self, key: &CacheKey) -> Option<CellRef<L::Array>> {
        let entry = self.shared.table.get(key)?;
        self.shared.touch(key);
        Some(CellRef::current(entry))
    }

    /// Check if a live entry exists for `key`
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.shared.table.contains_key(key)
    }

    /// Keys of all live entries, sorted
    pub fn keys(&self) -> Vec<CacheKey> {
        self.shared.table.keys()
    }

    /// The entry for `key`, created with a placeholder cell if absent
    ///
    /// Never blocks on storage.
    pub fn create_or_get_placeholder(
        &self,
        key: CacheKey,
        layout: &CellLayout,
    ) -> CellRef<L::Array> {
        CellRef::current(self.shared.entry(key, layout))
    }

    /// Load the entry for `key` if it exists and is not loaded yet
    ///
    /// Returns `Ok(None)` if there is no entry.
    ///
    /// # Errors
    /// Returns the storage failure if the load fails; the entry keeps its
    /// placeholder.
    pub fn refresh(&self, key: &CacheKey) -> Result<Option<CellRef<L::Array>>, CacheError> {
        let Some(entry) = self.shared.table.get(key) else {
            return Ok(None);
        };
        let cell = self.shared.load(&entry)?;
        Ok(Some(CellRef::new(entry, cell)))
    }

    /// Request a cell according to `hints`
    ///
    /// Returns `Ok(None)` only for [`LoadingStrategy::DontLoad`] requests of
    /// keys without an entry.
    ///
    /// # Errors
    /// Synchronous loads (blocking, or budgeted with time left) report
    /// storage failures. The entry keeps its placeholder in that case.
    pub fn get_with_hints(
        &self,
        key: CacheKey,
        layout: &CellLayout,
        hints: &CacheHints,
    ) -> Result<Option<CellRef<L::Array>>, CacheError> {
        let shared = &self.shared;

        if hints.strategy == LoadingStrategy::DontLoad {
            let found = self.get(&key);
            match &found {
                Some(cell) => {
                    shared.record_request(cell);
                }
                None => Counters::bump(&shared.counters.misses),
            }
            return Ok(found);
        }

        let entry = shared.entry(key, layout);
        let cell = entry.cell();
        if shared.record_request(&cell) {
            return Ok(Some(CellRef::new(entry, cell)));
        }

        match hints.strategy {
            LoadingStrategy::Blocking => {
                let cell = shared.load(&entry)?;
                Ok(Some(CellRef::new(entry, cell)))
            }
            LoadingStrategy::Budgeted => {
                let group = shared.group();
                let budget = group.statistics().budget();
                if budget.time_left(hints.priority) > 0 {
                    let start = Instant::now();
                    let loaded = shared.load(&entry);
                    budget.consume(start.elapsed(), hints.priority);
                    tracing::trace!(key = %key, priority = hints.priority, "budgeted load");
                    let cell = loaded?;
                    return Ok(Some(CellRef::new(entry, cell)));
                }

                Counters::bump(&shared.counters.budget_degrades);
                tracing::trace!(key = %key, priority = hints.priority, "io budget exhausted");
                shared.enqueue(&entry, hints);
                Ok(Some(CellRef::new(entry, cell)))
            }
            LoadingStrategy::Volatile => {
                shared.enqueue(&entry, hints);
                Ok(Some(CellRef::new(entry, cell)))
            }
            LoadingStrategy::DontLoad => Ok(Some(CellRef::new(entry, cell))),
        }
    }

    /// Like [`get_with_hints`](Self::get_with_hints), returning `default`
    /// for absent entries
    pub fn get_or_default(
        &self,
        key: CacheKey,
        layout: &CellLayout,
        hints: &CacheHints,
        default: Arc<Cell<L::Array>>,
    ) -> Result<Arc<Cell<L::Array>>, CacheError> {
        Ok(self
            .get_with_hints(key, layout, hints)?
            .map_or(default, |found| found.cell().clone()))
    }

    /// Start a new render frame
    ///
    /// Moves everything still queued into the prefetch queue, which is only
    /// served once the current frame's requests are done, and lets every
    /// entry be enqueued again.
    pub fn prepare_next_frame(&self) {
        let frame = self.shared.frame.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.queues.clear_to_prefetch();
        tracing::debug!(frame, "next frame prepared");
    }

    /// Current frame number, starting at 1
    pub fn frame(&self) -> u64 {
        self.shared.frame.load(Ordering::Acquire)
    }

    /// Replace the I/O time budget of the calling thread's group
    ///
    /// `per_level[i]` is the blocking I/O time allowed at priority `i` in
    /// this frame. Missing levels inherit the last given value.
    pub fn reset_io_time_budget(&self, per_level: &[Duration]) {
        let nanos: Vec<i64> = per_level.iter().copied().map(duration_to_nanos).collect();
        self.reset_io_time_budget_nanos(&nanos);
    }

    /// Like [`reset_io_time_budget`](Self::reset_io_time_budget), in nanoseconds
    pub fn reset_io_time_budget_nanos(&self, per_level: &[i64]) {
        self.shared.group().statistics().budget().reset(per_level);
    }

    /// Stop the fetcher threads from starting new loads for `duration`
    pub fn pause_fetcher_threads_for(&self, duration: Duration) {
        self.fetchers.pause_for(duration);
    }

    /// Stop the fetcher threads from starting new loads until `deadline`
    pub fn pause_fetcher_threads_until(&self, deadline: Instant) {
        self.fetchers.pause_until(deadline);
    }

    /// End any pause of the fetcher threads
    pub fn wake_fetcher_threads(&self) {
        self.fetchers.wake_up();
    }

    pub fn fetchers_paused(&self) -> bool {
        self.fetchers.is_paused()
    }

    pub fn num_fetcher_threads(&self) -> usize {
        self.fetchers.num_threads()
    }

    /// The calling thread's group, or the cache's default group
    ///
    /// Its statistics hold the I/O time budget used by budgeted requests on
    /// this thread.
    pub fn thread_group(&self) -> ThreadGroup {
        self.shared.group()
    }

    /// Group charged for requests from threads outside any group
    pub fn default_group(&self) -> &ThreadGroup {
        &self.shared.default_group
    }

    /// Group the fetcher threads run in
    pub fn fetcher_group(&self) -> &ThreadGroup {
        &self.shared.fetcher_group
    }

    /// Drop all queued and prefetch keys
    pub fn clear_queues(&self) {
        self.shared.queues.clear();
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.shared.queues.stats()
    }

    /// Release every entry held only by the retention list
    pub fn clear_retention(&self) {
        let released = self.shared.retention.lock().clear();
        tracing::debug!(released = released.len(), "retention cleared");
        drop(released);
    }

    /// Change the retention limit
    pub fn set_retention_limit(&self, bytes: u64) {
        let evicted = self.shared.retention.lock().set_limit(bytes);
        drop(evicted);
    }

    pub fn stats(&self) -> CacheStats {
        let live = self.shared.table.snapshot();
        let mut stats = CacheStats {
            entries: live.len(),
            valid_entries: live.iter().filter(|entry| entry.is_valid()).count(),
            ..CacheStats::default()
        };
        drop(live);

        self.shared.counters.fill(&mut stats);
        let retention = self.shared.retention.lock();
        stats.retained_entries = retention.len();
        stats.retained_bytes = retention.bytes();
        stats.retention_limit = retention.limit();
        stats.evictions = retention.evictions();
        stats
    }

    /// Stop the fetcher threads, waiting for running loads to finish
    pub fn shutdown(self) {
        self.fetchers.shutdown();
    }
}

impl<L: CacheArrayLoader + fmt::Debug> fmt::Debug for CellCache<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellCache")
            .field("loader", &self.shared.loader)
            .field("frame", &self.frame())
            .field("fetcher_threads", &self.fetchers.num_threads())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoadError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        loads: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl CacheArrayLoader for Counting {
        type Array = Vec<u8>;

        fn load_array(
            &self,
            _timepoint: u32,
            _setup: u32,
            level: u8,
            layout: &CellLayout,
        ) -> Result<Vec<u8>, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(LoadError::storage("unreadable block"));
            }
            Ok(vec![level + 1; layout.num_elements() as usize])
        }

        fn empty_array(&self, layout: &CellLayout) -> Vec<u8> {
            vec![0; layout.num_elements() as usize]
        }

        fn bytes_per_element(&self) -> usize {
            1
        }
    }

    fn layout() -> CellLayout {
        CellLayout::new([4, 4, 2], [0, 0, 0])
    }

    fn cache(loader: Counting) -> CellCache<Counting> {
        CellCache::new(loader, &CacheConfig::without_fetchers().with_priorities(3)).unwrap()
    }

    #[test]
    fn test_blocking_loads_once() {
        let cache = cache(Counting::default());
        let key = CacheKey::new(0, 0, 2, 5);

        let first = cache
            .get_with_hints(key, &layout(), &CacheHints::blocking())
            .unwrap()
            .unwrap();
        assert!(first.is_valid());
        assert_eq!(first.data()[0], 3);

        let second = cache
            .get_with_hints(key, &layout(), &CacheHints::blocking())
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(first.cell(), second.cell()));
        assert_eq!(cache.loader().loads.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.loads, 1);
    }

    #[test]
    fn test_blocking_failure_keeps_placeholder() {
        let cache = cache(Counting {
            fail: true,
            ..Counting::default()
        });
        let key = CacheKey::new(0, 0, 0, 1);

        let error = cache
            .get_with_hints(key, &layout(), &CacheHints::blocking())
            .unwrap_err();
        assert!(matches!(error, CacheError::StorageRead { key: k, .. } if k == key));

        let cell = cache.get(&key);
        // The placeholder is retained even though loading failed.
        assert!(!cell.unwrap().is_valid());
        assert_eq!(cache.stats().load_failures, 1);
    }

    #[test]
    fn test_volatile_enqueues_and_returns_placeholder() {
        let cache = cache(Counting::default());
        let key = CacheKey::new(0, 0, 0, 1);

        let cell = cache
            .get_with_hints(key, &layout(), &CacheHints::volatile(1))
            .unwrap()
            .unwrap();
        assert!(!cell.is_valid());
        assert_eq!(cache.queue_stats().per_priority, vec![0, 1, 0]);
        assert_eq!(cache.loader().loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_volatile_reenqueues_unless_update_once() {
        let cache = cache(Counting::default());
        let key = CacheKey::new(0, 0, 0, 1);

        let hints = CacheHints::volatile(0);
        let _a = cache.get_with_hints(key, &layout(), &hints).unwrap();
        let _b = cache.get_with_hints(key, &layout(), &hints).unwrap();
        assert_eq!(cache.stats().enqueued, 2);

        let once = CacheHints::volatile(0).with_update_once(true);
        let other = CacheKey::new(0, 0, 0, 2);
        let _c = cache.get_with_hints(other, &layout(), &once).unwrap();
        let _d = cache.get_with_hints(other, &layout(), &once).unwrap();
        assert_eq!(cache.stats().enqueued, 3);

        cache.prepare_next_frame();
        let _e = cache.get_with_hints(other, &layout(), &once).unwrap();
        assert_eq!(cache.stats().enqueued, 4);
    }

    #[test]
    fn test_valid_entry_is_not_enqueued() {
        let cache = cache(Counting::default());
        let key = CacheKey::new(0, 0, 0, 1);
        let _loaded = cache.get_with_hints(key, &layout(), &CacheHints::blocking());

        let cell = cache
            .get_with_hints(key, &layout(), &CacheHints::volatile(0))
            .unwrap()
            .unwrap();
        assert!(cell.is_valid());
        assert_eq!(cache.stats().enqueued, 0);
        assert_eq!(cache.queue_stats().pending(), 0);
    }

    #[test]
    fn test_budgeted_loads_while_time_left() {
        let cache = cache(Counting {
            delay: Duration::from_millis(2),
            ..Counting::default()
        });
        cache.reset_io_time_budget(&[Duration::from_secs(10)]);

        let cell = cache
            .get_with_hints(CacheKey::new(0, 0, 0, 1), &layout(), &CacheHints::budgeted(2))
            .unwrap()
            .unwrap();
        assert!(cell.is_valid());
        assert_eq!(cache.stats().budget_degrades, 0);

        let left = cache.thread_group().statistics().budget().remaining(0);
        assert!(left <= Duration::from_secs(10) - Duration::from_millis(2));
    }

    #[test]
    fn test_budgeted_degrades_without_time() {
        let cache = cache(Counting::default());
        cache.reset_io_time_budget(&[Duration::from_millis(5), Duration::ZERO]);

        let cell = cache
            .get_with_hints(CacheKey::new(0, 0, 0, 1), &layout(), &CacheHints::budgeted(1))
            .unwrap()
            .unwrap();
        assert!(!cell.is_valid());
        assert_eq!(cache.stats().budget_degrades, 1);
        assert_eq!(cache.queue_stats().per_priority, vec![0, 1, 0]);
    }

    #[test]
    fn test_dont_load_never_creates() {
        let cache = cache(Counting::default());
        let key = CacheKey::new(0, 0, 0, 1);

        assert!(cache
            .get_with_hints(key, &layout(), &CacheHints::dont_load())
            .unwrap()
            .is_none());
        assert!(!cache.contains(&key));
        assert_eq!(cache.stats().enqueued, 0);

        let default = Arc::new(Cell::placeholder(layout(), vec![42; 32]));
        let cell = cache
            .get_or_default(key, &layout(), &CacheHints::dont_load(), default.clone())
            .unwrap();
        assert!(Arc::ptr_eq(&cell, &default));
    }

    #[test]
    fn test_refresh() {
        let cache = cache(Counting::default());
        let key = CacheKey::new(0, 0, 0, 1);
        assert!(cache.refresh(&key).unwrap().is_none());

        let placeholder = cache.create_or_get_placeholder(key, &layout());
        assert!(!placeholder.is_valid());

        let refreshed = cache.refresh(&key).unwrap().unwrap();
        assert!(refreshed.is_valid());
        // The earlier handle still shows the placeholder but sees the update.
        assert!(!placeholder.is_valid());
        assert!(placeholder.latest().is_valid());
    }

    #[test]
    fn test_frame_counter() {
        let cache = cache(Counting::default());
        assert_eq!(cache.frame(), 1);
        cache.prepare_next_frame();
        cache.prepare_next_frame();
        assert_eq!(cache.frame(), 3);
    }

    #[test]
    fn test_prepare_next_frame_moves_queue_to_prefetch() {
        let cache = cache(Counting::default());
        let _cell = cache.get_with_hints(CacheKey::new(0, 0, 0, 1), &layout(), &CacheHints::volatile(0));

        cache.prepare_next_frame();
        let stats = cache.queue_stats();
        assert_eq!(stats.per_priority, vec![0, 0, 0]);
        assert_eq!(stats.prefetch, 1);

        cache.clear_queues();
        assert_eq!(cache.queue_stats().pending(), 0);
    }

    #[test]
    fn test_entries_reclaimed_without_retention() {
        let loader = Counting::default();
        let config = CacheConfig::without_fetchers().with_retention_mb(0);
        let cache = CellCache::new(loader, &config).unwrap();
        let key = CacheKey::new(0, 0, 0, 1);

        let cell = cache.create_or_get_placeholder(key, &layout());
        assert!(cache.contains(&key));
        drop(cell);
        assert!(!cache.contains(&key));
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_clear_retention_releases_entries() {
        let cache = cache(Counting::default());
        for cell in 0..4 {
            let _ = cache.get_with_hints(CacheKey::new(0, 0, 0, cell), &layout(), &CacheHints::blocking());
        }
        let stats = cache.stats();
        assert_eq!(stats.entries, 4);
        assert_eq!(stats.valid_entries, 4);
        assert_eq!(stats.retained_bytes, 4 * 32);

        cache.clear_retention();
        assert!(cache.keys().is_empty());
        assert_eq!(cache.stats().retained_entries, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CacheConfig::without_fetchers().with_priorities(0);
        assert!(matches!(
            CellCache::new(Counting::default(), &config),
            Err(CacheError::Config(_))
        ));
    }
}
