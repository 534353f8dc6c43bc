use pyramid_cache::{
    CacheArrayLoader, CacheConfig, CacheError, CacheHints, CacheKey, CellCache, CellLayout,
    LoadError, ThreadGroup,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Loader that records every read and can be slowed down or made to fail
#[derive(Default)]
struct Recording {
    reads: AtomicUsize,
    keys: Mutex<Vec<(u32, u32, u8, [i64; 3])>>,
    delay: Duration,
    failing: Mutex<HashSet<[i64; 3]>>,
    interrupting: Mutex<HashSet<[i64; 3]>>,
}

impl Recording {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl CacheArrayLoader for Recording {
    type Array = Vec<u16>;

    fn load_array(
        &self,
        timepoint: u32,
        setup: u32,
        level: u8,
        layout: &CellLayout,
    ) -> Result<Vec<u16>, LoadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.keys
            .lock()
            .push((timepoint, setup, level, layout.origin));
        thread::sleep(self.delay);
        if self.failing.lock().contains(&layout.origin) {
            return Err(LoadError::storage("checksum mismatch"));
        }
        if self.interrupting.lock().contains(&layout.origin) {
            return Err(LoadError::Interrupted);
        }
        Ok(vec![1000 + level as u16; layout.num_elements() as usize])
    }

    fn empty_array(&self, layout: &CellLayout) -> Vec<u16> {
        vec![0; layout.num_elements() as usize]
    }

    fn bytes_per_element(&self) -> usize {
        2
    }
}

fn layout(cell: u64) -> CellLayout {
    CellLayout::new([8, 8, 8], [cell as i64 * 8, 0, 0])
}

fn key(cell: u64) -> CacheKey {
    CacheKey::new(0, 0, 0, cell)
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(2));
    }
}

fn config(fetchers: usize) -> CacheConfig {
    let config = if fetchers == 0 {
        CacheConfig::without_fetchers()
    } else {
        CacheConfig::default().with_fetcher_threads(fetchers)
    };
    config
        .with_priorities(3)
        .with_poll_interval(Duration::from_millis(10))
}

#[test]
fn test_concurrent_blocking_requests_read_once() {
    let cache = Arc::new(
        CellCache::new(Recording::slow(Duration::from_millis(30)), &config(0)).unwrap(),
    );
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_with_hints(key(1), &layout(1), &CacheHints::blocking())
                    .unwrap()
                    .unwrap()
            })
        })
        .collect();
    let cells: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(cache.loader().reads(), 1);
    assert!(cells[0].is_valid());
    assert!(Arc::ptr_eq(cells[0].cell(), cells[1].cell()));
}

#[test]
fn test_many_concurrent_requests_of_mixed_strategies_read_once() {
    let cache = Arc::new(
        CellCache::new(Recording::slow(Duration::from_millis(20)), &config(2)).unwrap(),
    );
    cache.reset_io_time_budget(&[Duration::from_secs(60)]);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let hints = match i % 3 {
                    0 => CacheHints::blocking(),
                    1 => CacheHints::volatile(0),
                    _ => CacheHints::budgeted(0),
                };
                barrier.wait();
                cache.get_with_hints(key(2), &layout(2), &hints).unwrap()
            })
        })
        .collect();
    let cells: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    wait_until(|| cells[0].as_ref().unwrap().latest().is_valid());
    // Let any stale queued fetches drain.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(cache.loader().reads(), 1);
}

#[test]
fn test_budget_exhausted_enqueues_once_without_loading() {
    let cache = CellCache::new(Recording::default(), &config(0)).unwrap();
    cache.reset_io_time_budget(&[
        Duration::from_millis(100),
        Duration::from_millis(50),
        Duration::ZERO,
    ]);

    let cell = cache
        .get_with_hints(key(3), &layout(3), &CacheHints::budgeted(2))
        .unwrap()
        .unwrap();

    assert!(!cell.is_valid());
    assert_eq!(cache.loader().reads(), 0);
    assert_eq!(cache.queue_stats().per_priority, vec![0, 0, 1]);
    assert_eq!(cache.stats().budget_degrades, 1);
}

#[test]
fn test_budget_is_charged_to_higher_levels() {
    let cache = CellCache::new(Recording::slow(Duration::from_millis(5)), &config(0)).unwrap();
    cache.reset_io_time_budget(&[Duration::from_secs(1), Duration::from_secs(1)]);

    let cell = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::budgeted(1))
        .unwrap()
        .unwrap();
    assert!(cell.is_valid());

    let budget = cache.default_group().statistics().budget();
    let level0 = budget.remaining(0);
    assert!(level0 <= Duration::from_millis(995));
    assert_eq!(budget.remaining(1), level0);
}

#[test]
fn test_render_group_has_its_own_budget() {
    let cache = CellCache::new(Recording::default(), &config(0)).unwrap();
    let render = ThreadGroup::new("render", cache.num_priorities());

    cache.reset_io_time_budget(&[Duration::from_secs(1)]);
    let _in_render = render.enter();
    // The render group's budget was never reset, so the request degrades.
    let cell = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::budgeted(0))
        .unwrap()
        .unwrap();
    assert!(!cell.is_valid());

    cache.reset_io_time_budget(&[Duration::from_secs(1)]);
    let cell = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::budgeted(0))
        .unwrap()
        .unwrap();
    assert!(cell.is_valid());
    assert_eq!(render.statistics().io_bytes(), 8 * 8 * 8 * 2);
    assert_eq!(cache.default_group().statistics().io_bytes(), 0);
}

#[test]
fn test_dont_load_is_pure() {
    let cache = CellCache::new(Recording::default(), &config(0)).unwrap();

    let found = cache
        .get_with_hints(key(5), &layout(5), &CacheHints::dont_load())
        .unwrap();
    assert!(found.is_none());
    assert!(!cache.contains(&key(5)));
    assert_eq!(cache.queue_stats().pending(), 0);
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_fetchers_load_in_background() {
    let cache = CellCache::new(Recording::default(), &config(2)).unwrap();

    let cells: Vec<_> = (0..6)
        .map(|cell| {
            cache
                .get_with_hints(key(cell), &layout(cell), &CacheHints::volatile(1))
                .unwrap()
                .unwrap()
        })
        .collect();

    wait_until(|| cells.iter().all(|cell| cell.latest().is_valid()));
    assert_eq!(cache.loader().reads(), 6);

    let fetchers = cache.fetcher_group().statistics();
    assert_eq!(fetchers.io_bytes(), 6 * 8 * 8 * 8 * 2);
    assert_eq!(cache.default_group().statistics().io_bytes(), 0);

    // Served cells are snapshots; the loaded data is picked up on request.
    assert!(!cells[0].is_valid());
    let again = cache
        .get_with_hints(key(0), &layout(0), &CacheHints::volatile(1))
        .unwrap()
        .unwrap();
    assert_eq!(again.data()[0], 1000);
}

#[test]
fn test_paused_fetchers_do_not_load() {
    let cache = CellCache::new(Recording::default(), &config(1)).unwrap();
    cache.pause_fetcher_threads_for(Duration::from_secs(60));
    assert!(cache.fetchers_paused());
    thread::sleep(Duration::from_millis(30));

    let cell = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::volatile(0))
        .unwrap()
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(cache.loader().reads(), 0);

    cache.wake_fetcher_threads();
    wait_until(|| cell.latest().is_valid());
}

#[test]
fn test_pause_reaches_fetchers_waiting_for_work() {
    // Default poll interval: the fetcher sits in its queue wait when paused.
    let config = CacheConfig::default().with_fetcher_threads(1);
    let cache = CellCache::new(Recording::default(), &config).unwrap();
    thread::sleep(Duration::from_millis(30));
    cache.pause_fetcher_threads_for(Duration::from_secs(60));

    let cell = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::volatile(0))
        .unwrap()
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(cache.loader().reads(), 0);
    assert_eq!(cache.queue_stats().pending(), 1);

    cache.wake_fetcher_threads();
    wait_until(|| cell.latest().is_valid());
    assert_eq!(cache.loader().reads(), 1);
}

#[test]
fn test_interrupted_load_keeps_placeholder_until_next_request() {
    let loader = Recording::default();
    loader
        .interrupting
        .lock()
        .extend([layout(1).origin, layout(2).origin]);
    let cache = CellCache::new(loader, &config(0)).unwrap();
    cache.reset_io_time_budget(&[Duration::from_secs(10)]);

    let blocking = cache.create_or_get_placeholder(key(1), &layout(1));
    let error = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::blocking())
        .unwrap_err();
    assert!(matches!(error, CacheError::Interrupted { key: k } if k == key(1)));
    assert!(Arc::ptr_eq(blocking.cell(), &blocking.latest()));

    let budgeted = cache.create_or_get_placeholder(key(2), &layout(2));
    let error = cache
        .get_with_hints(key(2), &layout(2), &CacheHints::budgeted(0))
        .unwrap_err();
    assert!(matches!(error, CacheError::Interrupted { key: k } if k == key(2)));
    assert!(Arc::ptr_eq(budgeted.cell(), &budgeted.latest()));
    assert!(!budgeted.latest().is_valid());
    assert_eq!(cache.stats().load_failures, 2);
    assert_eq!(cache.stats().loads, 0);

    cache.loader().interrupting.lock().clear();
    let loaded = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::blocking())
        .unwrap()
        .unwrap();
    assert!(loaded.is_valid());
    let loaded = cache
        .get_with_hints(key(2), &layout(2), &CacheHints::budgeted(0))
        .unwrap()
        .unwrap();
    assert!(loaded.is_valid());
    assert!(blocking.latest().is_valid());
    assert_eq!(cache.loader().reads(), 4);
}

#[test]
fn test_worker_survives_failed_load() {
    let loader = Recording::default();
    loader.failing.lock().insert(layout(1).origin);
    let cache = CellCache::new(loader, &config(1)).unwrap();

    let broken = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::volatile(0))
        .unwrap()
        .unwrap();
    wait_until(|| cache.stats().load_failures == 1);
    assert!(!broken.latest().is_valid());

    let fine = cache
        .get_with_hints(key(2), &layout(2), &CacheHints::volatile(0))
        .unwrap()
        .unwrap();
    wait_until(|| fine.latest().is_valid());

    // The failed key is not retried on its own.
    thread::sleep(Duration::from_millis(30));
    assert_eq!(cache.stats().load_failures, 1);
}

#[test]
fn test_blocking_failure_then_explicit_retry() {
    let loader = Recording::default();
    loader.failing.lock().insert(layout(1).origin);
    let cache = CellCache::new(loader, &config(0)).unwrap();

    let error = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::blocking())
        .unwrap_err();
    assert!(matches!(error, CacheError::StorageRead { .. }));
    assert_eq!(error.key(), Some(key(1)));

    cache.loader().failing.lock().clear();
    let cell = cache.refresh(&key(1)).unwrap().unwrap();
    assert!(cell.is_valid());
    assert_eq!(cache.loader().reads(), 2);
}

#[test]
fn test_reclaimed_entry_is_skipped_by_fetchers() {
    let cache = CellCache::new(Recording::default(), &config(1).with_retention_mb(0)).unwrap();
    cache.pause_fetcher_threads_for(Duration::from_secs(60));
    thread::sleep(Duration::from_millis(20));

    let cell = cache
        .get_with_hints(key(1), &layout(1), &CacheHints::volatile(0))
        .unwrap()
        .unwrap();
    drop(cell);
    assert!(!cache.contains(&key(1)));

    cache.wake_fetcher_threads();
    wait_until(|| cache.queue_stats().pending() == 0);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(cache.loader().reads(), 0);
}

#[test]
fn test_higher_priority_served_first() {
    let cache = CellCache::new(Recording::default(), &config(1)).unwrap();
    cache.pause_fetcher_threads_for(Duration::from_secs(60));
    thread::sleep(Duration::from_millis(20));

    let _held: Vec<_> = [(1, 2), (2, 1), (3, 0), (4, 2), (5, 0)]
        .into_iter()
        .map(|(cell, priority)| {
            cache
                .get_with_hints(key(cell), &layout(cell), &CacheHints::volatile(priority))
                .unwrap()
        })
        .collect();

    cache.wake_fetcher_threads();
    wait_until(|| cache.loader().reads() == 5);

    let order: Vec<i64> = cache
        .loader()
        .keys
        .lock()
        .iter()
        .map(|(_, _, _, origin)| origin[0] / 8)
        .collect();
    // Most recent first within a priority level.
    assert_eq!(order, vec![5, 3, 2, 4, 1]);
}

#[test]
fn test_shutdown_stops_fetchers() {
    let cache = CellCache::new(Recording::default(), &config(2)).unwrap();
    assert_eq!(cache.num_fetcher_threads(), 2);
    cache.shutdown();
}
