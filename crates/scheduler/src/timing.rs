//! I/O timing per thread group
//!
//! A [`ThreadGroup`] stands for one logical consumer of the cache, such as
//! the render pipeline or the fetcher pool. Every group owns one
//! [`IoStatistics`]: its [`IoTimeBudget`], the number of bytes read and two
//! clocks.
//!
//! - The wall clock runs while at least one thread of the group is inside a
//!   load. Overlapping loads are counted once.
//! - The cumulative clock is the sum over all threads. Each thread
//!   accumulates into its own slot and the slots are summed on read.
//!
//! Group membership is thread-local and entered with a guard.

use crate::budget::IoTimeBudget;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thread_local::ThreadLocal;

thread_local! {
    static CURRENT_GROUP: RefCell<Option<ThreadGroup>> = const { RefCell::new(None) };
}

#[derive(Debug, Default)]
struct ThreadClock {
    /// Nesting depth of running timers on this thread
    depth: AtomicU32,

    /// Start of the outermost running timer, in nanoseconds since `epoch`
    started_at: AtomicU64,

    /// Finished I/O time on this thread
    total: AtomicU64,
}

#[derive(Debug, Default)]
struct WallClock {
    running: usize,
    since: Option<Instant>,
    accumulated: Duration,
}

/// I/O counters and time budget of one thread group
#[derive(Debug)]
pub struct IoStatistics {
    budget: IoTimeBudget,
    io_bytes: AtomicU64,
    wall: Mutex<WallClock>,
    threads: ThreadLocal<ThreadClock>,
    epoch: Instant,
}

impl IoStatistics {
    /// Create statistics with a budget of `num_levels` priority levels
    pub fn new(num_levels: usize) -> Self {
        Self {
            budget: IoTimeBudget::new(num_levels),
            io_bytes: AtomicU64::new(0),
            wall: Mutex::new(WallClock::default()),
            threads: ThreadLocal::new(),
            epoch: Instant::now(),
        }
    }

    /// The group's I/O time budget
    pub fn budget(&self) -> &IoTimeBudget {
        &self.budget
    }

    /// Start timing an I/O operation on the calling thread
    ///
    /// The timer stops when the returned guard is dropped or
    /// [`IoTimer::stop`] is called. Nested timers on one thread count once.
    pub fn start(&self) -> IoTimer<'_> {
        let clock = self.threads.get_or_default();
        if clock.depth.fetch_add(1, Ordering::AcqRel) == 0 {
            clock.started_at.store(self.nanos_since_epoch(), Ordering::Release);

            let mut wall = self.wall.lock();
            if wall.running == 0 {
                wall.since = Some(Instant::now());
            }
            wall.running += 1;
        }

        IoTimer {
            stats: self,
            started: Instant::now(),
            stopped: false,
            _not_send: PhantomData,
        }
    }

    fn stop_current_thread(&self) {
        let clock = self.threads.get_or_default();
        if clock.depth.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let elapsed = self
            .nanos_since_epoch()
            .saturating_sub(clock.started_at.load(Ordering::Acquire));
        clock.total.fetch_add(elapsed, Ordering::AcqRel);

        let mut wall = self.wall.lock();
        wall.running = wall.running.saturating_sub(1);
        if wall.running == 0 {
            if let Some(since) = wall.since.take() {
                wall.accumulated += since.elapsed();
            }
        }
    }

    fn nanos_since_epoch(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Record `bytes` read from storage
    pub fn add_io_bytes(&self, bytes: u64) {
        self.io_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Total bytes read from storage
    pub fn io_bytes(&self) -> u64 {
        self.io_bytes.load(Ordering::Relaxed)
    }

    /// Wall-clock time during which the group was doing I/O, in nanoseconds
    ///
    /// Includes the currently running interval, if any.
    pub fn io_nano_time(&self) -> u64 {
        let wall = self.wall.lock();
        let running = wall.since.map(|since| since.elapsed()).unwrap_or_default();
        u64::try_from((wall.accumulated + running).as_nanos()).unwrap_or(u64::MAX)
    }

    /// Sum of the I/O time of all threads in the group, in nanoseconds
    ///
    /// Only finished operations are counted.
    pub fn cumulative_io_nano_time(&self) -> u64 {
        self.threads
            .iter()
            .map(|clock| clock.total.load(Ordering::Acquire))
            .fold(0u64, u64::saturating_add)
    }

    /// Zero the byte counter and both clocks, keeping the budget
    ///
    /// Timers running while this is called keep their start time.
    pub fn reset_counters(&self) {
        self.io_bytes.store(0, Ordering::Relaxed);
        for clock in self.threads.iter() {
            clock.total.store(0, Ordering::Release);
        }
        let mut wall = self.wall.lock();
        wall.accumulated = Duration::ZERO;
        if wall.since.is_some() {
            wall.since = Some(Instant::now());
        }
    }
}

/// Running I/O timer, see [`IoStatistics::start`]
#[must_use = "the timer stops as soon as it is dropped"]
pub struct IoTimer<'a> {
    stats: &'a IoStatistics,
    started: Instant,
    stopped: bool,
    // The per-thread clock must be stopped on the thread that started it.
    _not_send: PhantomData<*const ()>,
}

impl IoTimer<'_> {
    /// Time since this timer was started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop the timer and return its duration
    pub fn stop(mut self) -> Duration {
        self.stopped = true;
        self.stats.stop_current_thread();
        self.started.elapsed()
    }
}

impl Drop for IoTimer<'_> {
    fn drop(&mut self) {
        if !self.stopped {
            self.stats.stop_current_thread();
        }
    }
}

#[derive(Debug)]
struct GroupInner {
    name: String,
    stats: IoStatistics,
}

/// Named group of threads sharing one set of [`IoStatistics`]
///
/// Cloning is cheap and yields a handle to the same group.
///
/// # Example
///
/// ```
/// use pyramid_scheduler::ThreadGroup;
///
/// let render = ThreadGroup::new("render", 3);
/// assert!(ThreadGroup::current().is_none());
///
/// {
///     let _guard = render.enter();
///     let current = ThreadGroup::current().unwrap();
///     assert!(current.ptr_eq(&render));
/// }
///
/// assert!(ThreadGroup::current().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    inner: Arc<GroupInner>,
}

impl ThreadGroup {
    /// Create a group whose budget has `num_levels` priority levels
    pub fn new(name: impl Into<String>, num_levels: usize) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                stats: IoStatistics::new(num_levels),
            }),
        }
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The group's I/O statistics and budget
    pub fn statistics(&self) -> &IoStatistics {
        &self.inner.stats
    }

    /// Make this the calling thread's group until the guard is dropped
    pub fn enter(&self) -> ThreadGroupGuard {
        let previous = CURRENT_GROUP.with(|current| current.replace(Some(self.clone())));
        ThreadGroupGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Make this the calling thread's group without a guard
    ///
    /// Meant for threads that belong to the group for their whole life,
    /// such as pool workers. A later [`enter`](Self::enter) still nests.
    pub fn join_current_thread(&self) {
        CURRENT_GROUP.with(|current| *current.borrow_mut() = Some(self.clone()));
    }

    /// The calling thread's group, if it has entered one
    pub fn current() -> Option<ThreadGroup> {
        CURRENT_GROUP.with(|current| current.borrow().clone())
    }

    /// The calling thread's group, or `fallback` if it has not entered one
    pub fn current_or(fallback: &ThreadGroup) -> ThreadGroup {
        Self::current().unwrap_or_else(|| fallback.clone())
    }

    /// Check if both handles refer to the same group
    pub fn ptr_eq(&self, other: &ThreadGroup) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Restores the previous thread group when dropped
#[must_use = "the thread leaves the group as soon as the guard is dropped"]
pub struct ThreadGroupGuard {
    previous: Option<ThreadGroup>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ThreadGroupGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_GROUP.with(|current| *current.borrow_mut() = previous);
    }
}
