//! Priority fetch queues
//!
//! One deque per priority level feeds the fetcher threads. Level 0 is the
//! most urgent and is always drained before level 1, and so on. Within a
//! level, keys are normally pushed to the front, so the most recently
//! requested key is served next: what is visible now beats requests that
//! were queued for a view that has since moved on.
//!
//! Keys left over from a previous frame can be demoted into a bounded
//! prefetch deque with [`FetchQueues::clear_to_prefetch`]. The prefetch
//! deque is only drained once every priority level is empty.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default capacity of the prefetch deque
pub const DEFAULT_PREFETCH_CAPACITY: usize = 256;

/// Snapshot of queue sizes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of queued keys per priority level
    pub per_priority: Vec<usize>,

    /// Number of keys waiting in the prefetch deque
    pub prefetch: usize,

    /// Total keys ever put into the queues
    pub enqueued: u64,

    /// Total keys handed out by `take`
    pub dequeued: u64,
}

impl QueueStats {
    /// Total number of waiting keys, prefetch included
    pub fn pending(&self) -> usize {
        self.per_priority.iter().sum::<usize>() + self.prefetch
    }
}

struct QueueState<K> {
    /// One deque per priority level, index 0 is drained first
    queues: Vec<VecDeque<K>>,

    /// Keys demoted from an earlier frame
    prefetch: VecDeque<K>,

    enqueued: u64,
    dequeued: u64,
}

impl<K> QueueState<K> {
    fn pop_next(&mut self) -> Option<K> {
        let key = self
            .queues
            .iter_mut()
            .find(|queue| !queue.is_empty())
            .and_then(VecDeque::pop_front)
            .or_else(|| self.prefetch.pop_front());

        if key.is_some() {
            self.dequeued += 1;
        }
        key
    }

    fn is_empty(&self) -> bool {
        self.prefetch.is_empty() && self.queues.iter().all(VecDeque::is_empty)
    }
}

/// Blocking multi-level fetch queues
///
/// Thread-safe. Producers call [`put`](Self::put) from the render thread,
/// fetcher threads block in [`take_timeout`](Self::take_timeout).
///
/// # Example
///
/// ```
/// use pyramid_scheduler::FetchQueues;
///
/// let queues = FetchQueues::new(3, 16);
/// queues.put("stale", 1, true);
/// queues.put("visible", 0, true);
/// queues.put("newer", 1, true);
///
/// assert_eq!(queues.try_take(), Some("visible"));
/// assert_eq!(queues.try_take(), Some("newer"));
/// assert_eq!(queues.try_take(), Some("stale"));
/// assert_eq!(queues.try_take(), None);
/// ```
pub struct FetchQueues<K> {
    state: Mutex<QueueState<K>>,
    not_empty: Condvar,
    prefetch_capacity: usize,
}

impl<K> FetchQueues<K> {
    /// Create queues with `num_priorities` levels (at least one)
    pub fn new(num_priorities: usize, prefetch_capacity: usize) -> Self {
        let num_priorities = num_priorities.max(1);
        Self {
            state: Mutex::new(QueueState {
                queues: (0..num_priorities).map(|_| VecDeque::new()).collect(),
                prefetch: VecDeque::new(),
                enqueued: 0,
                dequeued: 0,
            }),
            not_empty: Condvar::new(),
            prefetch_capacity,
        }
    }

    /// Number of priority levels
    pub fn num_priorities(&self) -> usize {
        self.state.lock().queues.len()
    }

    /// Queue `key` at `priority`
    ///
    /// Priorities past the last level are folded into the last level.
    /// With `to_front` the key is served before everything already waiting
    /// at the same level.
    pub fn put(&self, key: K, priority: usize, to_front: bool) {
        let mut state = self.state.lock();
        let level = priority.min(state.queues.len() - 1);
        let queue = &mut state.queues[level];
        if to_front {
            queue.push_front(key);
        } else {
            queue.push_back(key);
        }
        state.enqueued += 1;
        drop(state);

        self.not_empty.notify_one();
    }

    /// Take the next key without blocking
    pub fn try_take(&self) -> Option<K> {
        self.state.lock().pop_next()
    }

    /// Take the next key, blocking until one is available
    pub fn take(&self) -> K {
        let mut state = self.state.lock();
        loop {
            if let Some(key) = state.pop_next() {
                return key;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Take the next key, waiting at most `timeout`
    ///
    /// Spurious wakeups are absorbed: `None` is only returned once the
    /// timeout has fully elapsed with nothing to take.
    pub fn take_timeout(&self, timeout: Duration) -> Option<K> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(key) = state.pop_next() {
                return Some(key);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return state.pop_next();
            }
        }
    }

    /// Like [`take_timeout`](Self::take_timeout), but hands out nothing while
    /// `held` returns true
    ///
    /// `held` is checked under the queue lock right before every dequeue, so
    /// a key put while the gate is held stays queued. Returns `None` as soon
    /// as a wakeup finds the gate held.
    pub fn take_timeout_unless(&self, timeout: Duration, held: impl Fn() -> bool) -> Option<K> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if held() {
                return None;
            }
            if let Some(key) = state.pop_next() {
                return Some(key);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return if held() { None } else { state.pop_next() };
            }
        }
    }

    /// Wake every thread blocked in `take`/`take_timeout`
    ///
    /// Used on shutdown so that waiting workers re-check their exit flag.
    pub fn notify_all(&self) {
        self.not_empty.notify_all();
    }

    /// Demote all queued keys into the prefetch deque
    ///
    /// Keys keep their dequeue order and go in front of older prefetch keys.
    /// The prefetch deque is then truncated to its capacity, dropping the
    /// oldest keys.
    pub fn clear_to_prefetch(&self) {
        let mut state = self.state.lock();
        let mut demoted: VecDeque<K> = VecDeque::new();
        for queue in state.queues.iter_mut() {
            demoted.extend(queue.drain(..));
        }
        if demoted.is_empty() {
            return;
        }

        demoted.append(&mut state.prefetch);
        demoted.truncate(self.prefetch_capacity);
        state.prefetch = demoted;
        let prefetch = state.prefetch.len();
        drop(state);

        tracing::debug!(prefetch, "demoted fetch queues to prefetch");
        self.not_empty.notify_all();
    }

    /// Drop every queued key, prefetch included
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queues.iter_mut().for_each(VecDeque::clear);
        state.prefetch.clear();
    }

    /// Total number of waiting keys
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.queues.iter().map(VecDeque::len).sum::<usize>() + state.prefetch.len()
    }

    /// Check if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    /// Number of keys waiting at one priority level
    pub fn len_at(&self, priority: usize) -> usize {
        let state = self.state.lock();
        state.queues.get(priority).map_or(0, VecDeque::len)
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            per_priority: state.queues.iter().map(VecDeque::len).collect(),
            prefetch: state.prefetch.len(),
            enqueued: state.enqueued,
            dequeued: state.dequeued,
        }
    }
}

impl<K> Default for FetchQueues<K> {
    fn default() -> Self {
        Self::new(1, DEFAULT_PREFETCH_CAPACITY)
    }
}
