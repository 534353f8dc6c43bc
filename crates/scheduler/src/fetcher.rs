//! Fetcher thread pool for background cell loading.
//!
//! A fixed set of worker threads drains the [`FetchQueues`] and hands every
//! key to a [`Fetch`] implementation, which performs the actual storage read.
//! Workers run until the pool is shut down. A failing or panicking fetch is
//! logged and the worker moves on to the next key.

use crate::pause::PauseControl;
use crate::queue::FetchQueues;
use std::fmt::Display;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Work performed by the fetcher threads for each dequeued key.
pub trait Fetch<K>: Send + Sync + 'static {
    /// Error reported by a failed fetch. Logged, never propagated.
    type Error: Display;

    /// Load the data for `key`, if it still needs loading.
    fn fetch(&self, key: &K) -> Result<(), Self::Error>;

    /// Called once on every worker thread before its loop starts.
    fn on_worker_start(&self, _worker: usize) {}
}

/// Configuration for the fetcher threads.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores, at most 8.
    pub num_threads: usize,

    /// Longest time a worker blocks on an empty queue or a pause before
    /// re-checking for shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// Prefix of the worker thread names.
    pub thread_name: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
            poll_interval: Duration::from_millis(100),
            thread_name: "fetcher".to_string(),
        }
    }
}

impl FetcherConfig {
    /// Create a configuration with `num_threads` workers.
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Self::default()
        }
    }

    /// Set the poll interval for workers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Fixed pool of fetcher threads.
///
/// # Example
///
/// ```
/// use pyramid_scheduler::{Fetch, FetchQueues, FetcherConfig, FetcherThreads};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// struct Sum(AtomicU64);
///
/// impl Fetch<u64> for Sum {
///     type Error = std::convert::Infallible;
///
///     fn fetch(&self, key: &u64) -> Result<(), Self::Error> {
///         self.0.fetch_add(*key, Ordering::SeqCst);
///         Ok(())
///     }
/// }
///
/// let queues = Arc::new(FetchQueues::new(2, 16));
/// let sum = Arc::new(Sum(AtomicU64::new(0)));
/// let pool = FetcherThreads::spawn(queues.clone(), sum.clone(), FetcherConfig::new(2)).unwrap();
///
/// queues.put(40, 0, true);
/// queues.put(2, 1, true);
///
/// while sum.0.load(Ordering::SeqCst) != 42 {
///     std::thread::yield_now();
/// }
/// pool.shutdown();
/// ```
pub struct FetcherThreads {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    pause: Arc<PauseControl>,
    wake_queues: Box<dyn Fn() + Send + Sync>,
}

impl FetcherThreads {
    /// Spawn the workers.
    ///
    /// Fails if the operating system refuses to create a thread; workers
    /// spawned before the failure are shut down again.
    pub fn spawn<K, F>(
        queues: Arc<FetchQueues<K>>,
        fetcher: Arc<F>,
        config: FetcherConfig,
    ) -> io::Result<Self>
    where
        K: Send + 'static,
        F: Fetch<K>,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let pause = Arc::new(PauseControl::new());
        let wake_queues: Box<dyn Fn() + Send + Sync> = {
            let queues = queues.clone();
            Box::new(move || queues.notify_all())
        };

        let mut pool = Self {
            workers: Vec::with_capacity(config.num_threads),
            shutdown,
            pause,
            wake_queues,
        };

        for id in 0..config.num_threads {
            let worker = Worker {
                id,
                queues: queues.clone(),
                fetcher: fetcher.clone(),
                shutdown: pool.shutdown.clone(),
                pause: pool.pause.clone(),
                poll_interval: config.poll_interval,
            };

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, id))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(error) => {
                    pool.stop_and_join();
                    return Err(error);
                }
            }
        }

        tracing::debug!(threads = pool.workers.len(), "fetcher threads started");
        Ok(pool)
    }

    /// Get the number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Check if the pool is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Pause dequeuing for `duration`. Running loads are not interrupted.
    pub fn pause_for(&self, duration: Duration) {
        self.pause.pause_for(duration);
    }

    /// Pause dequeuing until `deadline`. Running loads are not interrupted.
    pub fn pause_until(&self, deadline: Instant) {
        self.pause.pause_until(deadline);
    }

    /// End any pause and wake all workers.
    pub fn wake_up(&self) {
        self.pause.wake_up();
        (self.wake_queues)();
    }

    /// Check if the workers are currently paused.
    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Shut down the pool and wait for the workers to exit.
    ///
    /// Loads already in progress complete first; queued keys stay queued.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.pause.notify_all();
        (self.wake_queues)();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("fetcher thread terminated abnormally");
            }
        }
    }
}

impl Drop for FetcherThreads {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop_and_join();
        }
    }
}

/// A single worker thread's state.
struct Worker<K, F> {
    id: usize,
    queues: Arc<FetchQueues<K>>,
    fetcher: Arc<F>,
    shutdown: Arc<AtomicBool>,
    pause: Arc<PauseControl>,
    poll_interval: Duration,
}

impl<K, F: Fetch<K>> Worker<K, F> {
    /// Main worker loop.
    ///
    /// Wait out any pause, take the next key (waking up every poll interval
    /// to check for shutdown) and fetch it. The pause is checked again at
    /// dequeue time.
    fn run(self) {
        self.fetcher.on_worker_start(self.id);
        tracing::debug!(worker = self.id, "fetcher thread running");

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            self.pause.wait_while_paused(&self.shutdown, self.poll_interval);
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            // A pause that starts while this worker waits for a key must
            // still keep the next key queued.
            let pause = &self.pause;
            let Some(key) = self
                .queues
                .take_timeout_unless(self.poll_interval, || pause.is_paused())
            else {
                continue;
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.fetcher.fetch(&key)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(worker = self.id, %error, "background fetch failed");
                }
                Err(_) => {
                    tracing::error!(worker = self.id, "background fetch panicked");
                }
            }
        }

        tracing::debug!(worker = self.id, "fetcher thread stopped");
    }
}

/// Number of logical CPU cores, clamped to 1..=8.
///
/// This is used as the default number of fetcher threads.
pub fn default_num_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, 8)
}
