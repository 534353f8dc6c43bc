//! Pause control for fetcher threads
//!
//! Lets a controller throttle background loading, for instance while the
//! user is dragging the view and the render thread wants the I/O bandwidth
//! for itself. Pausing never aborts a load that is already running; it only
//! keeps the workers from dequeuing the next key.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared pause state for a set of worker threads
///
/// # Example
///
/// ```
/// use pyramid_scheduler::PauseControl;
/// use std::time::Duration;
///
/// let pause = PauseControl::new();
/// pause.pause_for(Duration::from_secs(10));
/// assert!(pause.is_paused());
///
/// pause.wake_up();
/// assert!(!pause.is_paused());
/// ```
#[derive(Debug, Default)]
pub struct PauseControl {
    until: Mutex<Option<Instant>>,
    changed: Condvar,
}

impl PauseControl {
    /// Create an unpaused control
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause the workers for `duration` from now
    pub fn pause_for(&self, duration: Duration) {
        self.pause_until(Instant::now() + duration);
    }

    /// Pause the workers until `deadline`
    ///
    /// Replaces any earlier pause, even a longer one.
    pub fn pause_until(&self, deadline: Instant) {
        *self.until.lock() = Some(deadline);
        self.changed.notify_all();
        tracing::debug!(?deadline, "fetcher threads paused");
    }

    /// End any pause immediately and wake the workers
    pub fn wake_up(&self) {
        *self.until.lock() = None;
        self.changed.notify_all();
    }

    /// Check if a pause is currently in effect
    pub fn is_paused(&self) -> bool {
        self.paused_until().is_some()
    }

    /// Deadline of the current pause, if one is in effect
    pub fn paused_until(&self) -> Option<Instant> {
        let until = *self.until.lock();
        until.filter(|deadline| *deadline > Instant::now())
    }

    /// Block the calling worker while a pause is in effect
    ///
    /// Returns early when `shutdown` is raised. Wakeups (spurious, from
    /// [`wake_up`](Self::wake_up) or from a new pause) simply cause the
    /// condition to be re-checked. Waits are capped at `recheck` so that a
    /// shutdown flag raised without a notification is still noticed.
    pub fn wait_while_paused(&self, shutdown: &AtomicBool, recheck: Duration) {
        let mut until = self.until.lock();
        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            let Some(deadline) = *until else {
                return;
            };
            let now = Instant::now();
            if deadline <= now {
                *until = None;
                return;
            }
            let wake_at = deadline.min(now + recheck);
            self.changed.wait_until(&mut until, wake_at);
        }
    }

    /// Wake every waiting worker without changing the pause
    pub fn notify_all(&self) {
        self.changed.notify_all();
    }
}
