//! Hierarchical I/O time budget
//!
//! Bounds how much blocking storage I/O a render frame may perform. The
//! budget holds one nanosecond allowance per priority level, reset once per
//! frame by the controller and consumed by budgeted blocking loads.
//!
//! Invariant: `budget[i] >= budget[i + 1]` for all adjacent levels. A
//! lower-priority level never has more time left than a higher one. Spending
//! time at level `l` charges every level `0..=l`, then clamps the deeper
//! levels down so the invariant still holds.
//!
//! Remaining times are signed. Overspending drives a level negative, which
//! reads as "no time left" and is never an error.

use parking_lot::Mutex;
use std::time::Duration;

/// Convert a duration to signed nanoseconds, saturating
///
/// ```
/// use pyramid_scheduler::duration_to_nanos;
/// use std::time::Duration;
///
/// assert_eq!(duration_to_nanos(Duration::from_millis(3)), 3_000_000);
/// assert_eq!(duration_to_nanos(Duration::MAX), i64::MAX);
/// ```
pub fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Per-priority I/O time budget
///
/// # Example
///
/// ```
/// use pyramid_scheduler::IoTimeBudget;
/// use std::time::Duration;
///
/// let budget = IoTimeBudget::new(3);
/// budget.reset_durations(&[
///     Duration::from_millis(100),
///     Duration::from_millis(50),
///     Duration::from_millis(10),
/// ]);
///
/// budget.consume(Duration::from_millis(30), 1);
/// assert_eq!(budget.remaining(0), Duration::from_millis(70));
/// assert_eq!(budget.remaining(1), Duration::from_millis(20));
/// assert_eq!(budget.remaining(2), Duration::from_millis(10));
/// ```
#[derive(Debug)]
pub struct IoTimeBudget {
    budget: Mutex<Vec<i64>>,
}

impl IoTimeBudget {
    /// Create a budget with `num_levels` levels (at least one), all empty
    pub fn new(num_levels: usize) -> Self {
        Self {
            budget: Mutex::new(vec![0; num_levels.max(1)]),
        }
    }

    /// Number of configured levels
    pub fn num_levels(&self) -> usize {
        self.budget.lock().len()
    }

    /// Replace the budget for a new frame
    ///
    /// `partial[i]` is the allowance in nanoseconds for level `i`. Levels past
    /// the end of `partial` inherit its last value, and an empty slice clears
    /// the budget. The result is clamped so that no level exceeds the one
    /// above it.
    pub fn reset(&self, partial: &[i64]) {
        let mut budget = self.budget.lock();
        let Some(&last) = partial.last() else {
            budget.fill(0);
            return;
        };

        for (level, slot) in budget.iter_mut().enumerate() {
            *slot = partial.get(level).copied().unwrap_or(last);
        }
        normalize_from(&mut budget, 1);
    }

    /// Like [`reset`](Self::reset), taking durations
    pub fn reset_durations(&self, partial: &[Duration]) {
        let nanos: Vec<i64> = partial.iter().copied().map(duration_to_nanos).collect();
        self.reset(&nanos);
    }

    /// Set every level to zero
    pub fn clear(&self) {
        self.budget.lock().fill(0);
    }

    /// Remaining nanoseconds at `level`
    ///
    /// Levels past the configured range read the deepest level. The result
    /// may be negative after overspending.
    pub fn time_left(&self, level: usize) -> i64 {
        let budget = self.budget.lock();
        budget[level.min(budget.len() - 1)]
    }

    /// Remaining time at `level`, clamped at zero
    pub fn remaining(&self, level: usize) -> Duration {
        Duration::from_nanos(self.time_left(level).max(0) as u64)
    }

    /// Check whether `level` has any time left
    pub fn has_time_left(&self, level: usize) -> bool {
        self.time_left(level) > 0
    }

    /// Charge `nanos` to every level at or above `level`
    ///
    /// Deeper levels are then clamped down to the new value of the level
    /// above them. Negative charges count as zero; spending never adds time.
    pub fn use_nanos(&self, nanos: i64, level: usize) {
        let nanos = nanos.max(0);
        let mut budget = self.budget.lock();
        let charged = level.min(budget.len() - 1) + 1;
        for slot in &mut budget[..charged] {
            *slot = slot.saturating_sub(nanos);
        }
        normalize_from(&mut budget, charged);
    }

    /// Like [`use_nanos`](Self::use_nanos), taking a duration
    pub fn consume(&self, duration: Duration, level: usize) {
        self.use_nanos(duration_to_nanos(duration), level);
    }

    /// Copy of the whole budget, level 0 first
    pub fn snapshot(&self) -> Vec<i64> {
        self.budget.lock().clone()
    }
}

impl Default for IoTimeBudget {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Clamp `budget[from..]` so that no level exceeds its predecessor
fn normalize_from(budget: &mut [i64], from: usize) {
    for level in from.max(1)..budget.len() {
        if budget[level] > budget[level - 1] {
            budget[level] = budget[level - 1];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const MS: i64 = 1_000_000;

    fn assert_monotonic(budget: &IoTimeBudget) {
        let levels = budget.snapshot();
        for pair in levels.windows(2) {
            assert!(pair[0] >= pair[1], "budget not monotonic: {levels:?}");
        }
    }

    #[test]
    fn test_new_budget_is_empty() {
        let budget = IoTimeBudget::new(3);
        assert_eq!(budget.num_levels(), 3);
        assert_eq!(budget.snapshot(), vec![0, 0, 0]);
        assert!(!budget.has_time_left(0));
    }

    #[test]
    fn test_zero_levels_means_one() {
        let budget = IoTimeBudget::new(0);
        assert_eq!(budget.num_levels(), 1);
    }

    #[test]
    fn test_use_at_middle_level() {
        let budget = IoTimeBudget::new(3);
        budget.reset(&[100 * MS, 50 * MS, 10 * MS]);

        budget.use_nanos(30 * MS, 1);

        assert_eq!(budget.time_left(0), 70 * MS);
        assert_eq!(budget.time_left(1), 20 * MS);
        assert_eq!(budget.time_left(2), 10 * MS);
    }

    #[test]
    fn test_use_clamps_lower_levels() {
        let budget = IoTimeBudget::new(2);
        budget.reset(&[100 * MS, 50 * MS]);

        budget.use_nanos(60 * MS, 0);

        assert_eq!(budget.time_left(0), 40 * MS);
        assert_eq!(budget.time_left(1), 40 * MS);
    }

    #[test]
    fn test_reset_clamps_increasing_input() {
        let budget = IoTimeBudget::new(3);
        budget.reset(&[10 * MS, 50 * MS, 5 * MS]);
        assert_eq!(budget.snapshot(), vec![10 * MS, 10 * MS, 5 * MS]);
    }

    #[test]
    fn test_reset_short_input_inherits_last() {
        let budget = IoTimeBudget::new(4);
        budget.reset(&[100 * MS, 20 * MS]);
        assert_eq!(budget.snapshot(), vec![100 * MS, 20 * MS, 20 * MS, 20 * MS]);
    }

    #[test]
    fn test_reset_long_input_is_truncated() {
        let budget = IoTimeBudget::new(2);
        budget.reset(&[100 * MS, 20 * MS, 5 * MS]);
        assert_eq!(budget.snapshot(), vec![100 * MS, 20 * MS]);
    }

    #[test]
    fn test_reset_empty_clears() {
        let budget = IoTimeBudget::new(2);
        budget.reset(&[100 * MS]);
        budget.reset(&[]);
        assert_eq!(budget.snapshot(), vec![0, 0]);
    }

    #[test]
    fn test_time_left_past_last_level() {
        let budget = IoTimeBudget::new(2);
        budget.reset(&[100 * MS, 20 * MS]);
        assert_eq!(budget.time_left(2), 20 * MS);
        assert_eq!(budget.time_left(99), 20 * MS);
    }

    #[test]
    fn test_use_past_last_level_charges_all() {
        let budget = IoTimeBudget::new(2);
        budget.reset(&[100 * MS, 20 * MS]);
        budget.use_nanos(5 * MS, 7);
        assert_eq!(budget.snapshot(), vec![95 * MS, 15 * MS]);
    }

    #[test]
    fn test_overspending_goes_negative_and_reads_as_empty() {
        let budget = IoTimeBudget::new(2);
        budget.reset(&[10 * MS, 10 * MS]);
        budget.use_nanos(25 * MS, 1);

        assert_eq!(budget.time_left(0), -15 * MS);
        assert_eq!(budget.remaining(0), Duration::ZERO);
        assert!(!budget.has_time_left(1));
    }

    #[test]
    fn test_negative_charge_adds_no_time() {
        let budget = IoTimeBudget::new(2);
        budget.reset(&[100, 50]);
        budget.use_nanos(-30, 0);
        assert_eq!(budget.snapshot(), vec![100, 50]);

        budget.use_nanos(i64::MIN, 1);
        assert_eq!(budget.snapshot(), vec![100, 50]);
    }

    #[test]
    fn test_zero_budget_has_no_time_left() {
        let budget = IoTimeBudget::new(3);
        budget.reset(&[10 * MS, 5 * MS, 0]);
        assert!(budget.has_time_left(1));
        assert!(!budget.has_time_left(2));
    }

    #[test]
    fn test_durations() {
        let budget = IoTimeBudget::new(2);
        budget.reset_durations(&[Duration::from_millis(100), Duration::from_millis(50)]);
        budget.consume(Duration::from_millis(60), 0);
        assert_eq!(budget.remaining(0), Duration::from_millis(40));
        assert_eq!(budget.remaining(1), Duration::from_millis(40));
    }

    #[test]
    fn test_clear() {
        let budget = IoTimeBudget::new(2);
        budget.reset(&[10 * MS]);
        budget.clear();
        assert_eq!(budget.snapshot(), vec![0, 0]);
    }

    #[test]
    fn test_random_sequences_keep_invariants() {
        let mut rng = rand::thread_rng();
        let budget = IoTimeBudget::new(5);

        for _ in 0..200 {
            if rng.gen_bool(0.1) {
                let len = rng.gen_range(0..7);
                let partial: Vec<i64> = (0..len).map(|_| rng.gen_range(0..200) * MS).collect();
                budget.reset(&partial);
                assert_monotonic(&budget);
                continue;
            }

            let level = rng.gen_range(0..7);
            let spent = rng.gen_range(-10..40) * MS;
            let charged = spent.max(0);
            let before = budget.snapshot();
            budget.use_nanos(spent, level);
            let after = budget.snapshot();

            assert_monotonic(&budget);
            for l in 0..before.len() {
                if l <= level {
                    assert_eq!(after[l], before[l] - charged, "level {l} not charged exactly");
                } else {
                    assert!(after[l] <= before[l], "level {l} grew");
                }
            }
        }
    }
}
