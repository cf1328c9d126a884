//! Difficulty retargeting
//!
//! Every `window` blocks the difficulty is divided by the ratio of observed
//! to expected window duration, clamped to [1, 4]. Difficulty can only stay
//! flat or fall under this rule; blocks arriving faster than the target never
//! raise it.

use crate::constants::{MAX_ADJUSTMENT_RATIO, MIN_ADJUSTMENT_RATIO};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifficultyAdjuster {
    window: u64,
    target_block_interval: u64,
}

impl DifficultyAdjuster {
    pub fn new(window: u64, target_block_interval: u64) -> Self {
        Self {
            window,
            target_block_interval,
        }
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Expected seconds for one full window
    pub fn target_timespan(&self) -> i64 {
        (self.target_block_interval * self.window) as i64
    }

    /// True at every positive multiple of the window
    pub fn should_adjust(&self, height: u64) -> bool {
        self.window > 0 && height > 0 && height % self.window == 0
    }

    /// Ratio of observed to expected timespan, integer-divided and clamped to [1, 4]
    pub fn clamped_ratio(&self, actual_timespan: i64) -> i64 {
        let target = self.target_timespan().max(1);
        (actual_timespan / target).clamp(MIN_ADJUSTMENT_RATIO, MAX_ADJUSTMENT_RATIO)
    }

    /// Recompute difficulty from block timestamps in chain order.
    ///
    /// Uses the first and last timestamps of the most recent window. Returns
    /// `previous` unchanged when fewer than `window` timestamps exist or the
    /// window spans negative time.
    pub fn adjust(&self, previous: u32, timestamps: &[i64]) -> u32 {
        let window = self.window as usize;
        if window == 0 || timestamps.len() < window {
            return previous;
        }

        let first = timestamps[timestamps.len() - window];
        let last = timestamps[timestamps.len() - 1];
        let actual = last - first;
        if actual < 0 {
            return previous;
        }

        let ratio = self.clamped_ratio(actual);
        let adjusted = (previous as i64 / ratio) as u32;

        info!(
            previous,
            adjusted,
            actual_timespan = actual,
            target_timespan = self.target_timespan(),
            "difficulty adjustment"
        );

        adjusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evenly_spaced(count: usize, spacing: i64) -> Vec<i64> {
        (0..count as i64).map(|i| 1_000_000 + i * spacing).collect()
    }

    #[test]
    fn test_should_adjust() {
        let adjuster = DifficultyAdjuster::new(10, 60);
        assert!(!adjuster.should_adjust(0));
        assert!(!adjuster.should_adjust(9));
        assert!(adjuster.should_adjust(10));
        assert!(adjuster.should_adjust(20));
        assert!(!adjuster.should_adjust(21));
    }

    #[test]
    fn test_insufficient_history_keeps_difficulty() {
        let adjuster = DifficultyAdjuster::new(10, 60);
        assert_eq!(adjuster.adjust(20, &evenly_spaced(9, 60)), 20);
    }

    #[test]
    fn test_on_target_keeps_difficulty() {
        let adjuster = DifficultyAdjuster::new(10, 60);
        // Ten timestamps span nine intervals, so the ratio floors to zero and clamps to one
        assert_eq!(adjuster.adjust(20, &evenly_spaced(10, 60)), 20);
    }

    #[test]
    fn test_slow_blocks_lower_difficulty() {
        let adjuster = DifficultyAdjuster::new(10, 60);
        let timestamps = vec![0, 100, 200, 300, 400, 500, 600, 700, 800, 1200];
        // actual 1200 / target 600 = 2
        assert_eq!(adjuster.adjust(20, &timestamps), 10);
    }

    #[test]
    fn test_ratio_clamped_to_four() {
        let adjuster = DifficultyAdjuster::new(10, 60);
        let mut timestamps = evenly_spaced(10, 60);
        *timestamps.last_mut().unwrap() += 1_000_000;
        assert_eq!(adjuster.adjust(20, &timestamps), 5);
    }

    #[test]
    fn test_zero_timespan_clamped_to_one() {
        let adjuster = DifficultyAdjuster::new(10, 60);
        assert_eq!(adjuster.clamped_ratio(0), 1);
        assert_eq!(adjuster.adjust(20, &vec![5; 10]), 20);
    }

    #[test]
    fn test_negative_timespan_keeps_difficulty() {
        let adjuster = DifficultyAdjuster::new(3, 60);
        assert_eq!(adjuster.adjust(20, &[1000, 500, 100]), 20);
    }

    #[test]
    fn test_only_latest_window_is_measured() {
        let adjuster = DifficultyAdjuster::new(3, 10);
        // The huge gap sits before the last window and must be ignored
        let timestamps = vec![0, 1_000_000, 1_000_010, 1_000_020];
        assert_eq!(adjuster.adjust(12, &timestamps), 12);
    }
}
