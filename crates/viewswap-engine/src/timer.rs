//! View-verification timer
//!
//! A required dwell is drawn once per delivered link and kept for every
//! "done" press on that link. Checks are pure wall-clock comparisons.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Draws required dwell times and checks them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DwellTimer {
    min_secs: u64,
    max_secs: u64,
}

impl DwellTimer {
    /// Create a timer drawing from `min_secs..=max_secs`
    ///
    /// An inverted range collapses to `min_secs`.
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            max_secs: max_secs.max(min_secs),
        }
    }

    /// Draw the required dwell for a newly delivered link
    pub fn start(&self) -> u64 {
        rand::rng().random_range(self.min_secs..=self.max_secs)
    }

    /// Whether `required_secs` have elapsed since `started_at`
    pub fn check(started_at: DateTime<Utc>, required_secs: u64, now: DateTime<Utc>) -> bool {
        now >= deadline(started_at, required_secs)
    }

    /// Whole seconds left until the dwell is satisfied (rounded up)
    pub fn remaining_secs(started_at: DateTime<Utc>, required_secs: u64, now: DateTime<Utc>) -> u64 {
        let left = deadline(started_at, required_secs) - now;
        if left <= Duration::zero() {
            return 0;
        }
        let millis = left.num_milliseconds() as u64;
        millis.div_ceil(1000)
    }
}

fn deadline(started_at: DateTime<Utc>, required_secs: u64) -> DateTime<Utc> {
    started_at + Duration::seconds(i64::try_from(required_secs).unwrap_or(i64::MAX / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_within_range() {
        let timer = DwellTimer::new(60, 90);
        for _ in 0..500 {
            let required = timer.start();
            assert!((60..=90).contains(&required), "{required} out of range");
        }
    }

    #[test]
    fn test_degenerate_range() {
        assert_eq!(DwellTimer::new(5, 5).start(), 5);
        assert_eq!(DwellTimer::new(7, 3).start(), 7);
    }

    #[test]
    fn test_check_boundary() {
        let start = Utc::now();
        let required = 75;

        for offset in [0i64, 1, 30, 74] {
            let now = start + Duration::seconds(offset);
            assert!(!DwellTimer::check(start, required, now), "{offset}s");
        }
        let just_before = start + Duration::seconds(75) - Duration::milliseconds(1);
        assert!(!DwellTimer::check(start, required, just_before));

        assert!(DwellTimer::check(start, required, start + Duration::seconds(75)));
        assert!(DwellTimer::check(start, required, start + Duration::seconds(500)));
    }

    #[test]
    fn test_remaining_rounds_up() {
        let start = Utc::now();
        assert_eq!(DwellTimer::remaining_secs(start, 60, start), 60);
        assert_eq!(
            DwellTimer::remaining_secs(start, 60, start + Duration::milliseconds(59_500)),
            1
        );
        assert_eq!(
            DwellTimer::remaining_secs(start, 60, start + Duration::seconds(61)),
            0
        );
    }
}
