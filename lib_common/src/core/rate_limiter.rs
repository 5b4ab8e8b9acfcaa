//! # Sliding Window Rate Limiter
//!
//! Keeps the instants of recent admissions and rejects a new one when the
//! trailing one-second window is already full. Rejections are not recorded,
//! so a rejected caller does not push the window forward.
//!
//! This is a best-effort sliding log, not a token bucket: admissions clustered
//! on either side of a window boundary can briefly exceed `rate_limit` within
//! a fractional second.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Admissions allowed per window.
pub const DEFAULT_RATE_LIMIT: usize = 10;
/// Length of the sliding window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// # Rate Limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    rate_limit: usize,
    window: VecDeque<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT)
    }
}

impl RateLimiter {
    /// Creates a limiter admitting `rate_limit` operations per second.
    pub fn new(rate_limit: usize) -> Self {
        Self {
            rate_limit,
            window: VecDeque::with_capacity(rate_limit),
        }
    }

    /// Tries to admit one operation now.
    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Tries to admit one operation at `now`.
    pub fn admit_at(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.window.front() {
            if now.saturating_duration_since(*oldest) >= RATE_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.len() >= self.rate_limit {
            return false;
        }
        self.window.push_back(now);
        true
    }

    /// Admissions currently inside the window, as of the last check.
    pub fn in_window(&self) -> usize {
        self.window.len()
    }

    /// Configured admissions per window.
    pub fn rate_limit(&self) -> usize {
        self.rate_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_exactly_the_limit_within_a_window() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(10);

        for i in 0..10 {
            assert!(limiter.admit_at(start + Duration::from_millis(i * 10)), "admission {i}");
        }
        assert!(!limiter.admit_at(start + Duration::from_millis(150)));
        assert_eq!(limiter.in_window(), 10);
    }

    #[test]
    fn rejection_does_not_record() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(2);
        assert!(limiter.admit_at(start));
        assert!(limiter.admit_at(start));
        for _ in 0..5 {
            assert!(!limiter.admit_at(start + Duration::from_millis(500)));
        }
        // Only the two accepted instants expire; the rejections left no trace.
        assert!(limiter.admit_at(start + Duration::from_secs(1)));
        assert!(limiter.admit_at(start + Duration::from_secs(1)));
        assert!(!limiter.admit_at(start + Duration::from_secs(1)));
    }

    #[test]
    fn admissions_resume_after_the_window_elapses() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.admit_at(start));
        }
        assert!(!limiter.admit_at(start + Duration::from_millis(999)));
        assert!(limiter.admit_at(start + Duration::from_millis(1000)));
    }

    #[test]
    fn window_slides_one_entry_at_a_time() {
        let start = Instant::now();
        let mut limiter = RateLimiter::new(2);
        assert!(limiter.admit_at(start));
        assert!(limiter.admit_at(start + Duration::from_millis(600)));
        assert!(!limiter.admit_at(start + Duration::from_millis(900)));
        // The first entry expires at 1000ms, the second one is still live.
        assert!(limiter.admit_at(start + Duration::from_millis(1000)));
        assert!(!limiter.admit_at(start + Duration::from_millis(1500)));
        assert!(limiter.admit_at(start + Duration::from_millis(1600)));
    }

    #[test]
    fn zero_limit_rejects_everything() {
        let mut limiter = RateLimiter::new(0);
        assert!(!limiter.admit());
    }
}
