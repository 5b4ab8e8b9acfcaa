//! # Circuit Breaker
//!
//! A three-state gate that stops the ambassador from hammering a broker that
//! is known to be down.
//!
//! ```text
//!            failure_count >= threshold
//!   Closed ───────────────────────────────▶ Open
//!     ▲                                      │
//!     │ success         elapsed > timeout    │
//!     │                                      ▼
//!     └──────────────────────────────── HalfOpen
//!                 failure ─▶ Open (timer refreshed)
//! ```
//!
//! The breaker only grants permission. It never retries on the caller's
//! behalf: callers ask [`CircuitBreaker::allow`], perform the guarded
//! operation themselves and report back with [`CircuitBreaker::record_outcome`].
//!
//! The struct is not internally synchronized. The ambassador keeps it behind
//! the same mutex as its rate limiter so both are updated as one critical
//! section.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Consecutive failures that open the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// How long an open circuit rejects attempts before probing again.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, every attempt is permitted.
    Closed,
    /// Failing fast, attempts are rejected without I/O.
    Open,
    /// Probing, the next attempt decides between `Closed` and `Open`.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(label)
    }
}

/// # Circuit Breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    failure_threshold: u32,
    open_timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_TIMEOUT)
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker. A threshold of zero is treated as one.
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            failure_threshold: failure_threshold.max(1),
            open_timeout,
        }
    }

    /// Asks permission for an attempt now.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Asks permission for an attempt at `now`.
    ///
    /// The only state change this performs is `Open → HalfOpen` once
    /// `open_timeout` has elapsed since the last recorded failure.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = self
                    .last_failure
                    .map_or(true, |at| now.saturating_duration_since(at) > self.open_timeout);
                if expired {
                    self.state = CircuitState::HalfOpen;
                    tracing::info!("circuit breaker HALF_OPEN, letting a probe through");
                }
                expired
            }
        }
    }

    /// Reports the outcome of an attempt made now.
    pub fn record_outcome(&mut self, success: bool) {
        self.record_outcome_at(success, Instant::now());
    }

    /// Reports the outcome of an attempt that finished at `now`.
    pub fn record_outcome_at(&mut self, success: bool, now: Instant) {
        if success {
            if self.state != CircuitState::Closed {
                tracing::info!(previous = %self.state, "circuit breaker CLOSED");
            }
            self.state = CircuitState::Closed;
            self.failure_count = 0;
            return;
        }

        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);

        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                tracing::error!(failures = self.failure_count, "probe failed, circuit breaker OPEN again");
            }
            CircuitState::Closed if self.failure_count >= self.failure_threshold => {
                self.state = CircuitState::Open;
                tracing::error!(
                    failures = self.failure_count,
                    threshold = self.failure_threshold,
                    "circuit breaker OPEN after consecutive failures"
                );
            }
            _ => {}
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Failures recorded since the last success.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Instant of the most recent recorded failure.
    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_breaker(start: Instant) -> CircuitBreaker {
        let mut breaker = CircuitBreaker::new(5, Duration::from_secs(30));
        for i in 0..5 {
            assert!(breaker.allow_at(start));
            breaker.record_outcome_at(false, start + Duration::from_millis(i));
        }
        breaker
    }

    #[test]
    fn threshold_failures_open_the_circuit() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::new(5, Duration::from_secs(30));

        for _ in 0..4 {
            breaker.record_outcome_at(false, start);
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_outcome_at(false, start);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 5);
    }

    #[test]
    fn open_circuit_rejects_until_timeout_then_half_opens() {
        let start = Instant::now();
        let mut breaker = open_breaker(start);

        assert!(!breaker.allow_at(start + Duration::from_secs(10)));
        assert!(!breaker.allow_at(start + Duration::from_secs(30)));
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.allow_at(start + Duration::from_secs(31)));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_and_resets() {
        let start = Instant::now();
        let mut breaker = open_breaker(start);
        assert!(breaker.allow_at(start + Duration::from_secs(31)));

        breaker.record_outcome_at(true, start + Duration::from_secs(31));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.allow_at(start + Duration::from_secs(32)));
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_timer() {
        let start = Instant::now();
        let mut breaker = open_breaker(start);
        let probe_at = start + Duration::from_secs(31);
        assert!(breaker.allow_at(probe_at));

        breaker.record_outcome_at(false, probe_at);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.last_failure(), Some(probe_at));

        // The timeout counts from the failed probe, not from the original trip.
        assert!(!breaker.allow_at(probe_at + Duration::from_secs(20)));
        assert!(breaker.allow_at(probe_at + Duration::from_secs(31)));
    }

    #[test]
    fn success_in_closed_state_resets_count() {
        let start = Instant::now();
        let mut breaker = CircuitBreaker::default();
        breaker.record_outcome_at(false, start);
        breaker.record_outcome_at(false, start);
        breaker.record_outcome_at(true, start);
        assert_eq!(breaker.failure_count(), 0);

        for _ in 0..4 {
            breaker.record_outcome_at(false, start);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn state_labels_match_the_wire_format() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(serde_json::to_string(&CircuitState::Open).unwrap(), "\"OPEN\"");
    }
}
