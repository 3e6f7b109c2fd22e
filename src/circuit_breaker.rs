//! Failure-counting gate in front of the analysis engine.
//!
//! The breaker opens once `failure_threshold` failures have been recorded and
//! stays open until `reset_window` has elapsed since the most recent one. The
//! count itself is only cleared by a successful connect, so after the window
//! expires a single further failure re-opens it immediately.

use std::time::Duration;

use chrono::{DateTime, Utc};
use debrief_commons::SharedClock;
use debrief_config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Read-only view of the breaker for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub threshold: u32,
    pub reset_window_ms: u64,
    pub is_open: bool,
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            config,
            clock,
        }
    }

    /// Record a failure. Returns the new failure count.
    pub fn record_failure(&self) -> u32 {
        let now = self.clock.now();
        let count = {
            let mut state = self.state.lock();
            state.failure_count = state.failure_count.saturating_add(1);
            state.last_failure_at = Some(now);
            state.failure_count
        };

        if count == self.config.failure_threshold {
            warn!(
                failures = count,
                reset_window_ms = self.config.reset_window_ms,
                "circuit breaker opened"
            );
        } else {
            debug!(failures = count, "recorded engine failure");
        }
        count
    }

    /// Clear the failure count after a successful connect.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.failure_count > 0 {
            debug!(previous = state.failure_count, "circuit breaker reset");
        }
        state.failure_count = 0;
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        self.is_open_locked(&state)
    }

    /// Time left until the breaker closes, or `None` if it is closed.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        let state = self.state.lock();
        if !self.is_open_locked(&state) {
            return None;
        }
        let last = state.last_failure_at?;
        let elapsed = self.clock.elapsed_since(last);
        Some(self.config.reset_window().saturating_sub(elapsed))
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock();
        BreakerSnapshot {
            failure_count: state.failure_count,
            last_failure_at: state.last_failure_at,
            threshold: self.config.failure_threshold,
            reset_window_ms: self.config.reset_window_ms,
            is_open: self.is_open_locked(&state),
        }
    }

    fn is_open_locked(&self, state: &BreakerState) -> bool {
        if state.failure_count < self.config.failure_threshold {
            return false;
        }
        match state.last_failure_at {
            Some(last) => self.clock.elapsed_since(last) < self.config.reset_window(),
            None => false,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use debrief_commons::ManualClock;
    use std::sync::Arc;

    fn breaker(clock: &Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 3,
                reset_window_ms: 30_000,
            },
            clock.clone(),
        )
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let clock = ManualClock::at_epoch();
        let breaker = breaker(&clock);

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());

        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn stays_open_for_reset_window_after_last_failure() {
        let clock = ManualClock::at_epoch();
        let breaker = breaker(&clock);

        // Failures at t = 0s, 1s, 2s.
        breaker.record_failure();
        clock.advance_ms(1_000);
        breaker.record_failure();
        clock.advance_ms(1_000);
        breaker.record_failure();
        assert!(breaker.is_open());

        clock.advance_ms(29_999); // t = 31 999ms
        assert!(breaker.is_open());

        clock.advance_ms(1); // t = 32 000ms
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 3);
    }

    #[test]
    fn single_failure_after_window_reopens() {
        let clock = ManualClock::at_epoch();
        let breaker = breaker(&clock);
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance_ms(30_000);
        assert!(!breaker.is_open());

        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_count() {
        let clock = ManualClock::at_epoch();
        let breaker = breaker(&clock);
        for _ in 0..3 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn remaining_cooldown_counts_down() {
        let clock = ManualClock::at_epoch();
        let breaker = breaker(&clock);
        assert_eq!(breaker.remaining_cooldown(), None);

        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance_ms(10_000);
        assert_eq!(
            breaker.remaining_cooldown(),
            Some(Duration::from_millis(20_000))
        );

        let snapshot = breaker.snapshot();
        assert!(snapshot.is_open);
        assert_eq!(snapshot.failure_count, 3);
        assert_eq!(snapshot.threshold, 3);
    }
}
