// src/telemetry/watchdog.rs
//! Per-user failure watchdog
//!
//! Tracks consecutive failing telemetry events per user. Crossing the
//! threshold emits exactly one alert per streak and arms a one-shot
//! "cold start requested" flag the runner consumes on its next rent.
//! Any successful event clears both the counter and a pending request.

use crate::telemetry::TelemetryRecord;
use dashmap::DashMap;
use tracing::{debug, warn};

/// Alert emitted when a user's failure streak crosses the threshold
#[derive(Debug, Clone)]
pub struct WatchdogAlert {
    pub user_id: String,
    pub consecutive_failures: u32,
    pub record: TelemetryRecord,
}

#[derive(Debug, Default)]
struct FailureState {
    consecutive: u32,
    cold_armed: bool,
}

/// Consecutive-failure tracker with forced-cold escalation
pub struct Watchdog {
    states: DashMap<String, FailureState>,
    threshold: u32,
}

impl Watchdog {
    pub fn new(threshold: u32) -> Self {
        Self {
            states: DashMap::new(),
            threshold: threshold.max(1),
        }
    }

    /// Account one telemetry event; returns an alert when the streak
    /// crosses the threshold
    pub fn observe(&self, record: &TelemetryRecord) -> Option<WatchdogAlert> {
        if !record.is_failure() {
            // Success clears the counter and any pending cold-start request
            self.states.remove(&record.subject);
            return None;
        }

        let mut state = self.states.entry(record.subject.clone()).or_default();
        state.consecutive += 1;

        if state.consecutive == self.threshold {
            state.cold_armed = true;
            warn!(
                user = %record.subject,
                failures = state.consecutive,
                "Failure streak crossed threshold, requesting cold sandbox"
            );
            metrics::counter!("watchdog_alerts_total").increment(1);
            return Some(WatchdogAlert {
                user_id: record.subject.clone(),
                consecutive_failures: state.consecutive,
                record: record.clone(),
            });
        }

        debug!(
            user = %record.subject,
            failures = state.consecutive,
            "Failure streak continues"
        );
        None
    }

    /// Consume the one-shot cold-start request for a user
    ///
    /// Returns true exactly once per armed streak, then false until a fresh
    /// streak re-arms it.
    pub fn try_consume_cold_start(&self, user_id: &str) -> bool {
        match self.states.get_mut(user_id) {
            Some(mut state) if state.cold_armed => {
                state.cold_armed = false;
                true
            }
            _ => false,
        }
    }

    /// Current consecutive-failure count for a user
    pub fn failure_count(&self, user_id: &str) -> u32 {
        self.states
            .get(user_id)
            .map(|state| state.consecutive)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(user: &str) -> TelemetryRecord {
        TelemetryRecord::execution(user, 1, 100, true, false, Some("timeout".to_string()), 0)
    }

    fn passing(user: &str) -> TelemetryRecord {
        TelemetryRecord::execution(user, 1, 10, false, false, None, 0)
    }

    #[test]
    fn test_threshold_emits_exactly_one_alert() {
        let watchdog = Watchdog::new(3);

        assert!(watchdog.observe(&failing("x")).is_none());
        assert!(watchdog.observe(&failing("x")).is_none());

        let alert = watchdog.observe(&failing("x"));
        assert!(alert.is_some());
        assert_eq!(alert.unwrap().consecutive_failures, 3);

        // Further failures extend the streak without a fresh alert
        assert!(watchdog.observe(&failing("x")).is_none());
        assert_eq!(watchdog.failure_count("x"), 4);
    }

    #[test]
    fn test_cold_start_consumed_once() {
        let watchdog = Watchdog::new(3);
        for _ in 0..3 {
            watchdog.observe(&failing("x"));
        }

        assert!(watchdog.try_consume_cold_start("x"));
        assert!(!watchdog.try_consume_cold_start("x"));
    }

    #[test]
    fn test_success_resets_everything() {
        let watchdog = Watchdog::new(3);
        for _ in 0..3 {
            watchdog.observe(&failing("x"));
        }

        watchdog.observe(&passing("x"));
        assert_eq!(watchdog.failure_count("x"), 0);
        assert!(!watchdog.try_consume_cold_start("x"));

        // A fresh streak re-arms the request
        for _ in 0..3 {
            watchdog.observe(&failing("x"));
        }
        assert!(watchdog.try_consume_cold_start("x"));
    }

    #[test]
    fn test_users_tracked_independently() {
        let watchdog = Watchdog::new(2);
        watchdog.observe(&failing("a"));
        watchdog.observe(&failing("b"));
        assert!(watchdog.observe(&failing("a")).is_some());
        assert_eq!(watchdog.failure_count("b"), 1);
    }

    #[test]
    fn test_scheduler_fault_counts_as_failure() {
        let watchdog = Watchdog::new(1);
        let record = TelemetryRecord::scheduler_fault("x", 1, "worker blew up");
        assert!(watchdog.observe(&record).is_some());
    }
}
