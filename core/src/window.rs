//! Rolling outcome counters
//!
//! `Counts` is the metrics window of a single breaker. It answers two
//! questions: has failure come to dominate (trip), and have enough probes
//! succeeded (close).

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome counters for the current window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
    /// Clock offset at which this window began
    pub window_start: Duration,
}

impl Counts {
    /// Empty counters for a window starting at `now`
    pub fn starting_at(now: Duration) -> Self {
        Self {
            window_start: now,
            ..Default::default()
        }
    }

    /// Zero every counter and start a fresh window
    pub fn reset(&mut self, now: Duration) {
        *self = Self::starting_at(now);
    }

    /// Start a new window if the current one has expired
    pub fn roll(&mut self, now: Duration, window: Duration) {
        if now.saturating_sub(self.window_start) >= window {
            self.reset(now);
        }
    }

    pub fn record_success(&mut self) {
        self.requests += 1;
        self.successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.requests += 1;
        self.failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    /// Failure percentage of this window, rounded down
    pub fn error_percent(&self) -> u64 {
        if self.requests == 0 {
            0
        } else {
            self.failures * 100 / self.requests
        }
    }

    /// True once volume is met and either failure threshold is reached
    pub fn should_trip(&self, config: &Config) -> bool {
        if self.requests == 0 || self.requests < config.request_volume_threshold {
            return false;
        }

        // Check absolute count threshold
        if let Some(threshold) = config.failure_threshold
            && self.failures >= threshold
        {
            return true;
        }

        // Check percentage threshold
        if let Some(percent) = config.error_percent_threshold
            && self.error_percent() >= u64::from(percent)
        {
            return true;
        }

        false
    }

    /// True once enough consecutive probe successes have accrued
    pub fn should_close(&self, config: &Config) -> bool {
        self.consecutive_successes >= config.required_successes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failures: Option<u64>, volume: u64, percent: Option<u8>) -> Config {
        Config {
            failure_threshold: failures,
            request_volume_threshold: volume,
            error_percent_threshold: percent,
            ..Default::default()
        }
    }

    #[test]
    fn test_counters_track_consecutive_runs() {
        let mut counts = Counts::default();

        counts.record_failure();
        counts.record_failure();
        assert_eq!(counts.consecutive_failures, 2);

        counts.record_success();
        assert_eq!(counts.consecutive_failures, 0);
        assert_eq!(counts.consecutive_successes, 1);
        assert_eq!(counts.requests, 3);
        assert_eq!(counts.failures, 2);
        assert_eq!(counts.successes, 1);
    }

    #[test]
    fn test_count_threshold_needs_volume() {
        let config = config(Some(3), 10, None);
        let mut counts = Counts::default();

        for _ in 0..5 {
            counts.record_failure();
        }
        assert!(!counts.should_trip(&config), "Volume not reached yet");

        for _ in 0..5 {
            counts.record_success();
        }
        assert!(counts.should_trip(&config));
    }

    #[test]
    fn test_percent_threshold() {
        let config = config(None, 4, Some(50));
        let mut counts = Counts::default();

        counts.record_success();
        counts.record_success();
        counts.record_success();
        counts.record_failure();
        assert_eq!(counts.error_percent(), 25);
        assert!(!counts.should_trip(&config));

        counts.record_failure();
        counts.record_failure();
        assert_eq!(counts.error_percent(), 50);
        assert!(counts.should_trip(&config));
    }

    #[test]
    fn test_disabled_thresholds_never_trip() {
        let config = config(None, 1, None);
        let mut counts = Counts::default();

        for _ in 0..100 {
            counts.record_failure();
        }
        assert!(!counts.should_trip(&config));
    }

    #[test]
    fn test_zero_volume_without_requests_does_not_trip() {
        let config = config(Some(0), 0, Some(0));
        assert!(!Counts::default().should_trip(&config));
    }

    #[test]
    fn test_roll_resets_after_window() {
        let window = Duration::from_secs(10);
        let mut counts = Counts::starting_at(Duration::from_secs(100));

        counts.record_failure();
        counts.roll(Duration::from_secs(109), window);
        assert_eq!(counts.failures, 1, "Window still open");

        counts.roll(Duration::from_secs(110), window);
        assert_eq!(counts.failures, 0);
        assert_eq!(counts.window_start, Duration::from_secs(110));
    }

    #[test]
    fn test_roll_tolerates_clock_behind_window_start() {
        let mut counts = Counts::starting_at(Duration::from_secs(50));
        counts.record_success();

        counts.roll(Duration::from_secs(40), Duration::from_secs(10));
        assert_eq!(counts.successes, 1);
    }

    #[test]
    fn test_should_close_uses_required_successes() {
        let config = Config {
            probe_limit: 2,
            ..Default::default()
        };
        let mut counts = Counts::default();

        counts.record_success();
        assert!(!counts.should_close(&config));
        counts.record_success();
        assert!(counts.should_close(&config));
    }
}
