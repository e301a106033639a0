//! Breaker configuration and validation

use crate::errors::ConfigError;
use std::time::Duration;

/// Circuit breaker configuration
///
/// Immutable once a breaker is built. Use [`Config::validate`] (called by the
/// builder and the registry) to reject out-of-range values at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Failures within the rolling window required to trip (absolute count)
    /// If None, only the percentage threshold is used
    pub failure_threshold: Option<u64>,

    /// Minimum calls within the rolling window before any trip decision is made
    pub request_volume_threshold: u64,

    /// Failure percentage (0-100) within the rolling window required to trip
    /// If None, only the absolute count threshold is used
    pub error_percent_threshold: Option<u8>,

    /// Span over which outcomes are aggregated while Closed
    pub rolling_window: Duration,

    /// Time spent Open before a probe is allowed
    pub cooldown: Duration,

    /// Maximum concurrent probes while HalfOpen
    pub probe_limit: usize,

    /// How long full probe slots may go without an outcome before they are
    /// reclaimed and the outstanding probes are disowned
    pub probe_timeout: Duration,

    /// Consecutive probe successes needed to close; defaults to `probe_limit`
    pub success_threshold: Option<u64>,

    /// Jitter factor for the cooldown (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: cooldown * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,

    /// Lock TTL for the distributed backend
    pub lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: Some(5),
            request_volume_threshold: 5,
            error_percent_threshold: None,
            rolling_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            probe_limit: 1,
            probe_timeout: Duration::from_secs(30),
            success_threshold: None,
            jitter_factor: 0.0,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Check every threshold is in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_limit == 0 {
            return Err(ConfigError::ZeroProbeLimit);
        }
        if let Some(percent) = self.error_percent_threshold
            && percent > 100
        {
            return Err(ConfigError::ErrorPercentOutOfRange(percent));
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::ZeroProbeTimeout);
        }
        if self.rolling_window.is_zero() {
            return Err(ConfigError::ZeroRollingWindow);
        }
        if self.success_threshold == Some(0) {
            return Err(ConfigError::ZeroSuccessThreshold);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange(self.jitter_factor));
        }
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::ZeroLockTimeout);
        }
        Ok(())
    }

    /// Consecutive successes required in HalfOpen before closing
    pub fn required_successes(&self) -> u64 {
        self.success_threshold.unwrap_or(self.probe_limit as u64)
    }

    /// Cooldown to apply for the Open period that starts now
    pub(crate) fn cooldown_with_jitter(&self) -> Duration {
        if self.jitter_factor <= 0.0 {
            return self.cooldown;
        }

        let cooldown_ms = u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX);
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: cooldown_ms,
            multiplier: 1.0,
            max_delay_ms: cooldown_ms,
        };
        Duration::from_millis(policy.calculate_delay(1, self.jitter_factor) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.required_successes(), 1);
    }

    #[test]
    fn test_zero_probe_limit_rejected() {
        let config = Config {
            probe_limit: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroProbeLimit)));
    }

    #[test]
    fn test_zero_probe_timeout_rejected() {
        let config = Config {
            probe_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroProbeTimeout)));
    }

    #[test]
    fn test_percent_above_hundred_rejected() {
        let config = Config {
            error_percent_threshold: Some(101),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ErrorPercentOutOfRange(101))
        ));
    }

    #[test]
    fn test_zero_window_and_success_threshold_rejected() {
        let window = Config {
            rolling_window: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(window.validate(), Err(ConfigError::ZeroRollingWindow)));

        let successes = Config {
            success_threshold: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            successes.validate(),
            Err(ConfigError::ZeroSuccessThreshold)
        ));
    }

    #[test]
    fn test_jitter_out_of_range_rejected() {
        let config = Config {
            jitter_factor: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::JitterOutOfRange(_))));
    }

    #[test]
    fn test_required_successes_follows_probe_limit() {
        let config = Config {
            probe_limit: 3,
            ..Default::default()
        };
        assert_eq!(config.required_successes(), 3);

        let explicit = Config {
            probe_limit: 3,
            success_threshold: Some(5),
            ..Default::default()
        };
        assert_eq!(explicit.required_successes(), 5);
    }

    #[test]
    fn test_cooldown_without_jitter_is_exact() {
        let config = Config {
            cooldown: Duration::from_secs(7),
            ..Default::default()
        };
        assert_eq!(config.cooldown_with_jitter(), Duration::from_secs(7));
    }

    #[test]
    fn test_cooldown_with_jitter_stays_bounded() {
        let config = Config {
            cooldown: Duration::from_secs(10),
            jitter_factor: 0.5,
            ..Default::default()
        };

        for _ in 0..50 {
            let cooldown = config.cooldown_with_jitter();
            assert!(cooldown <= Duration::from_secs(10));
            assert!(cooldown >= Duration::from_secs(4));
        }
    }
}
