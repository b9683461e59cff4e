// Circuit breaker configuration with validation

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds and timers for one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,

    /// Upper bound for a single wrapped call (milliseconds)
    pub timeout_ms: u64,

    /// Time after the last failure before a probe is allowed (milliseconds)
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 10_000,
            reset_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Probe calls allowed in flight while half-open
    pub fn half_open_max_probes(&self) -> u32 {
        self.success_threshold
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be at least 1".to_string());
        }

        if self.success_threshold == 0 {
            return Err("success_threshold must be at least 1".to_string());
        }

        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than 0".to_string());
        }

        if self.reset_timeout_ms == 0 {
            return Err("reset_timeout_ms must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CircuitBreakerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.reset_timeout(), Duration::from_secs(60));
        assert_eq!(config.half_open_max_probes(), 2);
    }

    #[test]
    fn test_zero_thresholds_invalid() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CircuitBreakerConfig {
            success_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
