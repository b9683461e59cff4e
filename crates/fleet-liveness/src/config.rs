// Liveness configuration with validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default validity of a heartbeat without refresh
pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(60);

/// What `is_blacklisted` answers when the store cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenCheckPolicy {
    /// Treat the token as not revoked and raise an error-level alert
    #[default]
    FailOpen,
    /// Treat the token as revoked
    FailClosed,
}

impl fmt::Display for TokenCheckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenCheckPolicy::FailOpen => f.write_str("fail_open"),
            TokenCheckPolicy::FailClosed => f.write_str("fail_closed"),
        }
    }
}

impl std::str::FromStr for TokenCheckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Ok(TokenCheckPolicy::FailOpen),
            "fail_closed" | "closed" => Ok(TokenCheckPolicy::FailClosed),
            other => Err(format!("unknown token check policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Seconds a heartbeat stays visible without refresh
    pub heartbeat_ttl_secs: u64,

    /// Seconds between heartbeats sent by [`crate::HeartbeatTask`]
    pub heartbeat_interval_secs: u64,

    pub token_check_policy: TokenCheckPolicy,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_ttl_secs: DEFAULT_HEARTBEAT_TTL.as_secs(),
            heartbeat_interval_secs: 20,
            token_check_policy: TokenCheckPolicy::default(),
        }
    }
}

impl LivenessConfig {
    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_ttl_secs == 0 {
            return Err("heartbeat_ttl_secs must be greater than 0".to_string());
        }

        if self.heartbeat_interval_secs == 0 {
            return Err("heartbeat_interval_secs must be greater than 0".to_string());
        }

        if self.heartbeat_interval_secs >= self.heartbeat_ttl_secs {
            return Err(format!(
                "heartbeat_interval_secs ({}) must be less than heartbeat_ttl_secs ({})",
                self.heartbeat_interval_secs, self.heartbeat_ttl_secs
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LivenessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_ttl(), Duration::from_secs(60));
        assert_eq!(config.token_check_policy, TokenCheckPolicy::FailOpen);
    }

    #[test]
    fn test_interval_must_be_below_ttl() {
        let config = LivenessConfig {
            heartbeat_interval_secs: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "fail-closed".parse::<TokenCheckPolicy>().unwrap(),
            TokenCheckPolicy::FailClosed
        );
        assert_eq!(
            "FAIL_OPEN".parse::<TokenCheckPolicy>().unwrap(),
            TokenCheckPolicy::FailOpen
        );
        assert!("maybe".parse::<TokenCheckPolicy>().is_err());
    }
}
