// Capacity configuration with validation

use serde::{Deserialize, Serialize};

/// Static capacity limits for the whole system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Tunnel slots a server declares when it does not override them
    pub max_tunnels_per_server: u32,

    /// Bandwidth budget per tunnel (Mbps)
    pub max_bandwidth_per_tunnel_mbps: u32,

    /// System-wide tunnel ceiling before headroom is withheld
    pub total_system_capacity: u32,

    /// Percentage of `total_system_capacity` never handed out
    pub reserved_capacity_percent: f64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_tunnels_per_server: 100,
            max_bandwidth_per_tunnel_mbps: 100,
            total_system_capacity: 100,
            reserved_capacity_percent: 20.0,
        }
    }
}

impl CapacityConfig {
    /// `total_system_capacity * (1 - reserved_capacity_percent / 100)`
    pub fn effective_ceiling(&self) -> f64 {
        // Multiply before dividing so whole-number inputs stay exact
        self.total_system_capacity as f64 * (100.0 - self.reserved_capacity_percent) / 100.0
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.total_system_capacity == 0 {
            return Err("total_system_capacity must be greater than 0".to_string());
        }

        if self.max_tunnels_per_server == 0 {
            return Err("max_tunnels_per_server must be greater than 0".to_string());
        }

        if self.max_bandwidth_per_tunnel_mbps == 0 {
            return Err("max_bandwidth_per_tunnel_mbps must be greater than 0".to_string());
        }

        if !self.reserved_capacity_percent.is_finite()
            || !(0.0..100.0).contains(&self.reserved_capacity_percent)
        {
            return Err(format!(
                "reserved_capacity_percent must be in [0, 100), got {}",
                self.reserved_capacity_percent
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
        let config = CapacityConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_ceiling(), 80.0);
    }

    #[test]
    fn test_no_reservation() {
        let config = CapacityConfig {
            reserved_capacity_percent: 0.0,
            ..Default::default()
        };
        assert_eq!(config.effective_ceiling(), 100.0);
    }

    #[test]
    fn test_invalid_values() {
        let full_reservation = CapacityConfig {
            reserved_capacity_percent: 100.0,
            ..Default::default()
        };
        assert!(full_reservation.validate().is_err());

        let negative = CapacityConfig {
            reserved_capacity_percent: -5.0,
            ..Default::default()
        };
        assert!(negative.validate().is_err());

        let empty = CapacityConfig {
            total_system_capacity: 0,
            ..Default::default()
        };
        assert!(empty.validate().is_err());
    }
}
