//! Admission decisions
//!
//! Order of checks:
//! 1. account quota (independent of fleet state)
//! 2. fleet visibility (an unreadable or empty fleet is a rejection)
//! 3. `totalLoad + 1` against the effective ceiling

use fleet_registry::{CapacitySnapshot, ServerRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::CapacityConfig;

/// Admission errors
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Invalid capacity configuration: {0}")]
    InvalidConfig(String),
}

/// Why a tunnel was not admitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// The account already runs as many tunnels as its plan allows
    QuotaExhausted { plan_quota: u32, current_tunnels: u32 },
    /// Admitting one more tunnel would cross the effective ceiling
    SystemAtCapacity { total_load: u64, effective_ceiling: f64 },
    /// The fleet could not be read from the store
    FleetUnavailable,
    /// No live server is registered
    NoServers,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::QuotaExhausted {
                plan_quota,
                current_tunnels,
            } => write!(
                f,
                "plan quota exhausted ({}/{} tunnels)",
                current_tunnels, plan_quota
            ),
            Rejection::SystemAtCapacity {
                total_load,
                effective_ceiling,
            } => write!(
                f,
                "system at capacity ({} active, ceiling {})",
                total_load, effective_ceiling
            ),
            Rejection::FleetUnavailable => f.write_str("fleet state unavailable"),
            Rejection::NoServers => f.write_str("no tunnel servers registered"),
        }
    }
}

/// Outcome of an admission check, with the figures it was based on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResult {
    pub has_capacity: bool,
    /// Tunnels active across the fleet
    pub active_tunnels: u64,
    /// Configured system capacity before headroom
    pub total_capacity: u64,
    /// Tunnels still admissible under the effective ceiling
    pub available_slots: u64,
    /// `activeTunnels / totalCapacity * 100`
    pub utilization_percent: f64,
    pub server_count: usize,
    /// Fleet bandwidth in use, percent
    pub bandwidth_utilization: f64,
    /// Tunnels the unused fleet bandwidth could still carry at the per-tunnel budget
    pub bandwidth_headroom_tunnels: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
}

impl AdmissionResult {
    fn empty(config: &CapacityConfig, rejection: Rejection) -> Self {
        Self {
            has_capacity: false,
            active_tunnels: 0,
            total_capacity: config.total_system_capacity as u64,
            available_slots: 0,
            utilization_percent: 0.0,
            server_count: 0,
            bandwidth_utilization: 0.0,
            bandwidth_headroom_tunnels: 0,
            rejection: Some(rejection),
        }
    }
}

/// Admission controller over live registry data
#[derive(Clone)]
pub struct AdmissionController {
    registry: ServerRegistry,
    config: CapacityConfig,
}

impl AdmissionController {
    pub fn new(registry: ServerRegistry, config: CapacityConfig) -> Result<Self, AdmissionError> {
        config.validate().map_err(AdmissionError::InvalidConfig)?;

        info!(
            total_system_capacity = config.total_system_capacity,
            reserved_capacity_percent = config.reserved_capacity_percent,
            effective_ceiling = config.effective_ceiling(),
            "Admission controller initialized"
        );

        Ok(Self { registry, config })
    }

    pub fn config(&self) -> &CapacityConfig {
        &self.config
    }

    /// Decide whether an account may open one more tunnel
    ///
    /// `plan_quota` and `account_current_tunnels` come from the account/billing
    /// service.
    pub async fn check_capacity(
        &self,
        plan_quota: u32,
        account_current_tunnels: u32,
    ) -> AdmissionResult {
        if account_current_tunnels >= plan_quota {
            let rejection = Rejection::QuotaExhausted {
                plan_quota,
                current_tunnels: account_current_tunnels,
            };
            debug!(%rejection, "Tunnel not admitted");
            return AdmissionResult::empty(&self.config, rejection);
        }

        let snapshot = match self.registry.try_fleet_stats().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Fleet unreadable, rejecting admission");
                return AdmissionResult::empty(&self.config, Rejection::FleetUnavailable);
            }
        };

        self.evaluate(&snapshot, plan_quota, account_current_tunnels)
    }

    /// Pure admission decision against a given snapshot
    pub fn evaluate(
        &self,
        snapshot: &CapacitySnapshot,
        plan_quota: u32,
        account_current_tunnels: u32,
    ) -> AdmissionResult {
        if account_current_tunnels >= plan_quota {
            return AdmissionResult::empty(
                &self.config,
                Rejection::QuotaExhausted {
                    plan_quota,
                    current_tunnels: account_current_tunnels,
                },
            );
        }

        if snapshot.is_empty() {
            debug!("No live servers, rejecting admission");
            return AdmissionResult::empty(&self.config, Rejection::NoServers);
        }

        let ceiling = self.config.effective_ceiling();
        let total_load = snapshot.total_load;
        let total_capacity = self.config.total_system_capacity as u64;

        let has_capacity = (total_load + 1) as f64 <= ceiling;
        let available_slots = (ceiling.floor().max(0.0) as u64).saturating_sub(total_load);

        let free_bandwidth =
            (snapshot.total_bandwidth_mbps as f64 - snapshot.used_bandwidth_mbps).max(0.0);
        let bandwidth_headroom_tunnels =
            (free_bandwidth / self.config.max_bandwidth_per_tunnel_mbps as f64).floor() as u64;

        let rejection = (!has_capacity).then_some(Rejection::SystemAtCapacity {
            total_load,
            effective_ceiling: ceiling,
        });

        if let Some(ref rejection) = rejection {
            info!(%rejection, servers = snapshot.server_count, "Tunnel not admitted");
        }

        AdmissionResult {
            has_capacity,
            active_tunnels: total_load,
            total_capacity,
            available_slots,
            utilization_percent: total_load as f64 / total_capacity as f64 * 100.0,
            server_count: snapshot.server_count,
            bandwidth_utilization: snapshot.bandwidth_utilization_percent,
            bandwidth_headroom_tunnels,
            rejection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_registry::RegistryConfig;
    use fleet_store::{MemoryStore, SharedStore};
    use std::sync::Arc;

    fn controller(config: CapacityConfig) -> AdmissionController {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let registry = ServerRegistry::new(store, RegistryConfig::default());
        AdmissionController::new(registry, config).unwrap()
    }

    fn snapshot(total_load: u64) -> CapacitySnapshot {
        CapacitySnapshot {
            server_count: 2,
            active_server_count: 2,
            total_capacity: 200,
            total_load,
            utilization_percent: total_load as f64 / 2.0,
            total_bandwidth_mbps: 2000,
            used_bandwidth_mbps: 500.0,
            bandwidth_utilization_percent: 25.0,
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let registry = ServerRegistry::new(store, RegistryConfig::default());
        let config = CapacityConfig {
            total_system_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            AdmissionController::new(registry, config),
            Err(AdmissionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ceiling_boundary() {
        let controller = controller(CapacityConfig::default());

        let result = controller.evaluate(&snapshot(79), 10, 0);
        assert!(result.has_capacity);
        assert_eq!(result.available_slots, 1);

        let result = controller.evaluate(&snapshot(80), 10, 0);
        assert!(!result.has_capacity);
        assert_eq!(result.available_slots, 0);
        assert!(matches!(
            result.rejection,
            Some(Rejection::SystemAtCapacity { total_load: 80, .. })
        ));
    }

    #[test]
    fn test_quota_checked_before_fleet() {
        let controller = controller(CapacityConfig::default());
        let result = controller.evaluate(&snapshot(0), 3, 3);
        assert!(!result.has_capacity);
        assert_eq!(
            result.rejection,
            Some(Rejection::QuotaExhausted {
                plan_quota: 3,
                current_tunnels: 3
            })
        );
    }

    #[test]
    fn test_zero_quota_never_admits() {
        let controller = controller(CapacityConfig::default());
        assert!(!controller.evaluate(&snapshot(0), 0, 0).has_capacity);
    }

    #[test]
    fn test_empty_snapshot_fails_closed() {
        let controller = controller(CapacityConfig::default());
        let result = controller.evaluate(&CapacitySnapshot::default(), 10, 0);
        assert!(!result.has_capacity);
        assert_eq!(result.rejection, Some(Rejection::NoServers));
    }

    #[test]
    fn test_reported_figures() {
        let controller = controller(CapacityConfig::default());
        let result = controller.evaluate(&snapshot(40), 10, 2);

        assert!(result.has_capacity);
        assert_eq!(result.active_tunnels, 40);
        assert_eq!(result.total_capacity, 100);
        assert_eq!(result.available_slots, 40);
        assert_eq!(result.utilization_percent, 40.0);
        assert_eq!(result.server_count, 2);
        assert_eq!(result.bandwidth_utilization, 25.0);
        // 1500 Mbps free at 100 Mbps per tunnel
        assert_eq!(result.bandwidth_headroom_tunnels, 15);
        assert!(result.rejection.is_none());
    }

    #[test]
    fn test_fractional_ceiling() {
        // 10 * 0.85 = 8.5: the ninth tunnel (load 8 -> 9) is rejected
        let controller = controller(CapacityConfig {
            total_system_capacity: 10,
            reserved_capacity_percent: 15.0,
            ..Default::default()
        });
        assert!(controller.evaluate(&snapshot(7), 10, 0).has_capacity);
        assert!(!controller.evaluate(&snapshot(8), 10, 0).has_capacity);
        assert_eq!(controller.evaluate(&snapshot(7), 10, 0).available_slots, 1);
    }
}
