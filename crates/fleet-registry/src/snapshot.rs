use serde::{Deserialize, Serialize};

use crate::ServerRecord;

/// Aggregate fleet capacity, derived on demand from live server records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySnapshot {
    pub server_count: usize,
    /// Servers currently accepting new tunnels
    pub active_server_count: usize,
    /// Sum of `maxConcurrentTunnels`
    pub total_capacity: u64,
    /// Sum of `currentLoad`
    pub total_load: u64,
    pub utilization_percent: f64,
    pub total_bandwidth_mbps: u64,
    pub used_bandwidth_mbps: f64,
    pub bandwidth_utilization_percent: f64,
}

impl CapacitySnapshot {
    pub fn from_records(records: &[ServerRecord]) -> Self {
        let mut snapshot = CapacitySnapshot {
            server_count: records.len(),
            ..Default::default()
        };

        for record in records {
            if record.is_eligible() {
                snapshot.active_server_count += 1;
            }
            snapshot.total_capacity += record.max_concurrent_tunnels as u64;
            snapshot.total_load += record.current_load as u64;
            snapshot.total_bandwidth_mbps += record.max_bandwidth_mbps as u64;
            snapshot.used_bandwidth_mbps += record.current_bandwidth_mbps;
        }

        snapshot.utilization_percent =
            percent(snapshot.total_load as f64, snapshot.total_capacity as f64);
        snapshot.bandwidth_utilization_percent = percent(
            snapshot.used_bandwidth_mbps,
            snapshot.total_bandwidth_mbps as f64,
        );
        snapshot
    }

    /// No live servers visible
    pub fn is_empty(&self) -> bool {
        self.server_count == 0
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}
