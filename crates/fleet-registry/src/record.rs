//! Server records and least-utilization selection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Operational status reported by a tunnel server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Accepting new tunnels
    Active,
    /// Serving existing tunnels, accepting no new ones
    Draining,
    /// Failing its own health checks
    Unreachable,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Active => "active",
            ServerStatus::Draining => "draining",
            ServerStatus::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

/// A tunnel-serving node as it registers itself in the store
///
/// Written only by the server it describes; read by every control-plane replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: String,
    pub host: String,
    /// Port of the server's control API
    pub port: u16,
    pub location: String,
    pub max_bandwidth_mbps: u32,
    pub max_concurrent_tunnels: u32,
    /// Active tunnel count
    pub current_load: u32,
    pub current_bandwidth_mbps: f64,
    pub status: ServerStatus,
    pub last_health_check: DateTime<Utc>,
}

impl ServerRecord {
    /// New active server with no capacity declared yet
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            location: String::new(),
            max_bandwidth_mbps: 0,
            max_concurrent_tunnels: 0,
            current_load: 0,
            current_bandwidth_mbps: 0.0,
            status: ServerStatus::Active,
            last_health_check: Utc::now(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_capacity(mut self, max_concurrent_tunnels: u32, max_bandwidth_mbps: u32) -> Self {
        self.max_concurrent_tunnels = max_concurrent_tunnels;
        self.max_bandwidth_mbps = max_bandwidth_mbps;
        self
    }

    pub fn with_load(mut self, current_load: u32, current_bandwidth_mbps: f64) -> Self {
        self.current_load = current_load;
        self.current_bandwidth_mbps = current_bandwidth_mbps;
        self
    }

    pub fn with_status(mut self, status: ServerStatus) -> Self {
        self.status = status;
        self
    }

    /// `host:port` of the control API
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Fraction of tunnel slots in use (1.0 when no slots are declared)
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent_tunnels == 0 {
            return 1.0;
        }
        self.current_load as f64 / self.max_concurrent_tunnels as f64
    }

    /// Active and with at least one free tunnel slot
    pub fn is_eligible(&self) -> bool {
        self.status == ServerStatus::Active && self.current_load < self.max_concurrent_tunnels
    }

    /// Structural checks applied before writing and after reading a record
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("server id cannot be empty".to_string());
        }
        if self.id.contains(|c: char| c == '*' || c == '?' || c.is_whitespace()) {
            return Err(format!("server id '{}' contains invalid characters", self.id));
        }
        if self.host.trim().is_empty() {
            return Err(format!("server '{}' has an empty host", self.id));
        }
        if self.port == 0 {
            return Err(format!("server '{}' has port 0", self.id));
        }
        if !self.current_bandwidth_mbps.is_finite() || self.current_bandwidth_mbps < 0.0 {
            return Err(format!(
                "server '{}' reports invalid bandwidth {}",
                self.id, self.current_bandwidth_mbps
            ));
        }
        Ok(())
    }

    /// Order by relative utilization, then absolute load, then id.
    ///
    /// Utilization is compared by cross-multiplication so equal ratios such
    /// as 1/2 and 5/10 tie exactly.
    fn selection_order(&self, other: &Self) -> Ordering {
        let lhs = self.current_load as u64 * other.max_concurrent_tunnels as u64;
        let rhs = other.current_load as u64 * self.max_concurrent_tunnels as u64;
        lhs.cmp(&rhs)
            .then_with(|| self.current_load.cmp(&other.current_load))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Pick the least relatively utilized eligible server
///
/// Returns `None` when no server is active with a free slot; callers treat that
/// as "no capacity".
pub fn select_best<'a, I>(records: I) -> Option<&'a ServerRecord>
where
    I: IntoIterator<Item = &'a ServerRecord>,
{
    records
        .into_iter()
        .filter(|r| r.is_eligible())
        .min_by(|a, b| a.selection_order(b))
}
