//! Tunnel placement across the fleet
//!
//! `create_tunnel` runs admission first, then walks servers from least to most
//! utilized. A server whose breaker is open, whose call times out or that is
//! unreachable is skipped in favour of the next one, up to
//! `max_placement_attempts`. A server that answers and declines ends the
//! attempt: the answer is authoritative.

use fleet_admission::{AdmissionController, AdmissionResult, Rejection};
use fleet_breaker::{BreakerError, BreakerStats, CircuitBreakers};
use fleet_registry::{select_best, RegistryError, ServerRecord, ServerRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{ControlError, NodeHealth, ProvisionRequest, ServerControl};

/// Coordinator errors
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Fleet state unavailable")]
    StoreUnavailable,

    /// Admission refused the tunnel; the result carries the reason and figures
    #[error("Capacity exceeded")]
    CapacityExceeded(Box<AdmissionResult>),

    #[error("Server {server_id} temporarily unavailable (circuit open, retry after {retry_after:?})")]
    CircuitOpen {
        server_id: String,
        retry_after: Duration,
    },

    #[error("Server {server_id} unavailable: {reason}")]
    ServerUnavailable { server_id: String, reason: String },

    #[error("No tunnel server available")]
    NoServerAvailable,

    #[error("Server {server_id} rejected request ({status}): {message}")]
    ServerRejected {
        server_id: String,
        status: u16,
        message: String,
    },

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Registry error: {0}")]
    Registry(RegistryError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoordinatorError {
    /// Whether the caller should see "temporarily unavailable, retry"
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::StoreUnavailable
                | CoordinatorError::CapacityExceeded(_)
                | CoordinatorError::CircuitOpen { .. }
                | CoordinatorError::ServerUnavailable { .. }
                | CoordinatorError::NoServerAvailable
        )
    }
}

impl From<RegistryError> for CoordinatorError {
    fn from(e: RegistryError) -> Self {
        if e.is_store_unavailable() {
            CoordinatorError::StoreUnavailable
        } else {
            CoordinatorError::Registry(e)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Servers tried per `create_tunnel` before giving up
    pub max_placement_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_placement_attempts: 3,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_placement_attempts == 0 {
            return Err("max_placement_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// A request to open one tunnel for an account
///
/// Quota figures come from the account/billing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRequest {
    pub tunnel_id: String,
    pub account_id: String,
    pub plan_quota: u32,
    pub account_current_tunnels: u32,
}

impl TunnelRequest {
    /// New request with a generated tunnel id
    pub fn new(account_id: impl Into<String>, plan_quota: u32, account_current_tunnels: u32) -> Self {
        Self {
            tunnel_id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            plan_quota,
            account_current_tunnels,
        }
    }
}

/// Where a tunnel ended up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelPlacement {
    pub tunnel_id: String,
    pub server_id: String,
    pub host: String,
    pub public_port: u16,
    /// Servers tried, including the one that accepted
    pub attempts: u32,
}

/// Orchestrates admission, selection and provisioning
#[derive(Clone)]
pub struct FleetCoordinator {
    registry: ServerRegistry,
    admission: AdmissionController,
    breakers: CircuitBreakers,
    control: Arc<dyn ServerControl>,
    config: CoordinatorConfig,
}

impl FleetCoordinator {
    pub fn new(
        registry: ServerRegistry,
        admission: AdmissionController,
        breakers: CircuitBreakers,
        control: Arc<dyn ServerControl>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        config.validate().map_err(CoordinatorError::InvalidConfig)?;
        Ok(Self {
            registry,
            admission,
            breakers,
            control,
            config,
        })
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    /// Admit and place one tunnel
    pub async fn create_tunnel(
        &self,
        request: &TunnelRequest,
    ) -> Result<TunnelPlacement, CoordinatorError> {
        let admission = self
            .admission
            .check_capacity(request.plan_quota, request.account_current_tunnels)
            .await;

        if !admission.has_capacity {
            return Err(match admission.rejection {
                Some(Rejection::FleetUnavailable) => CoordinatorError::StoreUnavailable,
                Some(Rejection::NoServers) => CoordinatorError::NoServerAvailable,
                _ => CoordinatorError::CapacityExceeded(Box::new(admission)),
            });
        }

        let provision = ProvisionRequest {
            tunnel_id: request.tunnel_id.clone(),
            account_id: request.account_id.clone(),
        };

        let servers = self.registry.get_all().await?;
        // Breakers of servers that expired from the registry are forgotten
        self.breakers
            .retain_live(servers.iter().map(|s| s.id.as_str()));

        let mut tried: HashSet<String> = HashSet::new();
        let mut last_error = None;

        for attempt in 1..=self.config.max_placement_attempts {
            let candidates = servers.iter().filter(|s| !tried.contains(&s.id));
            let Some(server) = select_best(candidates).cloned() else {
                debug!(attempt, tried = tried.len(), "No more candidate servers");
                break;
            };
            tried.insert(server.id.clone());

            let breaker = self.breakers.get_or_create(&server.id);
            let result = breaker
                .execute_classified(
                    || self.control.provision_tunnel(&server, &provision),
                    ControlError::is_server_fault,
                )
                .await;

            match result {
                Ok(provisioned) => {
                    info!(
                        tunnel_id = %request.tunnel_id,
                        account_id = %request.account_id,
                        server_id = %server.id,
                        public_port = provisioned.public_port,
                        attempt,
                        "Tunnel placed"
                    );
                    return Ok(TunnelPlacement {
                        tunnel_id: provisioned.tunnel_id,
                        server_id: server.id,
                        host: server.host,
                        public_port: provisioned.public_port,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    let error = Self::call_error(&server, e);
                    if !error.is_retryable() {
                        info!(
                            tunnel_id = %request.tunnel_id,
                            server_id = %server.id,
                            error = %error,
                            "Tunnel placement declined"
                        );
                        return Err(error);
                    }
                    warn!(
                        tunnel_id = %request.tunnel_id,
                        server_id = %server.id,
                        attempt,
                        error = %error,
                        "Placement attempt failed, trying another server"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or(CoordinatorError::NoServerAvailable))
    }

    /// Remove a tunnel from the server hosting it
    pub async fn release_tunnel(
        &self,
        server_id: &str,
        tunnel_id: &str,
    ) -> Result<(), CoordinatorError> {
        let server = self.lookup(server_id).await?;
        let breaker = self.breakers.get_or_create(&server.id);

        breaker
            .execute_classified(
                || self.control.deprovision_tunnel(&server, tunnel_id),
                ControlError::is_server_fault,
            )
            .await
            .map_err(|e| Self::call_error(&server, e))?;

        info!(server_id = %server_id, tunnel_id = %tunnel_id, "Tunnel released");
        Ok(())
    }

    /// Health of one server, probed through its breaker
    pub async fn node_health(&self, server_id: &str) -> Result<NodeHealth, CoordinatorError> {
        let server = self.lookup(server_id).await?;
        let breaker = self.breakers.get_or_create(&server.id);

        breaker
            .execute_classified(
                || self.control.health(&server),
                ControlError::is_server_fault,
            )
            .await
            .map_err(|e| Self::call_error(&server, e))
    }

    /// Breaker statistics for every server this process has called
    pub fn breaker_stats(&self) -> Vec<BreakerStats> {
        self.breakers.stats()
    }

    async fn lookup(&self, server_id: &str) -> Result<ServerRecord, CoordinatorError> {
        self.registry
            .get(server_id)
            .await?
            .ok_or_else(|| CoordinatorError::UnknownServer(server_id.to_string()))
    }

    fn call_error(server: &ServerRecord, e: BreakerError<ControlError>) -> CoordinatorError {
        match e {
            BreakerError::Open { retry_after, .. } => CoordinatorError::CircuitOpen {
                server_id: server.id.clone(),
                retry_after,
            },
            BreakerError::Timeout { timeout, .. } => CoordinatorError::ServerUnavailable {
                server_id: server.id.clone(),
                reason: format!("call timed out after {:?}", timeout),
            },
            BreakerError::Inner(ControlError::Rejected { status, message }) if status < 500 => {
                CoordinatorError::ServerRejected {
                    server_id: server.id.clone(),
                    status,
                    message,
                }
            }
            BreakerError::Inner(e) => CoordinatorError::ServerUnavailable {
                server_id: server.id.clone(),
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(CoordinatorError::StoreUnavailable.is_retryable());
        assert!(CoordinatorError::NoServerAvailable.is_retryable());
        assert!(CoordinatorError::CircuitOpen {
            server_id: "s".into(),
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!CoordinatorError::ServerRejected {
            server_id: "s".into(),
            status: 409,
            message: "conflict".into()
        }
        .is_retryable());
        assert!(!CoordinatorError::UnknownServer("s".into()).is_retryable());
    }

    #[test]
    fn test_call_error_mapping() {
        let server = ServerRecord::new("eu-1", "10.0.0.1", 7835);

        let open = FleetCoordinator::call_error(
            &server,
            BreakerError::Open {
                name: "eu-1".into(),
                retry_after: Duration::from_secs(3),
            },
        );
        assert!(matches!(open, CoordinatorError::CircuitOpen { .. }));

        let declined = FleetCoordinator::call_error(
            &server,
            BreakerError::Inner(ControlError::Rejected {
                status: 403,
                message: "port not allowed".into(),
            }),
        );
        assert!(matches!(
            declined,
            CoordinatorError::ServerRejected { status: 403, .. }
        ));

        let broken = FleetCoordinator::call_error(
            &server,
            BreakerError::Inner(ControlError::Rejected {
                status: 502,
                message: String::new(),
            }),
        );
        assert!(matches!(broken, CoordinatorError::ServerUnavailable { .. }));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = TunnelRequest::new("acct", 5, 0);
        let b = TunnelRequest::new("acct", 5, 0);
        assert_ne!(a.tunnel_id, b.tunnel_id);
    }

    #[test]
    fn test_zero_attempts_invalid() {
        let config = CoordinatorConfig {
            max_placement_attempts: 0,
        };
        assert!(config.validate().is_err());
    }
}
