//! Control API of a tunnel-serving node
//!
//! | Method | Path | Body | Response |
//! |---|---|---|---|
//! | POST | `/control/tunnels` | [`ProvisionRequest`] | [`ProvisionedTunnel`] |
//! | DELETE | `/control/tunnels/{tunnelId}` | | 204 / 404 |
//! | GET | `/control/health` | | [`NodeHealth`] |
//!
//! Calls are only ever made through the server's circuit breaker.

use async_trait::async_trait;
use fleet_registry::ServerRecord;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::timeouts::CONTROL_HTTP_TIMEOUT;

/// Control API errors
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected response from server: {0}")]
    Protocol(String),
}

impl ControlError {
    /// Whether the error says the server is unhealthy, as opposed to a
    /// healthy server declining the request
    ///
    /// Only server faults count against the server's circuit breaker.
    pub fn is_server_fault(&self) -> bool {
        match self {
            ControlError::Unreachable(_) | ControlError::Protocol(_) => true,
            ControlError::Rejected { status, .. } => *status >= 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub tunnel_id: String,
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedTunnel {
    pub tunnel_id: String,
    /// Public port the server opened for the tunnel
    pub public_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealth {
    pub healthy: bool,
    pub active_tunnels: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Outbound calls to a tunnel server's control API
#[async_trait]
pub trait ServerControl: Send + Sync {
    async fn provision_tunnel(
        &self,
        server: &ServerRecord,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedTunnel, ControlError>;

    /// Remove a tunnel. Removing an unknown tunnel succeeds.
    async fn deprovision_tunnel(
        &self,
        server: &ServerRecord,
        tunnel_id: &str,
    ) -> Result<(), ControlError>;

    async fn health(&self, server: &ServerRecord) -> Result<NodeHealth, ControlError>;
}

/// [`ServerControl`] over HTTP/JSON
#[derive(Clone)]
pub struct HttpServerControl {
    client: Client,
}

impl HttpServerControl {
    pub fn new() -> Result<Self, ControlError> {
        Self::with_timeout(CONTROL_HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ControlError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlError::Protocol(format!("Failed to build HTTP client: {}", e)))?;

        info!(timeout_ms = timeout.as_millis() as u64, "Server control client initialized");
        Ok(Self { client })
    }

    /// Control API URL with each segment percent-encoded as one path segment
    fn url(server: &ServerRecord, segments: &[&str]) -> Result<Url, ControlError> {
        let addr = server.control_addr();
        let mut url = Url::parse(&format!("http://{}/", addr))
            .map_err(|e| ControlError::Protocol(format!("Invalid control address {}: {}", addr, e)))?;
        url.path_segments_mut()
            .map_err(|_| ControlError::Protocol(format!("Invalid control address {}", addr)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn transport_error(server: &ServerRecord, e: reqwest::Error) -> ControlError {
        let kind = if e.is_timeout() {
            "timed out"
        } else if e.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        ControlError::Unreachable(format!("{} {}: {}", server.control_addr(), kind, e))
    }

    async fn rejected(response: Response) -> ControlError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        ControlError::Rejected { status, message }
    }
}

#[async_trait]
impl ServerControl for HttpServerControl {
    async fn provision_tunnel(
        &self,
        server: &ServerRecord,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedTunnel, ControlError> {
        debug!(server_id = %server.id, tunnel_id = %request.tunnel_id, "Provisioning tunnel");

        let response = self
            .client
            .post(Self::url(server, &["control", "tunnels"])?)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::transport_error(server, e))?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        response
            .json::<ProvisionedTunnel>()
            .await
            .map_err(|e| ControlError::Protocol(format!("Invalid provision response: {}", e)))
    }

    async fn deprovision_tunnel(
        &self,
        server: &ServerRecord,
        tunnel_id: &str,
    ) -> Result<(), ControlError> {
        debug!(server_id = %server.id, tunnel_id = %tunnel_id, "Deprovisioning tunnel");

        let response = self
            .client
            .delete(Self::url(server, &["control", "tunnels", tunnel_id])?)
            .send()
            .await
            .map_err(|e| Self::transport_error(server, e))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(Self::rejected(response).await)
    }

    async fn health(&self, server: &ServerRecord) -> Result<NodeHealth, ControlError> {
        let response = self
            .client
            .get(Self::url(server, &["control", "health"])?)
            .send()
            .await
            .map_err(|e| Self::transport_error(server, e))?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        response
            .json::<NodeHealth>()
            .await
            .map_err(|e| ControlError::Protocol(format!("Invalid health response: {}", e)))
    }
}
