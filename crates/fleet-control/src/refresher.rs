//! Keeps a server's own registration alive
//!
//! Each server owns its `server:<id>` key. The refresher rewrites it every
//! interval and immediately after the local record changes (load updates), and
//! removes it on graceful shutdown.

use chrono::Utc;
use fleet_registry::{ServerRecord, ServerRegistry, ServerStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::timeouts::REGISTRATION_REFRESH_INTERVAL;
use crate::{ControlError, NodeHealth, ServerControl};

#[derive(Debug, Error)]
pub enum RefresherError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid server record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefresherConfig {
    pub interval_secs: u64,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval_secs: REGISTRATION_REFRESH_INTERVAL.as_secs(),
        }
    }
}

impl RefresherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The interval must be shorter than the registration TTL
    pub fn validate(&self, server_ttl: Duration) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("interval_secs must be greater than 0".to_string());
        }

        if self.interval() >= server_ttl {
            return Err(format!(
                "refresh interval ({:?}) must be less than the server TTL ({:?})",
                self.interval(),
                server_ttl
            ));
        }

        Ok(())
    }
}

/// Background registration task for the local server
pub struct RegistrationRefresher {
    server_id: String,
    record_tx: watch::Sender<ServerRecord>,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl RegistrationRefresher {
    /// Register `record` now and keep it registered until shutdown
    pub fn spawn(
        registry: ServerRegistry,
        record: ServerRecord,
        config: RefresherConfig,
    ) -> Result<Self, RefresherError> {
        config
            .validate(registry.ttl())
            .map_err(RefresherError::InvalidConfig)?;
        record.validate().map_err(RefresherError::InvalidRecord)?;

        let server_id = record.id.clone();
        let (record_tx, mut record_rx) = watch::channel(record);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task_server_id = server_id.clone();
        let handle = tokio::spawn(async move {
            let server_id = task_server_id;
            let mut interval = tokio::time::interval(config.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                server_id = %server_id,
                interval_secs = config.interval_secs,
                "Registration refresher started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = record_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        debug!(server_id = %server_id, "Server record changed, refreshing now");
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }

                let mut current = record_rx.borrow_and_update().clone();
                current.last_health_check = Utc::now();

                if let Err(e) = registry.register(&current).await {
                    warn!(
                        server_id = %server_id,
                        error = %e,
                        "Failed to refresh registration"
                    );
                }
            }

            match registry.unregister(&server_id).await {
                Ok(()) => info!(server_id = %server_id, "Server unregistered"),
                Err(e) => warn!(
                    server_id = %server_id,
                    error = %e,
                    "Failed to unregister server, registration will expire"
                ),
            }
        });

        Ok(Self {
            server_id,
            record_tx,
            shutdown_tx,
            handle,
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Current local view of the record
    pub fn record(&self) -> ServerRecord {
        self.record_tx.borrow().clone()
    }

    /// Update the local load figures and re-register immediately
    pub fn update_load(&self, current_load: u32, current_bandwidth_mbps: f64) {
        self.record_tx.send_modify(|record| {
            record.current_load = current_load;
            record.current_bandwidth_mbps = current_bandwidth_mbps;
        });
    }

    /// Apply an arbitrary change to the local record and re-register
    ///
    /// The id is fixed for the lifetime of the refresher; changes to it are
    /// discarded.
    pub fn update(&self, change: impl FnOnce(&mut ServerRecord)) {
        let server_id = self.server_id.clone();
        self.record_tx.send_modify(|record| {
            change(record);
            record.id = server_id;
        });
    }

    /// Pull the load reported by the server's own control API into the record
    ///
    /// A changed tunnel count or health is re-registered immediately. An
    /// unhealthy or unreachable control API marks the server unreachable so it
    /// drops out of selection; a draining server stays draining.
    pub async fn sync_load(&self, control: &dyn ServerControl) -> Result<NodeHealth, ControlError> {
        let result = control.health(&self.record()).await;
        let healthy = matches!(&result, Ok(health) if health.healthy);
        let active_tunnels = result.as_ref().ok().map(|h| h.active_tunnels);

        let changed = self.record_tx.send_if_modified(|record| {
            let before = (record.current_load, record.status);
            if let Some(active) = active_tunnels {
                record.current_load = active;
            }
            record.status = match (record.status, healthy) {
                (ServerStatus::Draining, _) => ServerStatus::Draining,
                (_, true) => ServerStatus::Active,
                (_, false) => ServerStatus::Unreachable,
            };
            before != (record.current_load, record.status)
        });

        if changed {
            let record = self.record_tx.borrow();
            debug!(
                server_id = %self.server_id,
                load = record.current_load,
                status = %record.status,
                "Local load changed, refreshing registration"
            );
        }
        result
    }

    /// Re-register without changing the record
    pub fn refresh_now(&self) {
        self.record_tx.send_modify(|_| {});
    }

    /// Stop refreshing and remove the registration
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            warn!(server_id = %self.server_id, error = %e, "Registration task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_validated_against_ttl() {
        let config = RefresherConfig::default();
        assert!(config.validate(Duration::from_secs(300)).is_ok());
        assert!(config.validate(Duration::from_secs(60)).is_err());
        assert!(RefresherConfig { interval_secs: 0 }
            .validate(Duration::from_secs(300))
            .is_err());
    }
}
