//! Store-backed server registry
//!
//! Registration is ephemeral: the only removal mechanism that must exist is TTL
//! expiry. `unregister` is an optional fast path for graceful shutdown.
//!
//! Fleet queries fail closed. When the store cannot be read, selection reports
//! no server and stats report an empty fleet: rejecting a tunnel is safe,
//! placing one on stale data is not.

use fleet_store::{decode_record, encode_record, KeySpace, SharedStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::record::select_best;
use crate::{CapacitySnapshot, ServerRecord};

/// Default lifetime of a server registration without refresh
pub const DEFAULT_SERVER_TTL: Duration = Duration::from_secs(300);

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid server record: {0}")]
    InvalidRecord(String),
}

impl RegistryError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, RegistryError::Store(e) if e.is_unavailable())
    }
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Seconds a registration stays visible without refresh
    pub server_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server_ttl_secs: DEFAULT_SERVER_TTL.as_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn server_ttl(&self) -> Duration {
        Duration::from_secs(self.server_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server_ttl_secs == 0 {
            return Err("server_ttl_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Fleet registry over the shared store
#[derive(Clone)]
pub struct ServerRegistry {
    store: SharedStore,
    ttl: Duration,
}

impl ServerRegistry {
    pub fn new(store: SharedStore, config: RegistryConfig) -> Self {
        info!(
            backend = store.backend(),
            ttl_secs = config.server_ttl_secs,
            "Creating server registry"
        );
        Self {
            store,
            ttl: config.server_ttl(),
        }
    }

    /// TTL applied on every registration write
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key_for(server_id: &str) -> String {
        KeySpace::Server.key(server_id)
    }

    /// Write or refresh a server's registration. Idempotent, last write wins.
    pub async fn register(&self, record: &ServerRecord) -> Result<(), RegistryError> {
        record.validate().map_err(RegistryError::InvalidRecord)?;

        let raw = encode_record(record)?;
        self.store
            .set_with_ttl(&Self::key_for(&record.id), &raw, self.ttl)
            .await?;

        debug!(
            server_id = %record.id,
            load = record.current_load,
            capacity = record.max_concurrent_tunnels,
            status = %record.status,
            "Registered server"
        );
        Ok(())
    }

    /// Read one server's registration
    ///
    /// Malformed records and records whose id does not match their key are
    /// reported as absent.
    pub async fn get(&self, server_id: &str) -> Result<Option<ServerRecord>, RegistryError> {
        let key = Self::key_for(server_id);
        let Some(raw) = self.store.get(&key).await? else {
            trace!(server_id = %server_id, "Server registration absent or expired");
            return Ok(None);
        };

        Ok(Self::decode(&key, server_id, &raw))
    }

    /// Every live registration, sorted by id
    ///
    /// Expired keys are absent from the scan; keys that expire between the scan
    /// and the read are skipped. Costs one listing and one multi-key read.
    pub async fn get_all(&self) -> Result<Vec<ServerRecord>, RegistryError> {
        let keys = self.store.scan(&KeySpace::Server.pattern()).await?;
        let values = self.store.get_many(&keys).await?;

        let mut records = Vec::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(values) {
            let Some(server_id) = KeySpace::Server.id_of(key) else {
                continue;
            };
            if let Some(raw) = raw {
                if let Some(record) = Self::decode(key, server_id, &raw) {
                    records.push(record);
                }
            }
        }

        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Remove a registration on graceful shutdown
    pub async fn unregister(&self, server_id: &str) -> Result<(), RegistryError> {
        self.store.delete(&Self::key_for(server_id)).await?;
        info!(server_id = %server_id, "Unregistered server");
        Ok(())
    }

    /// Least relatively utilized active server with a free slot
    pub async fn best_server(&self) -> Option<ServerRecord> {
        self.best_server_excluding(&HashSet::new()).await
    }

    /// Same as [`best_server`](Self::best_server), skipping the given ids
    pub async fn best_server_excluding(&self, excluded: &HashSet<String>) -> Option<ServerRecord> {
        let records = match self.get_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Fleet unreadable, reporting no server available");
                return None;
            }
        };

        let best = select_best(records.iter().filter(|r| !excluded.contains(&r.id))).cloned();
        match &best {
            Some(server) => debug!(
                server_id = %server.id,
                load = server.current_load,
                capacity = server.max_concurrent_tunnels,
                "Selected server"
            ),
            None => debug!(
                candidates = records.len(),
                excluded = excluded.len(),
                "No eligible server"
            ),
        }
        best
    }

    /// Aggregate capacity of the live fleet, empty when the store is unreadable
    pub async fn fleet_stats(&self) -> CapacitySnapshot {
        match self.try_fleet_stats().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Fleet unreadable, reporting empty capacity snapshot");
                CapacitySnapshot::default()
            }
        }
    }

    /// Aggregate capacity, surfacing store failures to the caller
    pub async fn try_fleet_stats(&self) -> Result<CapacitySnapshot, RegistryError> {
        let records = self.get_all().await?;
        Ok(CapacitySnapshot::from_records(&records))
    }

    fn decode(key: &str, server_id: &str, raw: &str) -> Option<ServerRecord> {
        let record: ServerRecord = decode_record(key, raw)?;
        if record.id != server_id {
            warn!(
                key = %key,
                record_id = %record.id,
                "Ignoring server record stored under another id"
            );
            return None;
        }
        if let Err(reason) = record.validate() {
            warn!(key = %key, reason = %reason, "Ignoring invalid server record");
            return None;
        }
        Some(record)
    }
}
