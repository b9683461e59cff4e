//! Instance heartbeats
//!
//! Each instance owns its `heartbeat:<instanceId>` key, so writes never race
//! across replicas and last write wins.

use fleet_store::{decode_record, encode_record, KeySpace};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::{LivenessError, LivenessTracker};

/// Stored heartbeat payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRecord {
    pub instance_id: String,
    /// Unix time in milliseconds supplied by the instance
    pub timestamp_ms: i64,
}

fn validate_instance_id(instance_id: &str) -> Result<(), LivenessError> {
    let bad = instance_id.is_empty()
        || instance_id
            .chars()
            .any(|c| c == '*' || c == '?' || c.is_whitespace());
    if bad {
        return Err(LivenessError::InvalidInstanceId(instance_id.to_string()));
    }
    Ok(())
}

impl LivenessTracker {
    /// Record a heartbeat. `ttl` defaults to the configured heartbeat TTL.
    pub async fn set_heartbeat(
        &self,
        instance_id: &str,
        timestamp_ms: i64,
        ttl: Option<Duration>,
    ) -> Result<(), LivenessError> {
        validate_instance_id(instance_id)?;

        let record = HeartbeatRecord {
            instance_id: instance_id.to_string(),
            timestamp_ms,
        };
        let raw = encode_record(&record)?;
        let ttl = ttl.unwrap_or_else(|| self.heartbeat_ttl());

        self.store
            .set_with_ttl(&KeySpace::Heartbeat.key(instance_id), &raw, ttl)
            .await?;

        trace!(instance_id = %instance_id, timestamp_ms, "Heartbeat recorded");
        Ok(())
    }

    /// Latest heartbeat timestamp, `None` when absent, expired or unreadable
    pub async fn get_heartbeat(&self, instance_id: &str) -> Option<i64> {
        let key = KeySpace::Heartbeat.key(instance_id);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    instance_id = %instance_id,
                    error = %e,
                    "Heartbeat unreadable, treating instance as absent"
                );
                return None;
            }
        };

        Self::decode_heartbeat(&key, instance_id, &raw)
    }

    pub async fn delete_heartbeat(&self, instance_id: &str) -> Result<(), LivenessError> {
        self.store
            .delete(&KeySpace::Heartbeat.key(instance_id))
            .await?;
        debug!(instance_id = %instance_id, "Heartbeat deleted");
        Ok(())
    }

    /// Every live heartbeat; empty when the store cannot be read
    pub async fn get_all_heartbeats(&self) -> HashMap<String, i64> {
        match self.try_get_all_heartbeats().await {
            Ok(heartbeats) => heartbeats,
            Err(e) => {
                warn!(error = %e, "Heartbeats unreadable, treating all instances as absent");
                HashMap::new()
            }
        }
    }

    /// Every live heartbeat, propagating store errors
    pub async fn try_get_all_heartbeats(&self) -> Result<HashMap<String, i64>, LivenessError> {
        let keys = self.store.scan(&KeySpace::Heartbeat.pattern()).await?;

        let values = self.store.get_many(&keys).await?;

        let mut heartbeats = HashMap::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(values) {
            let Some(instance_id) = KeySpace::Heartbeat.id_of(key) else {
                continue;
            };
            // Expired between scan and read
            let Some(raw) = raw else {
                continue;
            };
            if let Some(timestamp) = Self::decode_heartbeat(key, instance_id, &raw) {
                heartbeats.insert(instance_id.to_string(), timestamp);
            }
        }

        Ok(heartbeats)
    }

    /// Ids from `known` with no live heartbeat
    ///
    /// If the store cannot be read every known instance is reported dead.
    pub async fn dead_instances<I, S>(&self, known: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alive: HashSet<String> = self.get_all_heartbeats().await.into_keys().collect();

        let mut dead: Vec<String> = known
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .filter(|id| !alive.contains(id))
            .collect();
        dead.sort();
        dead.dedup();

        if !dead.is_empty() {
            debug!(count = dead.len(), "Instances without live heartbeat");
        }
        dead
    }

    fn decode_heartbeat(key: &str, instance_id: &str, raw: &str) -> Option<i64> {
        let record: HeartbeatRecord = decode_record(key, raw)?;
        if record.instance_id != instance_id {
            warn!(
                key = %key,
                stored_id = %record.instance_id,
                "Heartbeat id does not match its key, ignoring"
            );
            return None;
        }
        Some(record.timestamp_ms)
    }
}
