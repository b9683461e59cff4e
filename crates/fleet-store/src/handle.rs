//! Store selection and lifecycle
//!
//! The backend is chosen once, here. Components receive the resulting
//! [`SharedStore`] and never look at the deployment mode again.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{MemoryStore, RedisStore, SharedStore, StoreError};

/// Store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Shared store URL (e.g. `redis://cache:6379/0`). `None` selects the
    /// process-local store.
    pub url: Option<String>,

    /// Upper bound for every store call, in milliseconds
    pub op_timeout_ms: u64,

    /// Upper bound for a complete key listing across all `SCAN` round trips,
    /// in milliseconds
    pub scan_timeout_ms: u64,

    /// Keys requested per `SCAN` round trip
    pub scan_batch: usize,

    /// Sweep interval for the in-memory store, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            op_timeout_ms: 2_000,
            scan_timeout_ms: 5_000,
            scan_batch: 100,
            sweep_interval_secs: 30,
        }
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.op_timeout_ms == 0 {
            return Err("op_timeout_ms must be greater than 0".to_string());
        }
        if self.scan_timeout_ms < self.op_timeout_ms {
            return Err(format!(
                "scan_timeout_ms ({}) must be at least op_timeout_ms ({})",
                self.scan_timeout_ms, self.op_timeout_ms
            ));
        }
        if self.scan_batch == 0 {
            return Err("scan_batch must be greater than 0".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Owned store handle with an explicit init/shutdown lifecycle
///
/// ```ignore
/// let handle = StoreHandle::connect(&StoreConfig::default()).await?;
/// let registry = ServerRegistry::new(handle.store(), RegistryConfig::default());
/// // ...
/// handle.shutdown();
/// ```
pub struct StoreHandle {
    store: SharedStore,
    sweeper: Option<JoinHandle<()>>,
}

impl StoreHandle {
    /// Connect to the configured backend
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        config
            .validate()
            .map_err(|e| StoreError::Unavailable(format!("invalid store config: {}", e)))?;

        match config.url.as_deref() {
            Some(url) => {
                let store = RedisStore::connect(url, config.op_timeout(), config.scan_batch)
                    .await?
                    .with_scan_timeout(config.scan_timeout());
                Ok(Self::from_store(Arc::new(store)))
            }
            None => Ok(Self::memory(Duration::from_secs(config.sweep_interval_secs))),
        }
    }

    /// Process-local store with its sweep task
    pub fn memory(sweep_every: Duration) -> Self {
        let store = MemoryStore::new();
        let sweeper = store.spawn_sweeper(sweep_every);
        Self {
            store: Arc::new(store),
            sweeper: Some(sweeper),
        }
    }

    /// Wrap an already constructed store
    pub fn from_store(store: SharedStore) -> Self {
        Self {
            store,
            sweeper: None,
        }
    }

    /// Clone of the shared store for injection into a component
    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Stop background work owned by the handle
    pub fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        info!(backend = self.store.backend(), "State store handle shut down");
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.op_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_config() {
        let config = StoreConfig {
            scan_batch: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            op_timeout_ms: 2_000,
            scan_timeout_ms: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_no_url_selects_memory_backend() {
        let handle = StoreHandle::connect(&StoreConfig::default()).await.unwrap();
        assert_eq!(handle.store().backend(), "memory");
        assert!(handle.store().ping().await.is_ok());
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_store_clones_share_state() {
        let handle = StoreHandle::memory(Duration::from_secs(30));
        let a = handle.store();
        let b = handle.store();

        a.set_with_ttl("server:x", "1", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(b.exists("server:x").await.unwrap());
    }
}
