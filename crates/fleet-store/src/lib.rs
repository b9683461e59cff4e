//! Shared state store for the tunnel fleet control plane
//!
//! Every control-plane replica talks to the same TTL-capable key/value store.
//! Components never branch on the deployment mode: they hold an
//! `Arc<dyn StateStore>` chosen once at construction time.
//!
//! - [`RedisStore`]: the shared store used by multi-replica deployments
//! - [`MemoryStore`]: process-local fallback for single-node mode only
//!
//! All operations are fallible and report [`StoreError`] instead of panicking,
//! so each caller can fall back to its documented conservative result.

pub mod codec;
pub mod error;
pub mod handle;
pub mod keys;
pub mod memory;
pub mod redis_store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use codec::{decode_record, encode_record, RECORD_VERSION};
pub use error::StoreError;
pub use handle::{StoreConfig, StoreHandle};
pub use keys::KeySpace;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Shared handle passed to every component
pub type SharedStore = Arc<dyn StateStore>;

/// Single-key operations against a TTL-capable key/value store
///
/// There are no multi-key transactions: each call is atomic on its own key.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a key. `Ok(None)` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a key that the store expires after `ttl`. Last write wins.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Read several keys in one call, answering in the order given.
    ///
    /// Backends with a multi-key read override this so that fetching a whole
    /// key space costs one bounded round trip rather than one per key.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Remaining time-to-live of a key, `None` if absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// List keys matching a glob pattern (`*` and `?`).
    ///
    /// Implementations iterate in bounded batches and never issue an unbounded
    /// listing command against the store. The whole listing is bounded by one
    /// deadline, not only each batch.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Round-trip health check
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for logs ("redis", "memory")
    fn backend(&self) -> &'static str;
}
