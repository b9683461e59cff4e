//! Redis-backed shared store
//!
//! Connection recovery is owned by `redis::aio::ConnectionManager`; callers only
//! ever see a bounded call that either succeeds or reports the store unavailable.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::{StateStore, StoreError};

/// Shared store backed by Redis
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    scan_timeout: Duration,
    scan_batch: usize,
}

impl RedisStore {
    /// Connect to Redis at `url`
    ///
    /// The initial connection is bounded by `op_timeout` as well, so a
    /// misconfigured URL fails startup instead of hanging it.
    pub async fn connect(
        url: &str,
        op_timeout: Duration,
        scan_batch: usize,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(op_timeout))??;

        info!(
            op_timeout_ms = op_timeout.as_millis() as u64,
            scan_batch,
            "Connected to shared state store"
        );

        Ok(Self {
            conn,
            op_timeout,
            scan_timeout: op_timeout,
            scan_batch: scan_batch.max(1),
        })
    }

    /// Overall limit for a complete `scan`, across all of its round trips
    ///
    /// Defaults to the single-call timeout.
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        within(self.op_timeout, async { op.await.map_err(StoreError::from) }).await
    }
}

/// Run `op` under a deadline, reporting an overrun as [`StoreError::Timeout`]
async fn within<T, F>(limit: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Millisecond TTL for `SET ... PX`, never zero
fn ttl_millis(key: &str, ttl: Duration) -> Result<u64, StoreError> {
    let millis = ttl.as_millis();
    if millis == 0 {
        return Err(StoreError::InvalidTtl {
            key: key.to_string(),
            ttl,
        });
    }
    Ok(millis.min(u64::MAX as u128) as u64)
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let millis = ttl_millis(key, ttl)?;
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await
        .map(|_| ())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("EXISTS")
                .arg(key)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await
        .map(|n| n > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let millis = self
            .bounded(async move {
                redis::cmd("PTTL")
                    .arg(key)
                    .query_async::<_, i64>(&mut conn)
                    .await
            })
            .await?;

        // -2: no such key, -1: key without expiry (never written by the fleet)
        Ok(match millis {
            -2 => None,
            -1 => Some(Duration::MAX),
            ms => Some(Duration::from_millis(ms.max(0) as u64)),
        })
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("MGET")
                .arg(keys)
                .query_async::<_, Vec<Option<String>>>(&mut conn)
                .await
        })
        .await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        within(self.scan_timeout, async {
            let mut keys = BTreeSet::new();
            let mut cursor: u64 = 0;
            let mut batches = 0usize;

            loop {
                let mut conn = self.conn.clone();
                let (next, batch) = self
                    .bounded(async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(pattern)
                            .arg("COUNT")
                            .arg(self.scan_batch)
                            .query_async::<_, (u64, Vec<String>)>(&mut conn)
                            .await
                    })
                    .await?;

                batches += 1;
                // SCAN may return a key more than once
                keys.extend(batch);

                if next == 0 {
                    break;
                }
                cursor = next;
            }

            debug!(pattern = %pattern, batches, found = keys.len(), "Scanned store keys");
            Ok(keys.into_iter().collect())
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
        })
        .await
        .map(|_| ())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
