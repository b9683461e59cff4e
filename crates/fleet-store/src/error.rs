use std::time::Duration;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("State store unavailable: {0}")]
    Unavailable(String),

    #[error("State store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid TTL for key {key}: {ttl:?}")]
    InvalidTtl { key: String, ttl: Duration },

    #[error("Record encoding error: {0}")]
    Encoding(String),
}

impl StoreError {
    /// True when the store could not be reached in time.
    ///
    /// Callers treat both unreachable and slow stores as unavailable and take
    /// their conservative fallback.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}
