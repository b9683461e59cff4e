use fleet_store::StoreError;
use thiserror::Error;

/// Liveness tracker errors
#[derive(Debug, Error)]
pub enum LivenessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid instance id: {0:?}")]
    InvalidInstanceId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LivenessError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, LivenessError::Store(e) if e.is_unavailable())
    }
}
