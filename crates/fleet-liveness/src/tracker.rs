use fleet_store::SharedStore;
use std::time::Duration;
use tracing::info;

use crate::{LivenessConfig, LivenessError, TokenCheckPolicy};

/// Heartbeat and token-blacklist tracker over the shared store
///
/// Heartbeat operations live in [`crate::heartbeat`], blacklist operations in
/// [`crate::blacklist`].
#[derive(Clone)]
pub struct LivenessTracker {
    pub(crate) store: SharedStore,
    pub(crate) config: LivenessConfig,
}

impl LivenessTracker {
    pub fn new(store: SharedStore, config: LivenessConfig) -> Result<Self, LivenessError> {
        config.validate().map_err(LivenessError::InvalidConfig)?;

        info!(
            backend = store.backend(),
            heartbeat_ttl_secs = config.heartbeat_ttl_secs,
            token_check_policy = %config.token_check_policy,
            "Creating liveness tracker"
        );

        Ok(Self { store, config })
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        self.config.heartbeat_ttl()
    }

    pub fn token_check_policy(&self) -> TokenCheckPolicy {
        self.config.token_check_policy
    }
}
