//! Token revocation list
//!
//! Keys are `blacklist:<sha256(token) hex>`; raw tokens are never written to the
//! store. An entry lives exactly as long as the token it revokes would have.

use fleet_store::KeySpace;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{LivenessError, LivenessTracker, TokenCheckPolicy};

const REVOKED: &str = "1";

/// Store key for a token's blacklist entry
pub fn token_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    KeySpace::Blacklist.key(&format!("{:x}", hasher.finalize()))
}

impl LivenessTracker {
    /// Revoke a token for the rest of its lifetime
    ///
    /// A token with no lifetime left is already unusable and is not written.
    pub async fn blacklist_token(
        &self,
        token: &str,
        remaining_lifetime: Duration,
    ) -> Result<(), LivenessError> {
        if remaining_lifetime < Duration::from_millis(1) {
            debug!("Token already expired, nothing to blacklist");
            return Ok(());
        }

        self.store
            .set_with_ttl(&token_key(token), REVOKED, remaining_lifetime)
            .await?;

        info!(
            ttl_secs = remaining_lifetime.as_secs(),
            "Token blacklisted"
        );
        Ok(())
    }

    /// Whether a token is revoked, applying the configured
    /// [`TokenCheckPolicy`] when the store cannot be read
    pub async fn is_blacklisted(&self, token: &str) -> bool {
        match self.check_token(token).await {
            Ok(revoked) => revoked,
            Err(e) => match self.config.token_check_policy {
                TokenCheckPolicy::FailOpen => {
                    error!(
                        alert = true,
                        error = %e,
                        "Token blacklist unreadable, accepting token unchecked"
                    );
                    false
                }
                TokenCheckPolicy::FailClosed => {
                    warn!(
                        error = %e,
                        "Token blacklist unreadable, treating token as revoked"
                    );
                    true
                }
            },
        }
    }

    /// Whether a token is revoked, propagating store errors
    pub async fn check_token(&self, token: &str) -> Result<bool, LivenessError> {
        Ok(self.store.exists(&token_key(token)).await?)
    }

    /// Remaining lifetime of a token's blacklist entry, `None` if not revoked
    pub async fn blacklist_ttl(&self, token: &str) -> Result<Option<Duration>, LivenessError> {
        Ok(self.store.ttl(&token_key(token)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LivenessConfig;
    use fleet_store::{MemoryStore, SharedStore, StateStore};
    use std::sync::Arc;

    #[test]
    fn test_token_key_hides_token() {
        let key = token_key("secret-token");
        assert!(key.starts_with("blacklist:"));
        assert!(!key.contains("secret-token"));
        // sha256 hex digest
        assert_eq!(key.len(), "blacklist:".len() + 64);
        assert_eq!(key, token_key("secret-token"));
        assert_ne!(key, token_key("other-token"));
    }

    #[tokio::test]
    async fn test_expired_token_not_written() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let tracker = LivenessTracker::new(store.clone(), LivenessConfig::default()).unwrap();

        tracker.blacklist_token("t", Duration::ZERO).await.unwrap();
        assert!(!store.exists(&token_key("t")).await.unwrap());
        assert!(!tracker.is_blacklisted("t").await);
    }
}
