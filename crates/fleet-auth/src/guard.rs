//! Token checks combining local JWT validation with the shared blacklist

use fleet_liveness::{LivenessError, LivenessTracker};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{JwtClaims, JwtError, JwtValidator};

/// Authentication errors
///
/// Rejections carry no detail about the mechanism (expiry, revocation,
/// signature); callers see a plain authentication failure.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication failed")]
    InvalidToken,

    #[error("Authentication failed")]
    TokenExpiredOrBlacklisted,

    #[error("Failed to revoke token: {0}")]
    Revocation(#[from] LivenessError),

    #[error("Token processing error: {0}")]
    Jwt(JwtError),
}

impl AuthError {
    /// True for rejections of the presented token
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidToken | AuthError::TokenExpiredOrBlacklisted
        )
    }
}

/// Validates tokens and maintains their revocation
#[derive(Clone)]
pub struct TokenGuard {
    validator: JwtValidator,
    liveness: LivenessTracker,
}

impl TokenGuard {
    pub fn new(validator: JwtValidator, liveness: LivenessTracker) -> Self {
        Self {
            validator,
            liveness,
        }
    }

    /// Accept a token only if it is well-signed, unexpired and not revoked
    pub async fn authenticate(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let claims = self.decode(token)?;

        if self.liveness.is_blacklisted(token).await {
            info!(subject = %claims.sub, "Rejected revoked token");
            return Err(AuthError::TokenExpiredOrBlacklisted);
        }

        Ok(claims)
    }

    /// Revoke a token for the rest of its lifetime
    ///
    /// Returns the lifetime the blacklist entry was written with; zero when the
    /// token had already expired and nothing was written.
    pub async fn revoke(&self, token: &str) -> Result<Duration, AuthError> {
        let claims = match self.validator.validate(token) {
            Ok(claims) => claims,
            Err(JwtError::TokenExpired) => {
                debug!("Token already expired, nothing to revoke");
                return Ok(Duration::ZERO);
            }
            Err(JwtError::InvalidToken) => return Err(AuthError::InvalidToken),
            Err(e) => return Err(AuthError::Jwt(e)),
        };

        let remaining = claims.remaining_lifetime();
        self.liveness.blacklist_token(token, remaining).await?;

        info!(
            subject = %claims.sub,
            remaining_ms = remaining.as_millis() as u64,
            "Token revoked"
        );
        Ok(remaining)
    }

    fn decode(&self, token: &str) -> Result<JwtClaims, AuthError> {
        match self.validator.validate(token) {
            Ok(claims) => Ok(claims),
            Err(JwtError::TokenExpired) => {
                debug!("Rejected expired token");
                Err(AuthError::TokenExpiredOrBlacklisted)
            }
            Err(JwtError::InvalidToken) => {
                debug!("Rejected invalid token");
                Err(AuthError::InvalidToken)
            }
            Err(e) => {
                warn!(error = %e, "Token could not be processed");
                Err(AuthError::Jwt(e))
            }
        }
    }
}
