//! JWT (JSON Web Token) handling

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JWT claims for control-plane API access
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwtClaims {
    /// Subject (account ID)
    pub sub: String,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time (timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Custom: tunnels the account's plan allows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_quota: Option<u32>,
}

impl JwtClaims {
    pub fn new(account_id: String, issuer: String, audience: String, validity: Duration) -> Self {
        let now = Utc::now();
        let exp = now + validity;

        Self {
            sub: account_id,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: issuer,
            aud: audience,
            plan_quota: None,
        }
    }

    pub fn with_plan_quota(mut self, quota: u32) -> Self {
        self.plan_quota = Some(quota);
        self
    }

    /// A token stops being accepted at the instant `exp` is reached
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Time left until `exp` at millisecond precision, zero once expired
    ///
    /// Ends at the same instant [`JwtClaims::is_expired`] turns true, so a
    /// blacklist entry written for this long covers every moment the token
    /// could still be accepted.
    pub fn remaining_lifetime(&self) -> std::time::Duration {
        let millis = self
            .exp
            .saturating_mul(1000)
            .saturating_sub(Utc::now().timestamp_millis());
        if millis <= 0 {
            std::time::Duration::ZERO
        } else {
            std::time::Duration::from_millis(millis as u64)
        }
    }
}

/// JWT errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,
}

/// JWT validator
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Create a new JWT validator using HMAC-SHA256 (symmetric secret)
    ///
    /// Validates signature and expiration. Issuer and audience are only
    /// checked when set with [`JwtValidator::with_issuer`] and
    /// [`JwtValidator::with_audience`].
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.validate_nbf = false;

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn with_audience(mut self, audience: String) -> Self {
        self.validation.set_audience(&[audience]);
        self
    }

    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn validate(&self, token: &str) -> Result<JwtClaims, JwtError> {
        let token_data = decode::<JwtClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                if matches!(e.kind(), ErrorKind::ExpiredSignature) {
                    return JwtError::TokenExpired;
                }
                let malformed = matches!(
                    e.kind(),
                    ErrorKind::InvalidToken
                        | ErrorKind::InvalidSignature
                        | ErrorKind::InvalidIssuer
                        | ErrorKind::InvalidAudience
                        | ErrorKind::Base64(_)
                        | ErrorKind::Json(_)
                        | ErrorKind::Utf8(_)
                );
                if malformed {
                    JwtError::InvalidToken
                } else {
                    JwtError::EncodingError(e)
                }
            })?;

        // decode() allows clock leeway; expiry is enforced exactly here
        if token_data.claims.is_expired() {
            return Err(JwtError::TokenExpired);
        }

        Ok(token_data.claims)
    }

    /// Encode JWT using HMAC-SHA256 (symmetric secret)
    pub fn encode(secret: &[u8], claims: &JwtClaims) -> Result<String, JwtError> {
        let header = Header::new(Algorithm::HS256);
        let encoding_key = EncodingKey::from_secret(secret);

        Ok(encode(&header, claims, &encoding_key)?)
    }
}
