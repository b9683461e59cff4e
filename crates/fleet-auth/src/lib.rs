//! Token authentication for the control plane
//!
//! Signature and expiry are checked locally; revocation is checked against the
//! shared blacklist so a token revoked on one replica is refused by all of them.

pub mod guard;
pub mod jwt;

pub use guard::{AuthError, TokenGuard};
pub use jwt::{JwtClaims, JwtError, JwtValidator};
