//! Timeout constants and the relationships they must keep
//!
//! - the HTTP client gives up before the breaker does, so the breaker sees a
//!   real transport error rather than its own timeout in the common case
//! - registrations and heartbeats are refreshed well inside their TTL

use std::time::Duration;

/// Request timeout of the HTTP client talking to a server's control API
pub const CONTROL_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default breaker call timeout around control API calls
pub const BREAKER_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval at which a server re-registers itself
pub const REGISTRATION_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Default interval at which a node reads its own tunnel count
pub const LOAD_SYNC_INTERVAL: Duration = Duration::from_secs(10);
