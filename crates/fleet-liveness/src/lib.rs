//! Instance liveness and token revocation on the shared store
//!
//! Heartbeats and blacklist entries are both TTL keys: a heartbeat that is not
//! refreshed disappears, and a blacklist entry disappears once the token it
//! revokes would have expired anyway.
//!
//! Failure policy differs by concern:
//! - heartbeat reads fail toward "absent", so an unreadable store makes
//!   instances look dead
//! - token checks follow [`TokenCheckPolicy`], chosen explicitly by the caller

pub mod blacklist;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod publisher;
pub mod tracker;

pub use blacklist::token_key;
pub use config::{LivenessConfig, TokenCheckPolicy, DEFAULT_HEARTBEAT_TTL};
pub use error::LivenessError;
pub use heartbeat::HeartbeatRecord;
pub use publisher::HeartbeatTask;
pub use tracker::LivenessTracker;
