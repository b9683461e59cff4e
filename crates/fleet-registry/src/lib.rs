//! Server registry for the tunnel-serving fleet
//!
//! Tunnel servers register themselves in the shared store with a TTL and keep
//! refreshing the entry. A server that stops refreshing expires and silently
//! drops out of every fleet query.

pub mod record;
pub mod registry;
pub mod snapshot;

pub use record::{select_best, ServerRecord, ServerStatus};
pub use registry::{RegistryConfig, RegistryError, ServerRegistry, DEFAULT_SERVER_TTL};
pub use snapshot::CapacitySnapshot;
