//! Control-plane flow for placing tunnels on the fleet
//!
//! Admission -> server selection -> provisioning through the server's circuit
//! breaker. Servers keep their own registration alive with
//! [`RegistrationRefresher`].

pub mod coordinator;
pub mod refresher;
pub mod server_control;
pub mod timeouts;

pub use coordinator::{
    CoordinatorConfig, CoordinatorError, FleetCoordinator, TunnelPlacement, TunnelRequest,
};
pub use refresher::{RefresherConfig, RefresherError, RegistrationRefresher};
pub use server_control::{
    ControlError, HttpServerControl, NodeHealth, ProvisionRequest, ProvisionedTunnel,
    ServerControl,
};
pub use timeouts::LOAD_SYNC_INTERVAL;
