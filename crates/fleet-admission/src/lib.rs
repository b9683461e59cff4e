//! Admission control for new tunnels
//!
//! Decides whether a tunnel may be created from the account's plan quota and
//! the live fleet capacity. A fixed share of system capacity is held back so
//! that concurrent, non-linearizable admissions on different replicas cannot
//! push the fleet past its real limit.

pub mod config;
pub mod controller;

pub use config::CapacityConfig;
pub use controller::{AdmissionController, AdmissionError, AdmissionResult, Rejection};
