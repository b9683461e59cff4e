//! Circuit breakers for calls into tunnel servers
//!
//! One breaker exists per protected integration point (typically a server id)
//! in each process. Breakers are never shared through the store: they guard
//! this process's outbound call path, not global fleet health.
//!
//! States:
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: calls are rejected without running until `reset_timeout` elapses
//! - HalfOpen: a limited number of probe calls decide between Closed and Open

pub mod breaker;
pub mod config;
pub mod set;

pub use breaker::{BreakerError, BreakerStats, CircuitBreaker, CircuitState};
pub use config::CircuitBreakerConfig;
pub use set::CircuitBreakers;
