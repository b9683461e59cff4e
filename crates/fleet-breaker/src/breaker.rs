//! Circuit breaker state machine
//!
//! Transitions are lazy: an open circuit moves to half-open on the first call
//! attempted after `reset_timeout`, there is no timer task.
//!
//! Every transition bumps a generation counter. Outcomes of calls admitted
//! under an earlier generation still count in the statistics but never drive a
//! transition, so a slow call that started while closed cannot close a circuit
//! that has since opened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::CircuitBreakerConfig;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Result of a call made through a breaker
///
/// `Open` is returned without running the call, so callers can tell "this
/// server is down, try another" apart from an error the server returned.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("Circuit '{name}' is open (retry after {retry_after:?})")]
    Open { name: String, retry_after: Duration },

    #[error("Call through circuit '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout { .. })
    }

    /// The wrapped call's own error, if it ran and failed
    pub fn inner(&self) -> Option<&E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Per-breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub timed_out_requests: u64,
    /// `successfulRequests / totalRequests * 100`, 100 before any request
    pub success_rate: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    generation: u64,
    failure_count: u32,
    success_count: u32,
    probes_in_flight: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
    timed_out_requests: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            failure_count: 0,
            success_count: 0,
            probes_in_flight: 0,
            last_failure: None,
            last_failure_at: None,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            rejected_requests: 0,
            timed_out_requests: 0,
        }
    }
}

/// Admission ticket for one call; releases its half-open probe slot on drop
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.probe {
            return;
        }
        let mut inner = self.breaker.lock();
        if inner.generation == self.generation && inner.probes_in_flight > 0 {
            inner.probes_in_flight -= 1;
        }
    }
}

/// Fault isolator around calls to one integration point
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current stored state
    ///
    /// An open circuit whose reset timeout has elapsed still reports `Open`
    /// until the next call attempt moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        let success_rate = if inner.total_requests == 0 {
            100.0
        } else {
            inner.successful_requests as f64 * 100.0 / inner.total_requests as f64
        };

        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            rejected_requests: inner.rejected_requests,
            timed_out_requests: inner.timed_out_requests,
            success_rate,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Force the circuit closed and clear its counters
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.last_failure = None;
        debug!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Run `call` through the breaker; every error counts as a failure
    pub async fn execute<T, E, F, Fut>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(call, |_| true).await
    }

    /// Run `call` through the breaker, counting only errors for which
    /// `is_failure` returns true against the circuit
    ///
    /// Errors that prove the integration point is reachable (a server
    /// refusing a request, say) can be classified as non-failures.
    pub async fn execute_classified<T, E, F, Fut, C>(
        &self,
        call: F,
        is_failure: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(retry_after) => {
                debug!(
                    breaker = %self.name,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Call rejected by open circuit"
                );
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                    retry_after,
                });
            }
        };

        let timeout = self.config.timeout();
        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(Ok(value)) => {
                self.record_success(permit.generation);
                Ok(value)
            }
            Ok(Err(err)) => {
                if is_failure(&err) {
                    self.record_failure(permit.generation, false);
                } else {
                    self.record_success(permit.generation);
                }
                Err(BreakerError::Inner(err))
            }
            Err(_) => {
                self.record_failure(permit.generation, true);
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    timeout,
                })
            }
        };

        drop(permit);
        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Counters stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a call or return how long until the next probe is allowed
    fn acquire(&self) -> Result<Permit<'_>, Duration> {
        let mut inner = self.lock();
        inner.total_requests += 1;

        match inner.state {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                generation: inner.generation,
                probe: false,
            }),
            CircuitState::Open => {
                let reset_timeout = self.config.reset_timeout();
                let elapsed = inner
                    .last_failure
                    .map(|at| Instant::now().saturating_duration_since(at))
                    .unwrap_or(reset_timeout);

                if elapsed >= reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probes_in_flight = 1;
                    Ok(Permit {
                        breaker: self,
                        generation: inner.generation,
                        probe: true,
                    })
                } else {
                    inner.rejected_requests += 1;
                    Err(reset_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_max_probes() {
                    inner.probes_in_flight += 1;
                    Ok(Permit {
                        breaker: self,
                        generation: inner.generation,
                        probe: true,
                    })
                } else {
                    inner.rejected_requests += 1;
                    Err(Duration::ZERO)
                }
            }
        }
    }

    fn record_success(&self, generation: u64) {
        let mut inner = self.lock();
        inner.successful_requests += 1;
        if inner.generation != generation {
            return;
        }

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                } else {
                    debug!(
                        breaker = %self.name,
                        successes = inner.success_count,
                        needed = self.config.success_threshold,
                        "Half-open probe succeeded"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, generation: u64, timed_out: bool) {
        let mut inner = self.lock();
        inner.failed_requests += 1;
        if timed_out {
            inner.timed_out_requests += 1;
        }
        if inner.generation != generation {
            return;
        }

        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                } else {
                    debug!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        timed_out,
                        "Call failed"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.probes_in_flight = 0;
        inner.success_count = 0;

        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                if from != CircuitState::Closed {
                    info!(breaker = %self.name, from = %from, "Circuit breaker closed");
                }
            }
            CircuitState::Open => warn!(
                breaker = %self.name,
                from = %from,
                failures = inner.failure_count,
                reset_timeout_ms = self.config.reset_timeout_ms,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                breaker = %self.name,
                "Circuit breaker half-open, allowing probe calls"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout_ms: 1_000,
            reset_timeout_ms: 30_000,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.execute(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        breaker.execute(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn test_starts_closed_and_passes_calls() {
        let breaker = CircuitBreaker::new("s1", config());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.stats().success_rate, 100.0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("s1", config());
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.stats().failure_count, 2);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.stats().failure_count, 0);

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_inner_error_is_returned() {
        let breaker = CircuitBreaker::new("s1", config());
        let err = fail(&breaker).await.unwrap_err();
        assert_eq!(err.inner(), Some(&"boom"));
        assert!(!err.is_open());
    }

    #[tokio::test]
    async fn test_classified_error_does_not_trip() {
        let breaker = CircuitBreaker::new("s1", config());
        for _ in 0..5 {
            let err = breaker
                .execute_classified(|| async { Err::<(), _>("rejected") }, |_| false)
                .await
                .unwrap_err();
            assert!(err.inner().is_some());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("slow", config());
        let err = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, &'static str>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        let stats = breaker.stats();
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.timed_out_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_concurrent_probes() {
        let breaker = Arc::new(CircuitBreaker::new("s1", config()));
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        let started = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let breaker = breaker.clone();
            let started = started.clone();
            handles.push(tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Ok::<_, &'static str>(())
                    })
                    .await
            }));
        }
        while started.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        // Two probes in flight (success_threshold = 2): a third is rejected
        let third = succeed(&breaker).await.unwrap_err();
        assert!(third.is_open());

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_slot() {
        let breaker = CircuitBreaker::new("s1", config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        // Start two probes and abandon them before they finish
        for _ in 0..2 {
            let probe = breaker.execute(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, &'static str>(())
            });
            let _ = tokio::time::timeout(Duration::from_millis(1), probe).await;
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Slots were released, so probes are admitted again
        succeed(&breaker).await.unwrap();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_closes_circuit() {
        let breaker = CircuitBreaker::new("s1", config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let breaker = CircuitBreaker::new("s1", config());
        succeed(&breaker).await.unwrap();
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        succeed(&breaker).await.unwrap_err();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.failed_requests, 3);
        assert_eq!(stats.rejected_requests, 1);
        assert_eq!(stats.success_rate, 20.0);
        assert!(stats.last_failure_at.is_some());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }
}
