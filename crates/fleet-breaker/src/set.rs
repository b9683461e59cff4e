//! Per-process collection of breakers keyed by integration point

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::{BreakerStats, CircuitBreaker, CircuitBreakerConfig};

/// Breakers created on first use with a shared configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Breaker for `name`, created closed if it does not exist yet
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = %name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, self.config.clone()))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Statistics for every breaker, sorted by name
    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self.breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Reset one breaker; returns false if it does not exist
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    /// Drop the breaker for a server that left the fleet
    pub fn remove(&self, name: &str) -> bool {
        self.breakers.remove(name).is_some()
    }

    /// Keep only the breakers whose names are in `live`, returning how many
    /// were dropped
    pub fn retain_live<'a, I>(&self, live: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let live: HashSet<&str> = live.into_iter().collect();
        let before = self.breakers.len();
        self.breakers.retain(|name, _| live.contains(name.as_str()));
        let dropped = before.saturating_sub(self.breakers.len());
        if dropped > 0 {
            debug!(dropped, remaining = self.breakers.len(), "Dropped breakers of departed servers");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
