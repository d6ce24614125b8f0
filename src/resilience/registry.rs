//! Per-backend circuit breaker registry.
//!
//! # Responsibilities
//! - Create one breaker per backend identity on first use
//! - Share that breaker between every concurrent caller for the identity
//! - Manual reset, eviction and inspection for operators
//!
//! # Design Decisions
//! - Owned by the gateway process and passed by handle, never global
//! - Sharded map for lookup; state mutation locks only the one breaker
//! - Process restart resets everything to Closed

use std::sync::Arc;

use dashmap::DashMap;

use crate::resilience::circuit_breaker::{BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState};

#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    settings: BreakerSettings,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        tracing::info!(
            failure_threshold = settings.failure_threshold,
            recovery_timeout = ?settings.recovery_timeout,
            half_open_trial_budget = settings.half_open_trial_budget,
            "Circuit breaker registry initialized"
        );
        Self {
            breakers: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Breaker for `backend`, created Closed on first use.
    pub fn get(&self, backend: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(backend) {
            return existing.clone();
        }
        self.breakers
            .entry(backend.to_string())
            .or_insert_with(|| {
                tracing::debug!(backend = %backend, "Created circuit breaker");
                Arc::new(CircuitBreaker::new(backend, self.settings.clone()))
            })
            .clone()
    }

    /// Current state without creating a breaker; unknown backends are Closed.
    pub fn state(&self, backend: &str) -> CircuitState {
        self.breakers
            .get(backend)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, backend: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(backend).map(|b| b.snapshot())
    }

    /// Snapshots of every breaker, sorted by backend identity.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        all.sort_by(|a, b| a.backend.cmp(&b.backend));
        all
    }

    /// Reset one breaker. Returns false if it does not exist.
    pub fn reset(&self, backend: &str) -> bool {
        match self.breakers.get(backend) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        tracing::info!(count = self.breakers.len(), "All circuit breakers reset");
    }

    /// Drop a breaker; the next use starts Closed.
    pub fn evict(&self, backend: &str) -> bool {
        let removed = self.breakers.remove(backend).is_some();
        if removed {
            tracing::info!(backend = %backend, "Removed circuit breaker");
        }
        removed
    }

    pub fn clear(&self) {
        self.breakers.clear();
        tracing::info!("Circuit breaker registry cleared");
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}
