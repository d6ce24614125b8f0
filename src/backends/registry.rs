//! Backend registry.
//!
//! # Responsibilities
//! - Group backends by service
//! - Hand out per-decision candidate snapshots
//! - Accept metric refreshes from collectors (health monitor, external feeds)

use std::collections::HashMap;
use std::sync::Arc;

use crate::backends::backend::{Backend, BackendCandidate, MetricsUpdate};
use crate::config::BackendConfig;

/// Backends grouped by service, immutable apart from their metrics.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    services: HashMap<String, Vec<Arc<Backend>>>,
    by_identity: HashMap<String, Arc<Backend>>,
}

impl BackendRegistry {
    /// Create a registry from configuration.
    pub fn new(configs: &[BackendConfig]) -> Self {
        let mut registry = Self::default();

        for config in configs {
            match Backend::from_config(config) {
                Some(backend) => registry.insert(Arc::new(backend)),
                None => tracing::warn!(
                    backend = %config.name,
                    address = %config.address,
                    "Invalid backend address"
                ),
            }
        }

        registry
    }

    /// Rebuild from new configuration, carrying over learned metrics for
    /// backends whose identity and address are unchanged.
    pub fn reload(&self, configs: &[BackendConfig]) -> Self {
        let next = Self::new(configs);
        for backend in next.by_identity.values() {
            if let Some(previous) = self.by_identity.get(&backend.identity) {
                if previous.authority == backend.authority {
                    backend.set_metrics(previous.metrics());
                }
            }
        }
        next
    }

    fn insert(&mut self, backend: Arc<Backend>) {
        self.services
            .entry(backend.service.clone())
            .or_default()
            .push(backend.clone());
        self.by_identity.insert(backend.identity.clone(), backend);
    }

    /// Snapshot of the current candidates for a service, in config order.
    pub fn candidates(&self, service: &str) -> Vec<BackendCandidate> {
        self.services
            .get(service)
            .map(|backends| backends.iter().map(|b| b.candidate()).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, identity: &str) -> Option<&Arc<Backend>> {
        self.by_identity.get(identity)
    }

    /// Refresh one backend's routing figures. Returns false for unknown identities.
    pub fn update_metrics(&self, identity: &str, update: MetricsUpdate) -> bool {
        match self.by_identity.get(identity) {
            Some(backend) => {
                backend.update_metrics(update);
                true
            }
            None => false,
        }
    }

    /// Return a list of all backends (for health checking).
    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.services.values().flatten().cloned().collect()
    }

    /// Candidate snapshots for every service, keyed by service name.
    pub fn snapshot(&self) -> HashMap<String, Vec<BackendCandidate>> {
        self.services
            .keys()
            .map(|service| (service.clone(), self.candidates(service)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, service: &str, address: &str, latency_ms: f64) -> BackendConfig {
        BackendConfig {
            name: name.into(),
            service: service.into(),
            address: address.into(),
            cost: 1.0,
            latency_ms,
            health_score: 1.0,
        }
    }

    #[test]
    fn test_candidates_grouped_by_service_in_order() {
        let registry = BackendRegistry::new(&[
            config("u1", "users", "127.0.0.1:3001", 10.0),
            config("p1", "planning", "127.0.0.1:4001", 10.0),
            config("u2", "users", "127.0.0.1:3002", 20.0),
        ]);

        let users: Vec<String> = registry
            .candidates("users")
            .into_iter()
            .map(|c| c.identity)
            .collect();
        assert_eq!(users, vec!["u1", "u2"]);
        assert!(registry.candidates("unknown").is_empty());
        assert_eq!(registry.all_backends().len(), 3);
    }

    #[test]
    fn test_invalid_address_skipped() {
        let registry = BackendRegistry::new(&[config("bad", "users", "not-an-addr", 1.0)]);
        assert!(registry.candidates("users").is_empty());
    }

    #[test]
    fn test_update_metrics() {
        let registry = BackendRegistry::new(&[config("u1", "users", "127.0.0.1:3001", 10.0)]);
        assert!(registry.update_metrics(
            "u1",
            MetricsUpdate {
                latency_ms: Some(99.0),
                ..Default::default()
            }
        ));
        assert!(!registry.update_metrics("ghost", MetricsUpdate::default()));
        assert_eq!(registry.candidates("users")[0].latency_ms, 99.0);
    }

    #[test]
    fn test_reload_keeps_learned_metrics_for_same_address() {
        let registry = BackendRegistry::new(&[
            config("u1", "users", "127.0.0.1:3001", 10.0),
            config("u2", "users", "127.0.0.1:3002", 10.0),
        ]);
        registry.update_metrics(
            "u1",
            MetricsUpdate {
                health_score: Some(0.2),
                ..Default::default()
            },
        );
        registry.update_metrics(
            "u2",
            MetricsUpdate {
                health_score: Some(0.2),
                ..Default::default()
            },
        );

        let reloaded = registry.reload(&[
            config("u1", "users", "127.0.0.1:3001", 10.0),
            config("u2", "users", "127.0.0.1:3999", 10.0),
        ]);

        let candidates = reloaded.candidates("users");
        assert_eq!(candidates[0].health_score, 0.2);
        assert_eq!(candidates[1].health_score, 1.0);
    }
}
