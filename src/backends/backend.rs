//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend instance of a service
//! - Hold the latest cost/latency/health snapshot used for routing
//! - Produce per-decision candidates

use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::uri::Authority;
use serde::Serialize;
use url::Url;

use crate::config::BackendConfig;

/// Routing figures for one backend, replaced wholesale on every refresh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BackendMetrics {
    pub cost: f64,
    pub latency_ms: f64,
    pub health_score: f64,
}

/// Partial refresh of a backend's routing figures.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsUpdate {
    pub cost: Option<f64>,
    pub latency_ms: Option<f64>,
    pub health_score: Option<f64>,
}

/// One routable backend competing for a routing decision.
///
/// Candidates are snapshots: scoring writes only `score`, and nothing is
/// written back to the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendCandidate {
    pub identity: String,
    pub address: String,
    pub cost: f64,
    pub latency_ms: f64,
    pub health_score: f64,
    pub score: f64,
}

/// Parse a backend address: `host:port` with an explicit port and nothing else.
pub fn parse_address(address: &str) -> Result<Authority, String> {
    let authority = Authority::from_str(address)
        .map_err(|e| format!("'{}' is not host:port ({})", address, e))?;
    if authority.as_str().contains('@') {
        return Err(format!("'{}' must not carry credentials", address));
    }
    if authority.host().is_empty() {
        return Err(format!("'{}' has no host", address));
    }
    if authority.port_u16().is_none() {
        return Err(format!("'{}' has no port", address));
    }
    Ok(authority)
}

/// A single backend instance.
#[derive(Debug)]
pub struct Backend {
    /// Unique identity; also keys the circuit breaker.
    pub identity: String,
    /// Service this backend serves.
    pub service: String,
    /// `host:port`; the host may be an IP literal or a DNS name.
    pub authority: Authority,
    metrics: ArcSwap<BackendMetrics>,
}

impl Backend {
    pub fn new(
        identity: impl Into<String>,
        service: impl Into<String>,
        authority: Authority,
        metrics: BackendMetrics,
    ) -> Self {
        Self {
            identity: identity.into(),
            service: service.into(),
            authority,
            metrics: ArcSwap::from_pointee(metrics),
        }
    }

    /// Build from configuration, or `None` if the address does not parse.
    pub fn from_config(config: &BackendConfig) -> Option<Self> {
        let authority = parse_address(&config.address).ok()?;
        Some(Self::new(
            config.name.clone(),
            config.service.clone(),
            authority,
            BackendMetrics {
                cost: config.cost,
                latency_ms: config.latency_ms,
                health_score: config.health_score,
            },
        ))
    }

    /// URL for an HTTP probe of `path` on this backend.
    pub fn probe_url(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("http://{}", self.authority))?.join(path)
    }

    pub fn metrics(&self) -> BackendMetrics {
        **self.metrics.load()
    }

    pub fn set_metrics(&self, metrics: BackendMetrics) {
        self.metrics.store(Arc::new(metrics));
    }

    /// Apply a partial refresh. Concurrent refreshes never lose a field.
    pub fn update_metrics(&self, update: MetricsUpdate) {
        self.metrics.rcu(|current| {
            let mut next = **current;
            if let Some(cost) = update.cost {
                next.cost = cost;
            }
            if let Some(latency_ms) = update.latency_ms {
                next.latency_ms = latency_ms;
            }
            if let Some(health_score) = update.health_score {
                next.health_score = health_score.clamp(0.0, 1.0);
            }
            next
        });
    }

    pub fn candidate(&self) -> BackendCandidate {
        let metrics = self.metrics();
        BackendCandidate {
            identity: self.identity.clone(),
            address: self.authority.to_string(),
            cost: metrics.cost,
            latency_ms: metrics.latency_ms,
            health_score: metrics.health_score,
            score: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Backend {
        Backend::new(
            "users-a",
            "users",
            parse_address("127.0.0.1:3000").unwrap(),
            BackendMetrics {
                cost: 1.0,
                latency_ms: 20.0,
                health_score: 1.0,
            },
        )
    }

    #[test]
    fn test_candidate_reflects_latest_metrics() {
        let b = backend();
        b.update_metrics(MetricsUpdate {
            latency_ms: Some(75.0),
            health_score: Some(0.4),
            ..Default::default()
        });

        let c = b.candidate();
        assert_eq!(c.identity, "users-a");
        assert_eq!(c.address, "127.0.0.1:3000");
        assert_eq!(c.cost, 1.0);
        assert_eq!(c.latency_ms, 75.0);
        assert_eq!(c.health_score, 0.4);
    }

    #[test]
    fn test_health_update_is_clamped() {
        let b = backend();
        b.update_metrics(MetricsUpdate {
            health_score: Some(3.0),
            ..Default::default()
        });
        assert_eq!(b.metrics().health_score, 1.0);
    }

    #[test]
    fn test_address_accepts_hostnames() {
        let authority = parse_address("planning-agent:8000").unwrap();
        assert_eq!(authority.host(), "planning-agent");
        assert_eq!(authority.port_u16(), Some(8000));
        assert!(parse_address("[::1]:9000").is_ok());

        assert!(parse_address("planning-agent").is_err());
        assert!(parse_address("user:pw@planning-agent:8000").is_err());
        assert!(parse_address("http://planning-agent:8000").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_probe_url_with_hostname() {
        let b = Backend::new(
            "planning-a",
            "planning",
            parse_address("planning-agent:8000").unwrap(),
            BackendMetrics {
                cost: 1.0,
                latency_ms: 20.0,
                health_score: 1.0,
            },
        );
        assert_eq!(b.candidate().address, "planning-agent:8000");
        assert_eq!(
            b.probe_url("/health").unwrap().as_str(),
            "http://planning-agent:8000/health"
        );
    }

    #[test]
    fn test_probe_url() {
        let url = backend().probe_url("/health").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:3000/health");
    }
}
