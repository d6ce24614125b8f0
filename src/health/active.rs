//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends
//! - Feed measured latency and a smoothed health score into the backend registry

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::Request;
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::backends::{Backend, MetricsUpdate};
use crate::config::HealthCheckConfig;
use crate::http::server::GatewayState;
use crate::observability::metrics;

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub healthy: bool,
    pub latency_ms: f64,
}

/// Move `previous` toward 1.0 (healthy) or 0.0 by `smoothing`.
pub fn smoothed_health(previous: f64, healthy: bool, smoothing: f64) -> f64 {
    let sample = if healthy { 1.0 } else { 0.0 };
    ((1.0 - smoothing) * previous + smoothing * sample).clamp(0.0, 1.0)
}

/// Registry update for a probe. Latency is only refreshed by successful probes.
pub fn probe_update(previous_health: f64, probe: ProbeResult, smoothing: f64) -> MetricsUpdate {
    MetricsUpdate {
        cost: None,
        latency_ms: probe.healthy.then_some(probe.latency_ms),
        health_score: Some(smoothed_health(previous_health, probe.healthy, smoothing)),
    }
}

pub struct HealthMonitor {
    state: Arc<ArcSwap<GatewayState>>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(state: Arc<ArcSwap<GatewayState>>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            state,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn check_all(&self) {
        // Backends of the configuration current at tick time.
        let backends = self.state.load().backends.all_backends();
        join_all(backends.iter().map(|backend| self.check(backend))).await;
    }

    async fn check(&self, backend: &Arc<Backend>) {
        let probe = self.probe(backend).await;
        let previous = backend.metrics().health_score;
        backend.update_metrics(probe_update(previous, probe, self.config.smoothing));

        let health = backend.metrics().health_score;
        tracing::debug!(
            backend = %backend.identity,
            healthy = probe.healthy,
            latency_ms = probe.latency_ms,
            health_score = health,
            "Health probe"
        );
        metrics::record_backend_health(&backend.identity, health);
    }

    async fn probe(&self, backend: &Backend) -> ProbeResult {
        let started = Instant::now();
        let failed = |started: Instant| ProbeResult {
            healthy: false,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        };

        let uri = match backend.probe_url(&self.config.path) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::error!(backend = %backend.identity, error = %e, "Invalid health check URL");
                return failed(started);
            }
        };

        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "adaptive-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Failed to build health check request: {}", e);
                return failed(started);
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let healthy = match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(backend = %backend.identity, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %backend.identity, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(backend = %backend.identity, "Health check failed: timeout");
                false
            }
        };

        ProbeResult {
            healthy,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}
