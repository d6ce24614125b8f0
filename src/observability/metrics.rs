//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, breakers, WebSocket sessions)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, backend
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_breaker_transitions_total` (counter): transitions by target state
//! - `gateway_ws_sessions_total` (counter): finished sessions by route, outcome
//! - `gateway_ws_active_sessions` (gauge): sessions currently bridged
//! - `gateway_backend_health` (gauge): latest health score per backend
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels for route, backend, status code
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

use crate::resilience::CircuitState;

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("gateway_request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install()?;

    describe();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

fn describe() {
    describe_counter!("gateway_requests_total", "Requests answered by the gateway");
    describe_histogram!(
        "gateway_request_duration_seconds",
        "Time from request arrival to response headers"
    );
    describe_gauge!(
        "gateway_breaker_state",
        "Circuit state per backend (0 closed, 1 half-open, 2 open)"
    );
    describe_counter!(
        "gateway_breaker_transitions_total",
        "Circuit state transitions per backend"
    );
    describe_counter!("gateway_ws_sessions_total", "Finished WebSocket sessions");
    describe_gauge!("gateway_ws_active_sessions", "WebSocket sessions currently bridged");
    describe_gauge!("gateway_backend_health", "Latest health score per backend");
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();

    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);

    histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "backend" => backend.to_string()
    )
    .record(elapsed);
}

fn state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}

pub fn record_breaker_state(backend: &str, state: CircuitState) {
    gauge!("gateway_breaker_state", "backend" => backend.to_string()).set(state_value(state));
}

pub fn record_breaker_transition(backend: &str, to: CircuitState) {
    counter!(
        "gateway_breaker_transitions_total",
        "backend" => backend.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
}

/// Count a finished WebSocket session. `outcome` is a short label such as
/// `completed`, `circuit_open` or `connect_failed`.
pub fn record_ws_session(route: &str, outcome: &'static str) {
    counter!(
        "gateway_ws_sessions_total",
        "route" => route.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn ws_session_opened() {
    gauge!("gateway_ws_active_sessions").increment(1.0);
}

pub fn ws_session_closed() {
    gauge!("gateway_ws_active_sessions").decrement(1.0);
}

pub fn record_backend_health(backend: &str, health_score: f64) {
    gauge!("gateway_backend_health", "backend" => backend.to_string()).set(health_score);
}
