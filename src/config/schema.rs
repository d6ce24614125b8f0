//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::routing::strategy::RoutingStrategy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Route definitions mapping public paths to services.
    pub routes: Vec<RouteConfig>,

    /// Backend instances competing to serve each service.
    pub backends: Vec<BackendConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-backend circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Active health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Wire protocol spoken on a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Websocket,
}

/// Route configuration mapping a public path pattern to a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Public path pattern: `/exact` or `/prefix/*`.
    pub path: String,

    /// Service whose backends compete for this route.
    pub service: String,

    #[serde(default)]
    pub protocol: Protocol,

    /// Scoring strategy. Unknown names fall back to the un-normalized blend.
    #[serde(default)]
    pub strategy: RoutingStrategy,

    /// Remove the matched pattern prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Replace the matched pattern prefix with this path before forwarding,
    /// e.g. `/admin/*` → `/api/v1/admin`. Implies `strip_prefix`.
    #[serde(default)]
    pub upstream_prefix: Option<String>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// Backend instance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identity. Also the circuit breaker key.
    pub name: String,

    /// Service this backend serves.
    pub service: String,

    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Relative cost of sending a request here.
    #[serde(default)]
    pub cost: f64,

    /// Initial latency estimate in milliseconds.
    #[serde(default)]
    pub latency_ms: f64,

    /// Initial health score in `[0, 1]`.
    #[serde(default = "default_health_score")]
    pub health_score: f64,
}

fn default_health_score() -> f64 {
    1.0
}

/// Timeout configuration for upstream operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for an upstream to produce a response, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// Circuit breaker thresholds, shared by every backend's breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting trial calls.
    pub recovery_timeout_secs: u64,

    /// Trial calls admitted while half-open; all must succeed to close.
    pub half_open_trial_budget: u32,

    /// Failures further apart than this no longer accumulate.
    pub failure_window_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            half_open_trial_budget: 2,
            failure_window_secs: 60,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe.
    pub path: String,

    /// Weight of the newest probe in the health score moving average.
    pub smoothing: f64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            smoothing: 0.3,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin listener.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin listener bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
