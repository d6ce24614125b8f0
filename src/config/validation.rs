//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference services with backends)
//! - Validate value ranges (timeouts > 0, scores in range)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::backends::backend::parse_address;
use crate::config::schema::GatewayConfig;
use crate::routing::matcher::PathPattern;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Dotted location of the offending field, e.g. `backends[2].cost`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let mut backend_names = HashSet::new();
    let mut services = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        let at = |field: &str| format!("backends[{}].{}", i, field);

        if !backend_names.insert(backend.name.as_str()) {
            errors.push(ValidationError::new(
                at("name"),
                format!("duplicate backend '{}'", backend.name),
            ));
        }
        services.insert(backend.service.as_str());

        if let Err(reason) = parse_address(&backend.address) {
            errors.push(ValidationError::new(at("address"), reason));
        }
        if !backend.cost.is_finite() || backend.cost < 0.0 {
            errors.push(ValidationError::new(at("cost"), "must be a finite number >= 0"));
        }
        if !backend.latency_ms.is_finite() || backend.latency_ms < 0.0 {
            errors.push(ValidationError::new(at("latency_ms"), "must be a finite number >= 0"));
        }
        if !(0.0..=1.0).contains(&backend.health_score) {
            errors.push(ValidationError::new(at("health_score"), "must be within [0, 1]"));
        }
    }

    let mut route_names = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let at = |field: &str| format!("routes[{}].{}", i, field);

        if !route_names.insert(route.name.as_str()) {
            errors.push(ValidationError::new(
                at("name"),
                format!("duplicate route '{}'", route.name),
            ));
        }
        if let Err(reason) = PathPattern::parse(&route.path) {
            errors.push(ValidationError::new(at("path"), reason));
        }
        if let Some(prefix) = &route.upstream_prefix {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::new(at("upstream_prefix"), "must start with '/'"));
            }
        }
        if !services.contains(route.service.as_str()) {
            errors.push(ValidationError::new(
                at("service"),
                format!("service '{}' has no backends", route.service),
            ));
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if breaker.half_open_trial_budget == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_trial_budget",
            "must be > 0",
        ));
    }
    if breaker.failure_window_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_window_secs", "must be > 0"));
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be > 0"));
        }
        if health.timeout_secs == 0 {
            errors.push(ValidationError::new("health_check.timeout_secs", "must be > 0"));
        }
        if !(health.smoothing > 0.0 && health.smoothing <= 1.0) {
            errors.push(ValidationError::new("health_check.smoothing", "must be within (0, 1]"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
