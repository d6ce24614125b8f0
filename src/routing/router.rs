//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the route descriptor for an inbound path
//! - Compute the path forwarded upstream
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Sorted by priority, then specificity; config order breaks remaining ties
//! - O(n) scan (acceptable for typical route counts)
//! - Explicit `None` rather than silent default

use crate::config::{Protocol, RouteConfig};
use crate::routing::matcher::PathPattern;
use crate::routing::strategy::RoutingStrategy;

/// Everything the gateway needs to know to route one request.
#[derive(Debug, Clone)]
pub struct RouteDescriptor {
    pub name: String,
    pub pattern: PathPattern,
    pub service: String,
    pub protocol: Protocol,
    pub strategy: RoutingStrategy,
    pub strip_prefix: bool,
    pub upstream_prefix: Option<String>,
    pub priority: u32,
}

impl RouteDescriptor {
    /// Path to request from the backend for an inbound `path`.
    pub fn upstream_path(&self, path: &str) -> String {
        if !self.strip_prefix && self.upstream_prefix.is_none() {
            return path.to_string();
        }
        let rest = self.pattern.remainder(path).unwrap_or("");
        let prefix = self
            .upstream_prefix
            .as_deref()
            .unwrap_or("")
            .trim_end_matches('/');

        let joined = format!("{}{}", prefix, rest);
        if joined.is_empty() {
            "/".to_string()
        } else {
            joined
        }
    }
}

/// Compiled, immutable route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<RouteDescriptor>,
}

impl RouteTable {
    /// Compile routes from configuration. Invalid patterns are skipped with a warning.
    pub fn from_config(configs: &[RouteConfig]) -> Self {
        let mut routes: Vec<RouteDescriptor> = configs
            .iter()
            .filter_map(|config| match PathPattern::parse(&config.path) {
                Ok(pattern) => Some(RouteDescriptor {
                    name: config.name.clone(),
                    pattern,
                    service: config.service.clone(),
                    protocol: config.protocol,
                    strategy: config.strategy,
                    strip_prefix: config.strip_prefix,
                    upstream_prefix: config.upstream_prefix.clone(),
                    priority: config.priority,
                }),
                Err(reason) => {
                    tracing::warn!(route = %config.name, reason = %reason, "Skipping route");
                    None
                }
            })
            .collect();

        // Stable sort keeps config order for equal keys.
        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.pattern.specificity().cmp(&a.pattern.specificity()))
        });

        tracing::debug!(routes = routes.len(), "Route table compiled");
        Self { routes }
    }

    /// First route matching `path`.
    pub fn lookup(&self, path: &str) -> Option<&RouteDescriptor> {
        self.routes.iter().find(|route| route.pattern.matches(path))
    }

    pub fn routes(&self) -> &[RouteDescriptor] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
