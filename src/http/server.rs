//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, body limits, correlation id)
//! - Dispatch requests to the route table
//! - Hand HTTP routes to the forwarder and WebSocket routes to the bridge
//! - Swap compiled routes and backends on config reload
//! - Health monitoring (active)

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    extract::{ws::WebSocketUpgrade, FromRequestParts, Request, State},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::backends::{BackendCandidate, BackendRegistry};
use crate::config::{GatewayConfig, Protocol};
use crate::error::GatewayError;
use crate::health::active::HealthMonitor;
use crate::http::forward::HttpForwarder;
use crate::http::request::{correlate, CorrelationContext, CorrelationExt};
use crate::http::websocket::WebSocketBridge;
use crate::lifecycle::{shutdown, Shutdown};
use crate::observability::metrics;
use crate::resilience::{BreakerRegistry, BreakerSettings, CircuitState, TimeoutPolicy};
use crate::routing::{RouteDescriptor, RouteTable};

/// Everything derived from one configuration, swapped as a unit on reload.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub routes: RouteTable,
    pub backends: BackendRegistry,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        let routes = RouteTable::from_config(&config.routes);
        let backends = BackendRegistry::new(&config.backends);
        Self {
            config,
            routes,
            backends,
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<GatewayState>>,
    pub breakers: Arc<BreakerRegistry>,
    pub forwarder: HttpForwarder,
    pub bridge: WebSocketBridge,
    pub shutdown: Shutdown,
}

impl AppState {
    pub fn new(config: GatewayConfig, shutdown: Shutdown) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(BreakerSettings::from(
            &config.circuit_breaker,
        )));
        let timeouts = TimeoutPolicy::from(&config.timeouts);

        Self {
            forwarder: HttpForwarder::new(breakers.clone(), timeouts),
            bridge: WebSocketBridge::new(breakers.clone(), timeouts, shutdown.clone()),
            inner: Arc::new(ArcSwap::from_pointee(GatewayState::new(config))),
            breakers,
            shutdown,
        }
    }

    /// Install a new configuration.
    ///
    /// Routes and backends are rebuilt; learned backend metrics and breaker
    /// state carry over for identities that still exist. Timeouts and
    /// breaker thresholds keep their startup values.
    pub fn reload(&self, config: GatewayConfig) {
        let current = self.inner.load();
        let backends = current.backends.reload(&config.backends);

        for snapshot in self.breakers.snapshots() {
            if backends.get(&snapshot.backend).is_none() {
                self.breakers.evict(&snapshot.backend);
            }
        }

        let next = GatewayState {
            routes: RouteTable::from_config(&config.routes),
            backends,
            config,
        };

        tracing::info!(
            routes = next.routes.len(),
            backends = next.config.backends.len(),
            "Configuration reloaded"
        );
        self.inner.store(Arc::new(next));
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig, shutdown: Shutdown) -> Self {
        let max_body_bytes = config.listener.max_body_bytes;
        let state = AppState::new(config, shutdown);
        let router = Self::build_router(max_body_bytes, state.clone());
        Self { router, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(max_body_bytes: usize, state: AppState) -> Router {
        Router::new()
            .route("/gateway/health", get(gateway_health))
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(max_body_bytes))
            .layer(middleware::from_fn(correlate))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until the shutdown broadcast, applying config updates
    /// as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let health_config = self.state.inner.load().config.health_check.clone();
        if health_config.enabled {
            let monitor = HealthMonitor::new(self.state.inner.clone(), health_config);
            tokio::spawn(monitor.run(self.state.shutdown.subscribe()));
        }

        tokio::spawn(apply_config_updates(
            self.state.clone(),
            config_updates,
            self.state.shutdown.subscribe(),
        ));

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::recv(self.state.shutdown.subscribe()))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn apply_config_updates(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => state.reload(config),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

/// Looks up the route, then forwards or bridges.
async fn gateway_handler(State(state): State<AppState>, request: Request) -> Response {
    let ctx = request.correlation().copied().unwrap_or_default();
    let path = request.uri().path().to_string();

    let current = state.inner.load_full();
    let route = match current.routes.lookup(&path) {
        Some(route) => route,
        None => {
            let method = request.method().to_string();
            tracing::warn!(method = %method, path = %path, "No route matched");
            metrics::record_request(&method, 404, "none", ctx.started_at);
            return GatewayError::NoRoute(path).into_response();
        }
    };
    let candidates = current.backends.candidates(&route.service);

    match route.protocol {
        Protocol::Http => state
            .forwarder
            .forward(&ctx, request, route, candidates)
            .await
            .unwrap_or_else(IntoResponse::into_response),
        Protocol::Websocket => upgrade(&state, ctx, request, route, candidates).await,
    }
}

async fn upgrade(
    state: &AppState,
    ctx: CorrelationContext,
    request: Request,
    route: &RouteDescriptor,
    candidates: Vec<BackendCandidate>,
) -> Response {
    let (mut parts, _body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, state).await {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(route = %route.name, "Non-WebSocket request on WebSocket route");
            return rejection.into_response();
        }
    };

    match state
        .bridge
        .upgrade(ws, ctx, &parts.headers, &path_and_query, route, candidates)
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(route = %route.name, reason = e.reason(), error = %e, "WebSocket routing failed");
            metrics::record_ws_session(&route.name, e.reason());
            e.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GatewayHealth {
    pub status: &'static str,
    pub breakers: BTreeMap<String, CircuitState>,
}

/// Gateway health: "degraded" while any breaker is not closed.
pub fn health_report(breakers: &BreakerRegistry) -> GatewayHealth {
    let breakers: BTreeMap<String, CircuitState> = breakers
        .snapshots()
        .into_iter()
        .map(|snapshot| (snapshot.backend, snapshot.state))
        .collect();

    let degraded = breakers.values().any(|state| *state != CircuitState::Closed);

    GatewayHealth {
        status: if degraded { "degraded" } else { "ok" },
        breakers,
    }
}

async fn gateway_health(State(state): State<AppState>) -> Json<GatewayHealth> {
    Json(health_report(&state.breakers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_degrades_with_open_breaker() {
        let registry = BreakerRegistry::default();
        registry.get("a").record_success();
        assert_eq!(health_report(&registry).status, "ok");

        let b = registry.get("b");
        for _ in 0..registry.settings().failure_threshold {
            b.record_failure();
        }

        let report = health_report(&registry);
        assert_eq!(report.status, "degraded");
        assert_eq!(report.breakers["a"], CircuitState::Closed);
        assert_eq!(report.breakers["b"], CircuitState::Open);
    }

    #[test]
    fn test_reload_keeps_breakers_of_surviving_backends() {
        let config = crate::config::parse_config(
            r#"
            [[routes]]
            name = "users"
            path = "/users/*"
            service = "users"

            [[backends]]
            name = "users-a"
            service = "users"
            address = "127.0.0.1:3001"

            [[backends]]
            name = "users-b"
            service = "users"
            address = "127.0.0.1:3002"
            "#,
        )
        .unwrap();

        let state = AppState::new(config.clone(), Shutdown::new());
        state.breakers.get("users-a").record_failure();
        state.breakers.get("users-b");

        let mut next = config;
        next.backends.retain(|b| b.name == "users-a");
        state.reload(next);

        assert_eq!(state.breakers.len(), 1);
        assert_eq!(state.breakers.snapshot("users-a").unwrap().failure_count, 1);
        assert_eq!(state.inner.load().backends.candidates("users").len(), 1);
    }
}
