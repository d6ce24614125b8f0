//! HTTP forwarding to the selected backend.
//!
//! # Responsibilities
//! - Pick a backend for the route via the routing strategy engine
//! - Gate the call on that backend's circuit breaker
//! - Rewrite the request (URI, hop-by-hop headers, correlation id)
//! - Enforce the request deadline and report exactly one outcome to the breaker
//!
//! # Outcome accounting
//! ```text
//! response, status < 500   → record_success (4xx means the backend is up)
//! response, status >= 500  → record_failure
//! connect error            → record_failure, 502
//! protocol error           → record_failure, 502
//! deadline expired         → record_failure, 504 (outbound call dropped)
//! breaker disallows        → no call, no outcome, 503
//! caller cancelled         → record_failure (permit dropped)
//! ```

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        uri::{Authority, PathAndQuery, Scheme},
        Request, Uri, Version,
    },
    response::Response,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::backends::BackendCandidate;
use crate::error::GatewayError;
use crate::http::request::CorrelationContext;
use crate::http::response::{client_response, upstream_headers};
use crate::observability::metrics;
use crate::resilience::{with_deadline, BreakerRegistry, TimeoutPolicy};
use crate::routing::{self, RouteDescriptor};

/// Forwards single request/response cycles to backends.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpConnector, Body>,
    breakers: Arc<BreakerRegistry>,
    timeouts: TimeoutPolicy,
}

impl HttpForwarder {
    pub fn new(breakers: Arc<BreakerRegistry>, timeouts: TimeoutPolicy) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeouts.connect));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            breakers,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> TimeoutPolicy {
        self.timeouts
    }

    /// Forward `request` to the best of `candidates` for `route`.
    ///
    /// The deadline covers the wait for response headers; the body is
    /// streamed to the client afterwards.
    pub async fn forward(
        &self,
        ctx: &CorrelationContext,
        request: Request<Body>,
        route: &RouteDescriptor,
        candidates: Vec<BackendCandidate>,
    ) -> Result<Response, GatewayError> {
        let method = request.method().to_string();
        let path = request.uri().path().to_string();

        let backend = match routing::select(candidates, route.strategy) {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    route = %route.name,
                    service = %route.service,
                    reason = e.reason(),
                    "No backend to forward to"
                );
                metrics::record_request(&method, e.status().as_u16(), "none", ctx.started_at);
                return Err(e);
            }
        };

        let result = self.call(ctx, request, route, &backend).await;

        match &result {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::info!(
                    method = %method,
                    path = %path,
                    route = %route.name,
                    backend = %backend.identity,
                    status,
                    duration_ms = ctx.elapsed_ms(),
                    "Upstream responded"
                );
                metrics::record_request(&method, status, &backend.identity, ctx.started_at);
            }
            Err(e) => {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    route = %route.name,
                    backend = %backend.identity,
                    status = e.status().as_u16(),
                    reason = e.reason(),
                    error = %e,
                    duration_ms = ctx.elapsed_ms(),
                    "Forwarding failed"
                );
                metrics::record_request(&method, e.status().as_u16(), &backend.identity, ctx.started_at);
            }
        }

        result
    }

    async fn call(
        &self,
        ctx: &CorrelationContext,
        request: Request<Body>,
        route: &RouteDescriptor,
        backend: &BackendCandidate,
    ) -> Result<Response, GatewayError> {
        let outbound = build_upstream_request(ctx, request, route, backend)?;

        // Held across the await; if this future is dropped the permit
        // reports the attempt as failed.
        let permit = match self.breakers.get(&backend.identity).try_acquire() {
            Some(permit) => permit,
            None => {
                return Err(GatewayError::CircuitOpen {
                    backend: backend.identity.clone(),
                })
            }
        };

        tracing::debug!(
            backend = %backend.identity,
            uri = %outbound.uri(),
            score = backend.score,
            "Forwarding request"
        );

        let identity = backend.identity.as_str();
        let sent = with_deadline(identity, self.timeouts.request, async {
            self.client
                .request(outbound)
                .await
                .map_err(|e| classify(identity, e))
        })
        .await;

        match sent {
            Ok(response) => {
                if response.status().is_server_error() {
                    permit.failure();
                } else {
                    permit.success();
                }
                Ok(client_response(response))
            }
            Err(e) => {
                permit.failure();
                Err(e)
            }
        }
    }
}

fn classify(backend: &str, error: hyper_util::client::legacy::Error) -> GatewayError {
    if error.is_connect() {
        GatewayError::UpstreamConnect {
            backend: backend.to_string(),
            reason: error.to_string(),
        }
    } else {
        GatewayError::UpstreamProtocol {
            backend: backend.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Rewrite an inbound request so it targets `backend`.
pub fn build_upstream_request(
    ctx: &CorrelationContext,
    request: Request<Body>,
    route: &RouteDescriptor,
    backend: &BackendCandidate,
) -> Result<Request<Body>, GatewayError> {
    let (mut parts, body) = request.into_parts();

    let path = route.upstream_path(parts.uri.path());
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    let invalid = |reason: String| GatewayError::UpstreamProtocol {
        backend: backend.identity.clone(),
        reason,
    };

    let mut uri_parts = axum::http::uri::Parts::default();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority =
        Some(Authority::from_str(&backend.address).map_err(|e| invalid(e.to_string()))?);
    uri_parts.path_and_query =
        Some(PathAndQuery::from_str(&path_and_query).map_err(|e| invalid(e.to_string()))?);
    parts.uri = Uri::from_parts(uri_parts).map_err(|e| invalid(e.to_string()))?;
    // Backends are spoken to over HTTP/1.1 whatever the client negotiated.
    parts.version = Version::HTTP_11;

    upstream_headers(&mut parts.headers);
    ctx.tag(&mut parts.headers);

    Ok(Request::from_parts(parts, body))
}
