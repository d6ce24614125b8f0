//! Gateway error taxonomy and its client-facing mappings.

use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Response header naming why the gateway failed a request.
pub const X_GATEWAY_ERROR: &str = "x-gateway-error";

/// Errors raised while routing or forwarding a request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No route matches the inbound path.
    #[error("No route matches '{0}'")]
    NoRoute(String),

    /// The candidate set for a routing decision was empty.
    #[error("No backend candidates available")]
    NoCandidates,

    /// The selected backend's circuit is open; no call was attempted.
    #[error("Circuit open for backend '{backend}'")]
    CircuitOpen { backend: String },

    /// The backend could not be reached.
    #[error("Failed to connect to backend '{backend}': {reason}")]
    UpstreamConnect { backend: String, reason: String },

    /// The backend did not answer within the deadline.
    #[error("Backend '{backend}' timed out after {after:?}")]
    UpstreamTimeout { backend: String, after: Duration },

    /// The backend answered with something malformed.
    #[error("Protocol error from backend '{backend}': {reason}")]
    UpstreamProtocol { backend: String, reason: String },
}

impl GatewayError {
    /// Stable machine-readable reason, sent in [`X_GATEWAY_ERROR`].
    pub fn reason(&self) -> &'static str {
        match self {
            GatewayError::NoRoute(_) => "no_route",
            GatewayError::NoCandidates => "no_candidates",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::UpstreamConnect { .. } => "upstream_connect",
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::UpstreamProtocol { .. } => "upstream_protocol",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute(_) => StatusCode::NOT_FOUND,
            GatewayError::NoCandidates | GatewayError::CircuitOpen { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::UpstreamConnect { .. } | GatewayError::UpstreamProtocol { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether this error reflects a misbehaving backend.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::CircuitOpen { .. }
                | GatewayError::UpstreamConnect { .. }
                | GatewayError::UpstreamTimeout { .. }
                | GatewayError::UpstreamProtocol { .. }
        )
    }

    /// The gateway declined to try; the backend was never contacted.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            GatewayError::NoCandidates | GatewayError::CircuitOpen { .. }
        )
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = self.reason();
        let mut response = (status, self.to_string()).into_response();
        response
            .headers_mut()
            .insert(X_GATEWAY_ERROR, HeaderValue::from_static(reason));
        response
    }
}
