//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap upstream calls with a deadline
//! - Cancel the wrapped operation cleanly on expiry (the future is dropped)
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Expiry is reported as `GatewayError::UpstreamTimeout`, distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::error::GatewayError;

/// Deadlines applied to upstream operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Upstream connection establishment (WebSocket handshake).
    pub connect: Duration,
    /// Time for an upstream to answer an HTTP request.
    pub request: Duration,
}

impl From<&TimeoutConfig> for TimeoutPolicy {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: config.connect(),
            request: config.request(),
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

/// Run `operation` against `backend`, failing with `UpstreamTimeout` after `limit`.
pub async fn with_deadline<T, F>(backend: &str, limit: Duration, operation: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::UpstreamTimeout {
            backend: backend.to_string(),
            after: limit,
        }),
    }
}
