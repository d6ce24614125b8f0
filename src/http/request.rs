//! Request correlation.
//!
//! # Responsibilities
//! - Generate a unique correlation id (UUID v4) per request or connection
//! - Attach it to request extensions, the forwarded request and the response
//! - Emit request_started / request_completed log lines inside a request span
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - A client-supplied `x-request-id` is replaced, never trusted
//! - The context is owned by the handling task; no synchronization needed

use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the correlation id to backends and back to clients.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Correlation data for one inbound request or WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationContext {
    pub id: Uuid,
    pub started_at: Instant,
}

impl CorrelationContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Set `x-request-id` on `headers`, replacing any existing value.
    pub fn tag(&self, headers: &mut HeaderMap) {
        let mut buf = Uuid::encode_buffer();
        let id = self.id.hyphenated().encode_lower(&mut buf);
        if let Ok(value) = HeaderValue::from_str(id) {
            headers.insert(X_REQUEST_ID, value);
        }
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Access the correlation context of a request.
pub trait CorrelationExt {
    fn correlation(&self) -> Option<&CorrelationContext>;
}

impl<B> CorrelationExt for axum::http::Request<B> {
    fn correlation(&self) -> Option<&CorrelationContext> {
        self.extensions().get::<CorrelationContext>()
    }
}

/// Middleware tagging every request with a fresh [`CorrelationContext`].
pub async fn correlate(mut request: Request, next: Next) -> Response {
    let ctx = CorrelationContext::new();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    request.extensions_mut().insert(ctx);
    ctx.tag(request.headers_mut());

    let span = tracing::info_span!("request", request_id = %ctx.id);

    async move {
        tracing::info!(method = %method, path = %path, "request_started");

        let mut response = next.run(request).await;
        ctx.tag(response.headers_mut());

        tracing::info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            duration_ms = ctx.elapsed_ms(),
            "request_completed"
        );
        response
    }
    .instrument(span)
    .await
}
