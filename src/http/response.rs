//! Header handling across the proxy boundary.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from forwarded requests and relayed responses
//! - Convert backend responses into client responses without buffering
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically, including any named in `Connection`
//! - `Host` is dropped; the client sets it from the backend URI

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName},
    response::Response,
};
use hyper::body::Incoming;

/// Connection-scoped headers (RFC 9110 §7.6.1) plus legacy proxy variants.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including those listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Prepare inbound headers for forwarding to a backend.
pub fn upstream_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    headers.remove(header::HOST);
}

/// Relay a backend response to the client, streaming the body.
pub fn client_response(upstream: hyper::Response<Incoming>) -> Response {
    let (mut parts, body) = upstream.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
