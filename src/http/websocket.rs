//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Negotiate the subprotocol with the client (first offered wins)
//! - Gate the session on the selected backend's circuit breaker
//! - Establish WebSocket connection to backend
//! - Bidirectional message forwarding
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket messages ────→ Gateway ←──── WebSocket messages ────→ Backend
//! ```
//!
//! # Close codes sent to the client
//! ```text
//! 1013 circuit open, upstream never contacted
//! 1011 upstream connect failed or timed out
//! 1001 upstream closed the session (reason carries the upstream code)
//! 1014 upstream broke the protocol mid-session
//! 1001 gateway shutting down
//! ```
//!
//! # Design Decisions
//! - WebSocket handled separately from HTTP request/response
//! - Message-level forwarding of text and binary, verbatim
//! - The two directions race; the first to finish cancels the other
//! - Ping/pong answered by each side's library, not relayed

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{self, close_code, CloseFrame, WebSocket, WebSocketUpgrade},
    http::{header, HeaderMap},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::{
    tungstenite::{
        self, client::IntoClientRequest, error::ProtocolError, protocol::frame::coding::CloseCode,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::Instrument;

use crate::backends::BackendCandidate;
use crate::error::GatewayError;
use crate::http::request::CorrelationContext;
use crate::http::response::strip_hop_by_hop;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::{with_deadline, BreakerRegistry, TimeoutPolicy};
use crate::routing::{self, RouteDescriptor};

type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code for an upstream that misbehaved mid-session (RFC 6455 registry).
pub const BAD_GATEWAY: u16 = 1014;

/// Time allowed for close handshakes once a session has ended.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Client handshake headers that must not reach the upstream handshake.
const HANDSHAKE_HEADERS: [header::HeaderName; 4] = [
    header::HOST,
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
];

/// How a bridged session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Breaker disallowed the backend; no upstream connection attempted.
    CircuitOpen,
    /// Upstream could not be reached (or handshake failed or timed out).
    ConnectFailed(String),
    /// Client closed or disconnected.
    ClientClosed,
    /// Upstream sent a close frame (its code, if any) or dropped the connection.
    UpstreamClosed(Option<u16>),
    /// Upstream sent something the relay could not accept.
    UpstreamError(String),
    /// The gateway is shutting down.
    Shutdown,
}

impl SessionEnd {
    /// Label for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            SessionEnd::CircuitOpen => "circuit_open",
            SessionEnd::ConnectFailed(_) => "connect_failed",
            SessionEnd::ClientClosed => "client_closed",
            SessionEnd::UpstreamClosed(_) => "upstream_closed",
            SessionEnd::UpstreamError(_) => "upstream_error",
            SessionEnd::Shutdown => "shutdown",
        }
    }

    /// Close frame the gateway sends to the client, if it still owes one.
    pub fn client_close(&self) -> Option<(u16, String)> {
        match self {
            SessionEnd::CircuitOpen => Some((
                close_code::AGAIN,
                "Upstream unavailable: circuit open".to_string(),
            )),
            SessionEnd::ConnectFailed(_) => {
                Some((close_code::ERROR, "Upstream connection failed".to_string()))
            }
            SessionEnd::ClientClosed => None,
            SessionEnd::UpstreamClosed(Some(code)) => {
                Some((close_code::AWAY, format!("Upstream closed ({})", code)))
            }
            SessionEnd::UpstreamClosed(None) => {
                Some((close_code::AWAY, "Upstream disconnected".to_string()))
            }
            SessionEnd::UpstreamError(_) => {
                Some((BAD_GATEWAY, "Upstream protocol error".to_string()))
            }
            SessionEnd::Shutdown => Some((close_code::AWAY, "Gateway shutting down".to_string())),
        }
    }

    /// Whether the session counts against the backend's breaker.
    fn is_backend_failure(&self) -> bool {
        matches!(self, SessionEnd::ConnectFailed(_) | SessionEnd::UpstreamError(_))
    }
}

/// Where and how to open the upstream half of a session.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub route: String,
    pub backend: BackendCandidate,
    /// Path and query on the backend.
    pub path: String,
    /// Client headers to replay on the upstream handshake.
    pub headers: HeaderMap,
}

impl UpstreamTarget {
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.backend.address, self.path)
    }
}

/// Subprotocols offered by the client, in preference order.
pub fn offered_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|protocol| !protocol.is_empty())
        .map(str::to_string)
        .collect()
}

/// Client headers worth replaying upstream: everything except hop-by-hop and
/// handshake-specific headers. The offered subprotocol list is kept.
pub fn upstream_handshake_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    strip_hop_by_hop(&mut forwarded);
    for name in HANDSHAKE_HEADERS {
        forwarded.remove(name);
    }
    forwarded
}

/// Relays WebSocket sessions between clients and backends.
#[derive(Clone)]
pub struct WebSocketBridge {
    breakers: Arc<BreakerRegistry>,
    timeouts: TimeoutPolicy,
    shutdown: Shutdown,
}

impl WebSocketBridge {
    pub fn new(
        breakers: Arc<BreakerRegistry>,
        timeouts: TimeoutPolicy,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            breakers,
            timeouts,
            shutdown,
        }
    }

    /// Select a backend and accept the client upgrade.
    ///
    /// Routing errors fail the handshake; everything after the upgrade is
    /// reported to the client with a close code.
    pub fn upgrade(
        &self,
        ws: WebSocketUpgrade,
        ctx: CorrelationContext,
        headers: &HeaderMap,
        path_and_query: &str,
        route: &RouteDescriptor,
        candidates: Vec<BackendCandidate>,
    ) -> Result<Response, GatewayError> {
        let backend = routing::select(candidates, route.strategy)?;

        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };
        let mut upstream_path = route.upstream_path(path);
        if let Some(query) = query {
            upstream_path = format!("{}?{}", upstream_path, query);
        }

        let mut upstream_headers = upstream_handshake_headers(headers);
        ctx.tag(&mut upstream_headers);

        let target = UpstreamTarget {
            route: route.name.clone(),
            backend,
            path: upstream_path,
            headers: upstream_headers,
        };

        let ws = match offered_protocols(headers).into_iter().next() {
            Some(first) => ws.protocols([first]),
            None => ws,
        };

        let bridge = self.clone();
        let span = tracing::info_span!("websocket", request_id = %ctx.id);

        Ok(ws
            .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
            .on_upgrade(move |socket| {
                async move {
                    bridge.bridge(socket, target, ctx).await;
                }
                .instrument(span)
            }))
    }

    /// Run one session to completion on an accepted client socket.
    pub async fn bridge(
        &self,
        mut client: WebSocket,
        target: UpstreamTarget,
        ctx: CorrelationContext,
    ) -> SessionEnd {
        let identity = target.backend.identity.clone();
        let breaker = self.breakers.get(&identity);

        tracing::info!(
            route = %target.route,
            backend = %identity,
            upstream = %target.url(),
            "WebSocket session started"
        );

        let end = match breaker.try_acquire() {
            None => {
                close_client(&mut client, &SessionEnd::CircuitOpen).await;
                SessionEnd::CircuitOpen
            }
            Some(permit) => {
                let end = self.session(client, &target, &identity).await;
                if end.is_backend_failure() {
                    permit.failure();
                } else {
                    permit.success();
                }
                end
            }
        };

        let close_code = end.client_close().map(|(code, _)| code);
        tracing::info!(
            route = %target.route,
            backend = %identity,
            outcome = end.outcome(),
            close_code = ?close_code,
            duration_ms = ctx.elapsed_ms(),
            "WebSocket session ended"
        );
        metrics::record_ws_session(&target.route, end.outcome());

        end
    }

    /// Connect upstream and relay until either side ends the session.
    async fn session(&self, mut client: WebSocket, target: &UpstreamTarget, identity: &str) -> SessionEnd {
        match self.connect(target).await {
            Ok(upstream) => {
                metrics::ws_session_opened();
                let end = relay(client, upstream, self.shutdown.subscribe()).await;
                metrics::ws_session_closed();
                end
            }
            Err(e) => {
                tracing::warn!(backend = %identity, error = %e, "Upstream WebSocket connect failed");
                let end = SessionEnd::ConnectFailed(e.to_string());
                close_client(&mut client, &end).await;
                end
            }
        }
    }

    async fn connect(&self, target: &UpstreamTarget) -> Result<Upstream, GatewayError> {
        let identity = target.backend.identity.as_str();

        let mut request = target
            .url()
            .into_client_request()
            .map_err(|e| connect_error(identity, e))?;
        for (name, value) in &target.headers {
            request.headers_mut().append(name.clone(), value.clone());
        }

        with_deadline(identity, self.timeouts.connect, async {
            tokio_tungstenite::connect_async(request)
                .await
                .map(|(stream, _response)| stream)
                .map_err(|e| connect_error(identity, e))
        })
        .await
    }
}

fn connect_error(backend: &str, error: tungstenite::Error) -> GatewayError {
    match error {
        tungstenite::Error::Http(response) => GatewayError::UpstreamProtocol {
            backend: backend.to_string(),
            reason: format!("handshake rejected with {}", response.status()),
        },
        tungstenite::Error::Protocol(e) => GatewayError::UpstreamProtocol {
            backend: backend.to_string(),
            reason: e.to_string(),
        },
        other => GatewayError::UpstreamConnect {
            backend: backend.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Client message to forward upstream; `None` for control frames.
pub fn to_upstream(message: ws::Message) -> Option<tungstenite::Message> {
    match message {
        ws::Message::Text(text) => Some(tungstenite::Message::Text(text.as_str().into())),
        ws::Message::Binary(data) => Some(tungstenite::Message::Binary(data)),
        _ => None,
    }
}

/// Upstream message to forward to the client; `None` for control frames.
pub fn to_client(message: tungstenite::Message) -> Option<ws::Message> {
    match message {
        tungstenite::Message::Text(text) => Some(ws::Message::Text(text.as_str().into())),
        tungstenite::Message::Binary(data) => Some(ws::Message::Binary(data)),
        _ => None,
    }
}

async fn close_client(client: &mut WebSocket, end: &SessionEnd) {
    if let Some((code, reason)) = end.client_close() {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = tokio::time::timeout(CLOSE_GRACE, client.send(ws::Message::Close(Some(frame)))).await;
    }
}

async fn relay(client: WebSocket, upstream: Upstream, shutdown: broadcast::Receiver<()>) -> SessionEnd {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(message) = client_rx.next().await {
            match message {
                Ok(ws::Message::Close(_)) | Err(_) => return SessionEnd::ClientClosed,
                Ok(message) => {
                    if let Some(message) = to_upstream(message) {
                        if let Err(e) = upstream_tx.send(message).await {
                            return upstream_failure(e);
                        }
                    }
                }
            }
        }
        SessionEnd::ClientClosed
    };

    let upstream_to_client = async {
        while let Some(message) = upstream_rx.next().await {
            match message {
                Ok(tungstenite::Message::Close(frame)) => {
                    return SessionEnd::UpstreamClosed(frame.map(|f| u16::from(f.code)));
                }
                Ok(message) => {
                    if let Some(message) = to_client(message) {
                        if client_tx.send(message).await.is_err() {
                            return SessionEnd::ClientClosed;
                        }
                    }
                }
                Err(e) => return upstream_failure(e),
            }
        }
        SessionEnd::UpstreamClosed(None)
    };

    let end = tokio::select! {
        end = client_to_upstream => end,
        end = upstream_to_client => end,
        _ = crate::lifecycle::shutdown::recv(shutdown) => SessionEnd::Shutdown,
    };

    // Both relay futures are dropped here; only the close handshakes remain.
    let upstream_frame = match &end {
        SessionEnd::ClientClosed => Some(tungstenite::protocol::CloseFrame {
            code: CloseCode::Normal,
            reason: "Client disconnected".into(),
        }),
        SessionEnd::Shutdown => Some(tungstenite::protocol::CloseFrame {
            code: CloseCode::Away,
            reason: "Gateway shutting down".into(),
        }),
        _ => None,
    };

    let closing_upstream = async {
        if let Some(frame) = upstream_frame {
            let _ = upstream_tx.send(tungstenite::Message::Close(Some(frame))).await;
        }
        let _ = upstream_tx.close().await;
    };
    let closing_client = async {
        if let Some((code, reason)) = end.client_close() {
            let frame = CloseFrame {
                code,
                reason: reason.into(),
            };
            let _ = client_tx.send(ws::Message::Close(Some(frame))).await;
        }
        let _ = client_tx.close().await;
    };

    let _ = tokio::time::timeout(CLOSE_GRACE, futures_util::future::join(closing_upstream, closing_client)).await;

    end
}

fn upstream_failure(error: tungstenite::Error) -> SessionEnd {
    match error {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Io(_)
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            SessionEnd::UpstreamClosed(None)
        }
        other => SessionEnd::UpstreamError(other.to_string()),
    }
}
