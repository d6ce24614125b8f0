//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adaptive_gateway::config::{BackendConfig, GatewayConfig, Protocol, RouteConfig};
use adaptive_gateway::http::{AppState, HttpServer};
use adaptive_gateway::lifecycle::Shutdown;
use adaptive_gateway::routing::RoutingStrategy;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;

/// A running gateway on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, shutdown.clone());
    let state = server.state().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_, config_updates) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates).await;
    });

    TestGateway {
        addr,
        state,
        shutdown,
    }
}

pub fn backend(name: &str, service: &str, addr: SocketAddr, cost: f64, latency_ms: f64) -> BackendConfig {
    BackendConfig {
        name: name.into(),
        service: service.into(),
        address: addr.to_string(),
        cost,
        latency_ms,
        health_score: 1.0,
    }
}

pub fn route(name: &str, path: &str, service: &str, protocol: Protocol) -> RouteConfig {
    RouteConfig {
        name: name.into(),
        path: path.into(),
        service: service.into(),
        protocol,
        strategy: RoutingStrategy::Intelligent,
        strip_prefix: false,
        upstream_prefix: None,
        priority: 0,
    }
}

/// Gateway config with health probes off so backend figures stay as configured.
pub fn config(routes: Vec<RouteConfig>, backends: Vec<BackendConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.routes = routes;
    config.backends = backends;
    config.health_check.enabled = false;
    config.observability.metrics_enabled = false;
    config
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Start a programmable HTTP backend and return its address and call counter.
///
/// `f` receives the raw request head and returns status and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Arc<AtomicU32>)
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        counter.fetch_add(1, Ordering::SeqCst);

                        let (status, body) = f(head).await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, calls)
}

/// Start a backend that always answers 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> (SocketAddr, Arc<AtomicU32>) {
    start_programmable_backend(move |_| async move { (200, body.to_string()) }).await
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// What a mock WebSocket upstream observed.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    /// Handshake accepted; the offered subprotocol header and request id, if any.
    Connected {
        protocols: Option<String>,
        request_id: Option<String>,
    },
    /// The gateway side of the connection went away.
    Closed,
}

/// How the mock upstream behaves after the handshake.
#[derive(Debug, Clone, Copy)]
pub enum WsBehavior {
    /// Echo every text and binary message.
    Echo,
    /// Echo the first message, then close with this code.
    CloseAfterFirst(u16),
    /// Echo the first message, then drop the TCP connection without a close frame.
    DropAfterFirst,
    /// Echo the first message, then send a frame with reserved bits set.
    GarbageAfterFirst,
}

/// Start a WebSocket upstream. Accepts the first offered subprotocol, like
/// a well-behaved server would.
pub async fn start_ws_backend(
    behavior: WsBehavior,
) -> (SocketAddr, Arc<AtomicU32>, mpsc::UnboundedReceiver<WsEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicU32::new(0));
    let counter = accepted.clone();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let events = events_tx.clone();

            tokio::spawn(async move {
                let mut protocols = None;
                let mut request_id = None;
                let callback = |request: &Request, mut response: Response| {
                    let offered = request
                        .headers()
                        .get("sec-websocket-protocol")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    if let Some(first) = offered
                        .as_deref()
                        .and_then(|list| list.split(',').next())
                        .map(str::trim)
                    {
                        if let Ok(value) = HeaderValue::from_str(first) {
                            response.headers_mut().insert("sec-websocket-protocol", value);
                        }
                    }
                    protocols = offered;
                    request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    Ok::<_, ErrorResponse>(response)
                };

                let mut ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                let _ = events.send(WsEvent::Connected {
                    protocols,
                    request_id,
                });

                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        Message::Text(_) | Message::Binary(_) => {
                            if ws.send(message).await.is_err() {
                                break;
                            }
                            match behavior {
                                WsBehavior::Echo => {}
                                WsBehavior::CloseAfterFirst(code) => {
                                    let _ = ws
                                        .close(Some(CloseFrame {
                                            code: CloseCode::from(code),
                                            reason: "done".into(),
                                        }))
                                        .await;
                                    // Drain until the gateway acknowledges.
                                    while let Some(Ok(_)) = ws.next().await {}
                                    break;
                                }
                                WsBehavior::DropAfterFirst => break,
                                WsBehavior::GarbageAfterFirst => {
                                    // FIN + RSV1..3 + text opcode, empty payload.
                                    let _ = ws.get_mut().write_all(&[0xF1, 0x00]).await;
                                    let _ = ws.get_mut().flush().await;
                                    while let Some(Ok(_)) = ws.next().await {}
                                    break;
                                }
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                let _ = events.send(WsEvent::Closed);
            });
        }
    });

    (addr, accepted, events_rx)
}

/// Wait for the next event, failing the test after `limit`.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<WsEvent>, limit: Duration) -> WsEvent {
    tokio::time::timeout(limit, events.recv())
        .await
        .expect("timed out waiting for upstream event")
        .expect("upstream event channel closed")
}

/// Minimal WebSocket client over a raw socket, for close codes that
/// tungstenite rewrites on receipt (1014 arrives as 1002 there).
pub struct RawWsClient {
    stream: tokio::net::TcpStream,
}

impl RawWsClient {
    pub async fn connect(addr: SocketAddr, path: &str) -> Self {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            path, addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        // Read the response head one byte at a time so no frame bytes are consumed.
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            let mut byte = [0u8; 1];
            assert_eq!(stream.read(&mut byte).await.unwrap(), 1, "handshake cut short");
            head.push(byte[0]);
        }
        let head = String::from_utf8_lossy(&head);
        assert!(head.starts_with("HTTP/1.1 101"), "handshake failed: {}", head);

        Self { stream }
    }

    /// Send one masked text frame.
    pub async fn send_text(&mut self, text: &str) {
        let mask = [0x37u8, 0xfa, 0x21, 0x3d];
        let payload = text.as_bytes();
        assert!(payload.len() < 126);

        let mut frame = vec![0x81, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Read one unmasked server frame: opcode and payload.
    pub async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let mut header = [0u8; 2];
        self.stream.read_exact(&mut header).await.unwrap();
        let opcode = header[0] & 0x0f;
        let len = match header[1] & 0x7f {
            126 => {
                let mut ext = [0u8; 2];
                self.stream.read_exact(&mut ext).await.unwrap();
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                self.stream.read_exact(&mut ext).await.unwrap();
                u64::from_be_bytes(ext) as usize
            }
            n => n as usize,
        };
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.unwrap();
        (opcode, payload)
    }

    /// Read frames until a close frame and return its code and reason.
    pub async fn read_close(&mut self) -> (u16, String) {
        loop {
            let (opcode, payload) = self.read_frame().await;
            if opcode == 0x8 {
                assert!(payload.len() >= 2, "close frame without a code");
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                return (code, String::from_utf8_lossy(&payload[2..]).to_string());
            }
        }
    }
}
