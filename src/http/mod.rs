//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, route lookup)
//!     → request.rs (correlation id, request span)
//!     → forward.rs (HTTP routes: select, breaker, forward)
//!       websocket.rs (WebSocket routes: select, breaker, bridge)
//!     → response.rs (strip hop-by-hop headers, stream back)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::HttpForwarder;
pub use request::{CorrelationContext, CorrelationExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
pub use websocket::{SessionEnd, WebSocketBridge};
