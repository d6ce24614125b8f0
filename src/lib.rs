//! Adaptive gateway library.
//!
//! Per-request backend selection by cost, latency and health, per-backend
//! circuit breakers, and HTTP/WebSocket forwarding.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod routing;

// Traffic management
pub mod backends;
pub mod health;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
