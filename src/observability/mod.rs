//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Correlation middleware, forwarder, bridge, breakers, health monitor
//!     → logging.rs (key=value events inside a `request` span carrying request_id)
//!     → metrics.rs (request counters and latency histogram, breaker state
//!       gauges, WebSocket session counts, probed backend health)
//!
//! Consumers:
//!     → stdout, plain or JSON lines
//!     → Prometheus scrape on observability.metrics_address
//! ```
//!
//! # Design Decisions
//! - Metric calls are no-ops until a recorder is installed, so tests and
//!   `--check` runs need no exporter
//! - Breaker transitions are reported from inside the breaker, never by callers

pub mod logging;
pub mod metrics;
