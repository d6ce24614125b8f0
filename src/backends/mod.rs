//! Backend candidate supply.
//!
//! # Data Flow
//! ```text
//! Route matched → service identified
//!     → registry.rs (backends of that service)
//!     → backend.rs (latest metrics snapshot → BackendCandidate)
//!     → routing::strategy (score and select)
//!
//! Collectors (health monitor, external feeds):
//!     → registry.update_metrics(identity, …)
//!     → backend.rs (atomic swap of the metrics snapshot)
//! ```
//!
//! # Design Decisions
//! - Registry shape is fixed per config; only metrics change at runtime
//! - Metrics are swapped atomically, readers never block writers
//! - Candidates are copies; scoring never mutates shared state

pub mod backend;
pub mod registry;

pub use backend::{Backend, BackendCandidate, BackendMetrics, MetricsUpdate};
pub use registry::BackendRegistry;
