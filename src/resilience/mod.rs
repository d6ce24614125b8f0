//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → registry.rs (breaker for the selected backend identity)
//!     → circuit_breaker.rs allow() (fail fast when open)
//!     → timeouts.rs (enforce connect/request deadline)
//!     → circuit_breaker.rs record_success() / record_failure()
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No retries inside the gateway; callers own retry policy
//! - Circuit breaker prevents cascading failures
//! - Every attempted call reports exactly one outcome to its breaker

pub mod circuit_breaker;
pub mod registry;
pub mod timeouts;

pub use circuit_breaker::{BreakerPermit, BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use registry::BreakerRegistry;
pub use timeouts::{with_deadline, TimeoutPolicy};
