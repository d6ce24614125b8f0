//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each backend
//!     → Measured latency + smoothed health score
//!     → BackendRegistry::update_metrics
//!     → read by the routing strategy engine on the next decision
//! ```
//!
//! # Design Decisions
//! - Health feeds routing scores; it never opens or closes breakers
//! - Breakers react to real traffic only
//! - Health is a moving average so one bad probe does not flip routing

pub mod active;
