//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate path pattern)
//!     → Return: RouteDescriptor or no match
//!
//! Per request, once a route is known:
//!     BackendRegistry candidates for route.service
//!     → strategy.rs (score every candidate, pick the best)
//!     → Return: winning BackendCandidate
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile patterns
//!     → Sort by priority, then specificity
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Deterministic: same input always matches same route
//! - Strategy evaluation is pure and needs no synchronization

pub mod matcher;
pub mod router;
pub mod strategy;

pub use router::{RouteDescriptor, RouteTable};
pub use strategy::{select, RoutingStrategy};
