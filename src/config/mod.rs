//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → compiled into RouteTable + BackendRegistry
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the compiled route table and backend registry
//!     → breaker state is kept (keyed by backend identity)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BackendConfig, CircuitBreakerConfig, GatewayConfig, HealthCheckConfig,
    ListenerConfig, ObservabilityConfig, Protocol, RouteConfig, TimeoutConfig,
};
pub use watcher::ConfigWatcher;
