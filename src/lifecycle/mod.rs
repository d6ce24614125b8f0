//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! main.rs:
//!     Parse args → Load config → Logging + metrics → Bind listeners → Serve
//!
//! signals.rs:
//!     Ctrl+C / SIGTERM → Shutdown::trigger
//!
//! shutdown.rs:
//!     Broadcast → gateway listener drains in-flight requests
//!               → admin listener stops
//!               → health monitor and config updater exit
//!               → bridged WebSocket sessions close with 1001
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown;
