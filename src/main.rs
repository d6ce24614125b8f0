//! Adaptive gateway.
//!
//! Routes HTTP and WebSocket traffic to the best-scoring backend of each
//! service, guarded by per-backend circuit breakers.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────────────┐
//!                          │                  ADAPTIVE GATEWAY                    │
//!                          │                                                      │
//!   Client Request         │  ┌───────────┐   ┌──────────┐   ┌────────────────┐   │
//!   ───────────────────────┼─▶│correlation│──▶│  route   │──▶│   strategy     │   │
//!                          │  │  tagger   │   │  table   │   │   engine       │   │
//!                          │  └───────────┘   └──────────┘   └───────┬────────┘   │
//!                          │                                         │            │
//!                          │                                         ▼            │
//!                          │                                 ┌────────────────┐   │
//!                          │                                 │circuit breaker │   │
//!                          │                                 │   registry     │   │
//!                          │                                 └───────┬────────┘   │
//!                          │                                         │            │
//!                          │                       ┌─────────────────┴───────┐    │
//!                          │                       ▼                         ▼    │
//!   Client Response        │              ┌────────────────┐      ┌─────────────┐ │
//!   ◀──────────────────────┼──────────────│ HTTP forwarder │      │  WebSocket  │◀┼──▶ Backend
//!                          │              └────────────────┘      │   bridge    │ │
//!                          │                                      └─────────────┘ │
//!                          │  ┌────────────────────────────────────────────────┐  │
//!                          │  │ config + reload │ health monitor │ admin API  │  │
//!                          │  │ logging/metrics │ lifecycle (signals)         │  │
//!                          │  └────────────────────────────────────────────────┘  │
//!                          └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use adaptive_gateway::admin::setup_admin_router;
use adaptive_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use adaptive_gateway::http::HttpServer;
use adaptive_gateway::lifecycle::{shutdown, wait_for_shutdown, Shutdown};
use adaptive_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Adaptive HTTP/WebSocket gateway", version)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    if args.check {
        println!(
            "Configuration OK: {} routes, {} backends",
            config.routes.len(),
            config.backends.len()
        );
        return Ok(());
    }

    logging::init(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "adaptive-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        backends = config.backends.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Hot reload; the watcher must outlive the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let admin = config.admin.clone();
    let server = HttpServer::new(config, shutdown.clone());

    if admin.enabled {
        if admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
            tracing::warn!("Admin API is using the placeholder key");
        }
        let admin_listener = TcpListener::bind(&admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");

        let router = setup_admin_router(server.state().clone());
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, router)
                .with_graceful_shutdown(shutdown::recv(admin_shutdown))
                .await
            {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        signal_shutdown.trigger();
    });

    server.run(listener, config_updates).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
