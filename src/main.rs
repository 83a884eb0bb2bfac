//! Multiplexed stream session server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                     MUX SERVER                        │
//!                 │                                                       │
//!   TCP client    │  ┌──────────┐    ┌──────────────────────────────┐    │
//!   ──────────────┼─▶│   net    │───▶│ session (one per connection) │    │
//!                 │  │ listener │    │                              │    │
//!                 │  └──────────┘    │  reader ─▶ registry ─▶ stream │    │
//!                 │                  │     │                   │     │    │
//!                 │                  │     ▼                   ▼     │    │
//!   ◀─────────────┼──────────────────┼── writer ◀──── handler replies│    │
//!                 │                  └──────────────────────────────┘    │
//!                 │                                                       │
//!                 │  config · frame codec · buffer pool · lifecycle ·     │
//!                 │  observability                                        │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use mux_server::config::{load_config, ServerConfig};
use mux_server::lifecycle::signals::spawn_signal_handler;
use mux_server::lifecycle::Shutdown;
use mux_server::net::Listener;
use mux_server::observability::{logging, metrics};
use mux_server::server::MuxServer;
use mux_server::session::DiscardHandler;

#[derive(Parser)]
#[command(name = "mux-server")]
#[command(about = "Multiplexed stream session server", long_about = None)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init(&config.observability);
    tracing::info!("mux-server v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_concurrent_streams = config.session.max_concurrent_streams,
        shutdown_grace_ms = config.session.shutdown_grace_ms,
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

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let server = MuxServer::new(config, Arc::new(DiscardHandler));
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
