//! # panelcast
//!
//! Standalone panel server: REST snapshots, live WebSocket feed and
//! Prometheus metrics. Runs until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use panelcast_core::{InMemorySnapshotProvider, ServerSnapshot};
use panelcast_server::{PanelServer, ServerConfig};
use panelcast_telemetry::{init_telemetry, TelemetryConfig};
use tracing::{info, warn};

/// Game panel server.
#[derive(Parser, Debug)]
#[command(name = "panelcast", about = "Game panel REST/WebSocket server")]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to bind (overrides config and env).
    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_telemetry(&TelemetryConfig {
        json: cli.json_logs,
        ..TelemetryConfig::default()
    });

    let mut config = match ServerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "failed to load config, using defaults");
            let mut config = ServerConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Some(port) = cli.port {
        config.http_port = port;
    }

    let snapshots = Arc::new(InMemorySnapshotProvider::new(ServerSnapshot {
        name: "panelcast".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        online_players: 0,
        max_players: 0,
        uptime_secs: 0,
    }));
    let server = PanelServer::new(config, snapshots);

    let handle = server
        .start()
        .await
        .context("panel server could not bind its port")?;
    info!(port = handle.port(), "panelcast ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    info!("shutting down");
    if !server.shutdown_gracefully().await {
        warn!("some sessions did not finish draining");
    }
    Ok(())
}
