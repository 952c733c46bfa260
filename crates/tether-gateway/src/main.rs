//! # tether-gateway
//!
//! Gateway binary: loads settings, starts the WebSocket server with relay
//! routing, and shuts it down on SIGINT / SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tether_logging::{LogConfig, init_logging};
use tether_server::{GatewayServer, ServerConfig, install_relay};
use tether_settings::{TetherSettings, load_settings_from_path, settings_path};
use tether_shutdown::{
    ShutdownCoordinator, ShutdownOptions, ShutdownPhase, register_shutdown_handlers,
};
use tracing::info;

/// Identity-aware WebSocket gateway.
#[derive(Parser, Debug)]
#[command(name = "tether-gateway", about = "Identity-aware WebSocket gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.tether/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Settings file, then `TETHER_*` env vars, then these flags.
    fn load_settings(&self) -> Result<TetherSettings> {
        let path = self.settings.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut TetherSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    init_logging(&LogConfig::from(&settings.logging)).context("Failed to initialise logging")?;

    let server = Arc::new(GatewayServer::new(ServerConfig::from(&settings.server)));
    let relayed = install_relay(&server, &settings.server.relay_types);
    let addr = server
        .listen()
        .await
        .with_context(|| format!("Failed to bind {}", server.config().bind_addr()))?;
    info!(
        %addr,
        identity = server.identity(),
        relay_handlers = relayed.len(),
        "tether gateway ready"
    );

    let options = ShutdownOptions::from(&settings.shutdown).on_shutdown(|| info!("shutting down"));
    let coordinator = Arc::new(ShutdownCoordinator::new(options));
    coordinator.add_server(server);
    let _signals = register_shutdown_handlers(Arc::clone(&coordinator));

    let phase = coordinator.wait_for_completion().await;
    info!(%phase, "tether gateway stopped");
    if phase == ShutdownPhase::Forced {
        anyhow::bail!("shutdown was forced");
    }
    Ok(())
}
