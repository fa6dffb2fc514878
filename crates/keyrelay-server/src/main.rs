use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use keyrelay::RelayServer;
use tracing::info;

mod config;
mod telemetry;

use config::ServerConfig;

/// Keyrelay - relay server for end-to-end encrypted chat
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file (default: ./keyrelay.toml if present)
    #[arg(short, long, env = "KEYRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration before logging so the format can be chosen
    let server_config = ServerConfig::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load server configuration: {}", e))?
        .with_overrides(cli.host, cli.port);

    telemetry::init(server_config.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Keyrelay Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    server_config.log_config();

    let server = RelayServer::new(server_config.relay_config())?;
    server.run(shutdown_signal()).await?;

    telemetry::shutdown();

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
