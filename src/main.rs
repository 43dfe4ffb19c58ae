//! Chat Relay Server
//!
//! Real-time bidirectional message relay over WebSocket. Clients connect,
//! optionally pick a display name, and exchange JSON payloads addressed by
//! broadcast, direct, or room scope.

mod config;
mod relay;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::RelayConfig;
use server::{RelayServer, ServerConfig};

/// Chat Relay Server
///
/// WebSocket relay for broadcast, direct, and room-scoped messaging
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides config file and RELAY_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides config file)
    #[arg(long)]
    bind: Option<String>,

    /// Path to the configuration file
    #[arg(short, long, default_value = config::CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Chat Relay v{}", env!("CARGO_PKG_VERSION"));

    // Resolve configuration: file, then environment, then CLI flags
    let mut relay_config = RelayConfig::load(&args.config)?;
    relay_config.apply_env()?;
    relay_config.apply_overrides(args.bind, args.port);

    let config = ServerConfig::new(relay_config.server.bind, relay_config.server.port)
        .with_limits(relay_config.limits);

    // Create and start the relay server
    let server = Arc::new(RelayServer::new(config));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
