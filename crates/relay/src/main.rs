//! Relay Server
//!
//! WebSocket chat relay: every message a client sends is broadcast to all
//! connected clients.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use figment::providers::Serialized;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use relay::config::{PayloadMode, RelayConfig};
use relay::server::{AppState, create_router};

/// WebSocket Chat Relay
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "WebSocket chat relay", long_about = None)]
struct Args {
    /// Path to the TOML config file. Without it, `relay.toml` is read if present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host address
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Payload mode
    #[arg(long, value_enum)]
    mode: Option<PayloadMode>,
}

/// CLI flags that override the file and environment
#[derive(Serialize)]
struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<PayloadMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relay=info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let args = Args::parse();

    let overrides = Overrides {
        host: args.host,
        port: args.port,
        mode: args.mode,
    };
    let figment =
        RelayConfig::figment(args.config.as_deref()).merge(Serialized::defaults(overrides));
    let config = RelayConfig::from_figment(&figment)?;

    info!("Starting relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        mode = ?config.mode,
        malformed_policy = ?config.malformed_policy,
        echo_to_sender = config.echo_to_sender,
        "Relay configured"
    );

    let addr = config.bind_addr()?;
    let ws_path = config.ws_path.clone();

    // Create application state and router
    let state = AppState::new(config);
    let app = create_router(state);

    // Start server
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, ws_path);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
