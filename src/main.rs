// src/main.rs

//! # Main Application Entry Point
//!
//! Sets up logging, loads configuration, starts the hub and serves
//! WebSocket and HTTP traffic until Ctrl-C.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broadcast_hub::api::state::AppState;
use broadcast_hub::config::HubConfig;
use broadcast_hub::server::{serve, Hub};

/// The main entry point for the Tokio runtime.
#[tokio::main]
async fn main() {
    // 1. Setup Logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broadcast_hub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting broadcast hub...");

    // 2. Load Configuration
    let config = match HubConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // 3. Bind the listener; failing here is the only fatal runtime error
    let listener = match TcpListener::bind(config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind TCP listener to {}: {}", config.bind_addr, e);
            std::process::exit(1);
        }
    };

    // 4. Start the hub and its liveness monitor
    let shutdown = CancellationToken::new();
    let hub = Hub::start(&config, &shutdown);
    let state = AppState::new(hub.connection_manager.clone(), Arc::new(config));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        info!("Shutdown requested");
        signal_token.cancel();
    });

    // 5. Run the Server
    if let Err(e) = serve(listener, state, shutdown.clone()).await {
        error!("Server error: {}", e);
    }

    shutdown.cancel();
    hub.join().await;
    info!("Broadcast hub stopped");
}
