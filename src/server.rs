// src/server.rs

//! # Server Runtime
//!
//! Starts the hub's background tasks and serves the router until shutdown.

use std::io;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::state::AppState;
use crate::config::HubConfig;
use crate::routes::create_router;
use crate::services::connection_manager::ConnectionManager;
use crate::services::liveness::{run_liveness_monitor, MonitorExit};

/// The hub's coordination task plus its liveness monitor.
pub struct Hub {
    pub connection_manager: ConnectionManager,
    hub_task: JoinHandle<()>,
    monitor_task: JoinHandle<MonitorExit>,
}

impl Hub {
    /// Spawns both tasks. Cancelling `shutdown` stops them and evicts every connection.
    pub fn start(config: &HubConfig, shutdown: &CancellationToken) -> Self {
        let (connection_manager, hub_task) =
            ConnectionManager::spawn(config.command_capacity, shutdown.child_token());

        let monitor_task = tokio::spawn(run_liveness_monitor(
            connection_manager.clone(),
            config.monitor_period,
            config.pong_wait,
            shutdown.child_token(),
        ));

        Hub {
            connection_manager,
            hub_task,
            monitor_task,
        }
    }

    /// Waits for both tasks to finish. Only returns once their shutdown token fired.
    pub async fn join(self) {
        if let Err(e) = self.monitor_task.await {
            warn!("Liveness monitor ended abnormally: {}", e);
        }
        if let Err(e) = self.hub_task.await {
            warn!("Connection hub ended abnormally: {}", e);
        }
    }
}

/// Serves HTTP and WebSocket traffic on `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> io::Result<()> {
    let app = create_router(state);

    if let Ok(addr) = listener.local_addr() {
        info!("WebSocket server running on ws://{}/ws", addr);
        info!("Broadcast endpoint: http://{}/broadcast", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
