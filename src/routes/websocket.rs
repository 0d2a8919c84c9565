// File Path: src/routes/websocket.rs

//! WebSocket endpoint. Each upgraded socket becomes one hub connection.

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::stream::StreamExt;
use tracing::{error, info, warn};

use crate::api::state::AppState;
use crate::services::pump::serve_connection;

/// Main entry point for the WebSocket upgrade.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|e: axum::Error| warn!("Connection upgrade failed: {}", e))
        .on_upgrade(|socket| handle_socket(socket, state))
}

/// Splits the socket between the two pumps and runs the connection to completion.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sender, ws_receiver) = socket.split();

    let result = serve_connection(
        ws_sender,
        ws_receiver,
        &state.connection_manager,
        state.inbound.clone(),
        state.config.queue_capacity,
        state.config.pump_timings(),
    )
    .await;

    match result {
        Ok(summary) => info!(
            "WebSocket handler finished for client {} (read: {:?}, write: {:?})",
            summary.id, summary.read_exit, summary.write_exit
        ),
        Err(e) => error!("Could not admit WebSocket connection: {}", e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(websocket_handler))
}
