// src/services/inbound.rs

//! Consumer for application messages read from clients.

use tracing::info;

use crate::services::connection::Payload;

/// Receives every data frame a client sends. Called from the read pump, so
/// implementations must not block.
pub trait InboundHandler: Send + Sync + 'static {
    fn handle(&self, connection_id: &str, payload: Payload);
}

/// Logs inbound messages and otherwise discards them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogInbound;

impl InboundHandler for LogInbound {
    fn handle(&self, connection_id: &str, payload: Payload) {
        info!(
            "Client {} says: {}",
            connection_id,
            String::from_utf8_lossy(&payload)
        );
    }
}
