// src/api/state.rs

//! # Application State
//!
//! Defines the shared state that will be accessible by all route handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::HubConfig;
use crate::services::connection_manager::ConnectionManager;
use crate::services::inbound::{InboundHandler, LogInbound};

/// The core application state. Cheap to clone; every field is a handle.
#[derive(Clone)]
pub struct AppState {
    // Handle to the hub that owns all live WebSocket connections.
    pub connection_manager: ConnectionManager,
    pub config: Arc<HubConfig>,
    // Consumer for messages clients send us.
    pub inbound: Arc<dyn InboundHandler>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Creates state whose inbound messages are only logged.
    pub fn new(connection_manager: ConnectionManager, config: Arc<HubConfig>) -> Self {
        Self::with_inbound(connection_manager, config, Arc::new(LogInbound))
    }

    pub fn with_inbound(
        connection_manager: ConnectionManager,
        config: Arc<HubConfig>,
        inbound: Arc<dyn InboundHandler>,
    ) -> Self {
        AppState {
            connection_manager,
            config,
            inbound,
            started_at: Utc::now(),
        }
    }
}
