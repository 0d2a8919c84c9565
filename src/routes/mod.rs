// src/routes/mod.rs

//! # Routes Module
//!
//! Defines the main routing structure for the Axum server.

use axum::Router;

use crate::api::state::AppState;

pub mod broadcast;
pub mod health;
pub mod websocket;

/// Creates and configures the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // WebSocket sessions at '/ws'
        .merge(websocket::routes())
        // Administrative fan-out trigger
        .merge(broadcast::routes())
        .merge(health::routes())
        .with_state(state)
}
