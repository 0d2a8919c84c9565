// File Path: src/routes/broadcast.rs

//! Broadcast Routes
//!
//! Only POST is routed; axum answers every other method with 405.

use axum::{routing::post, Router};

use crate::api::{broadcast, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/broadcast", post(broadcast::submit_broadcast))
}
