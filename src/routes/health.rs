// File Path: src/routes/health.rs
//! Health Check Routes
//!
//! Reports whether the hub is running and how many clients it holds.

use axum::{extract::State, routing::get, Json, Router};

use crate::api::state::AppState;
use crate::models::{ApiResult, HealthResponse};

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let connections = state.connection_manager.connection_count().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        connections,
        started_at: state.started_at,
    }))
}

/// Creates health-related routes and merges them into the main router.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
