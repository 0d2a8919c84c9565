// File Path: src/api/broadcast.rs
//! Broadcast API Handler
//! Accepts a form-encoded message and fans it out to every connected client.

use axum::{extract::State, Form, Json};
use tracing::info;

use crate::{
    api::state::AppState,
    models::{ApiError, ApiResult, BroadcastForm, BroadcastResponse},
    services::connection::Payload,
};

/// Submits `message` to the hub. Empty messages are rejected before they
/// reach it.
pub async fn submit_broadcast(
    State(state): State<AppState>,
    Form(form): Form<BroadcastForm>,
) -> ApiResult<Json<BroadcastResponse>> {
    if form.message.is_empty() {
        return Err(ApiError::BadRequest("Empty message".to_string()));
    }

    let report = state
        .connection_manager
        .broadcast(Payload::from(form.message))
        .await?;

    info!(
        "Broadcast submitted: delivered to {}, evicted {}",
        report.delivered,
        report.evicted.len()
    );

    Ok(Json(BroadcastResponse {
        status: "Message sent to all clients".to_string(),
        delivered: report.delivered,
        evicted: report.evicted.len(),
    }))
}
