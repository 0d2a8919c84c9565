// File Path: src/models/mod.rs

//! # Models
//!
//! Error taxonomy for the hub and its connections, plus the request/response
//! bodies of the HTTP surface.

// =========================================================================================
// SECTION 1: IMPORTS
// =========================================================================================

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =========================================================================================
// SECTION 2: API ERROR HANDLING
// =========================================================================================

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<HubError> for ApiError {
    fn from(inner: HubError) -> Self {
        ApiError::ServiceUnavailable(inner.to_string())
    }
}

// =========================================================================================
// SECTION 3: HUB AND CONNECTION ERRORS
// =========================================================================================

/// Returned by every `ConnectionManager` call once the coordination task has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("connection hub is no longer running")]
    Closed,
}

/// Outcome of a non-blocking push onto a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("outbound queue is full")]
    Full,

    #[error("outbound queue is closed")]
    Closed,
}

/// Transport failures that end a single connection. None of these ever
/// propagate past the pump that observed them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("read failed: {0}")]
    Read(String),

    #[error("no liveness ack within {0:?}")]
    ReadDeadline(Duration),

    #[error("write failed: {0}")]
    Write(String),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("keepalive probe failed: {0}")]
    Probe(String),
}

// =========================================================================================
// SECTION 4: CONNECTION LIFECYCLE
// =========================================================================================

/// Why a record left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The read pump finished and asked to be unregistered.
    Disconnected,
    /// The outbound queue was full at broadcast time.
    QueueFull,
    /// The outbound queue was already closed because the write pump is gone.
    WriterGone,
    /// No probe acknowledgment within the liveness timeout.
    LivenessTimeout,
    /// The probe request could not be handed to the write pump.
    ProbeFailed,
    /// A newer registration arrived under the same id.
    Displaced,
    /// The hub itself is stopping.
    Shutdown,
}

impl EvictionReason {
    /// Whether the write pump should stop immediately instead of flushing what
    /// is left in its queue.
    pub fn cancels_writer(self) -> bool {
        !matches!(self, EvictionReason::Disconnected)
    }
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EvictionReason::Disconnected => "disconnected",
            EvictionReason::QueueFull => "queue full",
            EvictionReason::WriterGone => "writer gone",
            EvictionReason::LivenessTimeout => "liveness timeout",
            EvictionReason::ProbeFailed => "probe failed",
            EvictionReason::Displaced => "displaced by duplicate id",
            EvictionReason::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The connection's cancellation token fired.
    Cancelled,
    /// The hub released the outbound queue; a close frame was sent.
    QueueReleased,
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    Failed(ConnectionError),
}

// =========================================================================================
// SECTION 5: HTTP MODELS
// =========================================================================================

/// Form body accepted by `POST /broadcast`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastForm {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub status: String,
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
    pub started_at: DateTime<Utc>,
}
