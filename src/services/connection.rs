// src/services/connection.rs

//! # Connection Record
//!
//! One record per accepted session. The hub keeps the [`ClientConnection`]
//! half (queue sender, probe sender, cancel token); the pumps keep the
//! [`PumpChannels`] half. Dropping the record from the registry drops the only
//! queue sender, which is how the write pump learns it has been released.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::QueueError;

/// Outbound payload. Cheap to clone, so one broadcast is shared by every queue.
pub type Payload = Bytes;

/// Timestamp of the most recent probe acknowledgment.
///
/// Written by the read pump when a Pong arrives, read by the hub during
/// liveness sweeps and by the read pump to compute its deadline.
#[derive(Debug)]
pub struct LivenessClock {
    last_ack: Mutex<Instant>,
}

impl LivenessClock {
    pub fn new() -> Self {
        Self {
            last_ack: Mutex::new(Instant::now()),
        }
    }

    pub fn mark_alive(&self) {
        *self.last_ack.lock() = Instant::now();
    }

    pub fn last_ack(&self) -> Instant {
        *self.last_ack.lock()
    }

    pub fn elapsed(&self) -> Duration {
        self.last_ack.lock().elapsed()
    }
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}

/// The registry's view of a live session.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: String,
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Payload>,
    probes: mpsc::Sender<()>,
    cancel: CancellationToken,
    liveness: Arc<LivenessClock>,
}

/// Everything the pump pair owns for one connection.
#[derive(Debug)]
pub struct PumpChannels {
    pub outbound: mpsc::Receiver<Payload>,
    pub probes: mpsc::Receiver<()>,
    pub cancel: CancellationToken,
    pub liveness: Arc<LivenessClock>,
}

impl ClientConnection {
    /// Creates a record with a fresh v4 id and an outbound queue of `queue_capacity` slots.
    pub fn new(queue_capacity: usize) -> (Self, PumpChannels) {
        Self::with_id(Uuid::new_v4().to_string(), queue_capacity)
    }

    pub fn with_id(id: String, queue_capacity: usize) -> (Self, PumpChannels) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        // One slot: a probe request that is still pending absorbs any duplicate.
        let (probe_tx, probe_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let liveness = Arc::new(LivenessClock::new());

        let connection = Self {
            id,
            connected_at: Utc::now(),
            outbound: outbound_tx,
            probes: probe_tx,
            cancel: cancel.clone(),
            liveness: Arc::clone(&liveness),
        };
        let channels = PumpChannels {
            outbound: outbound_rx,
            probes: probe_rx,
            cancel,
            liveness,
        };
        (connection, channels)
    }

    /// Greeting enqueued ahead of any broadcast traffic.
    pub fn welcome(&self) -> Payload {
        Payload::from(format!("Welcome! Your ID is: {}", self.id))
    }

    /// Non-blocking push onto the outbound queue.
    pub fn enqueue(&self, payload: Payload) -> Result<(), QueueError> {
        self.outbound.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Asks the write pump to send a probe. A request that is already pending
    /// counts as success; only a vanished write pump is an error.
    pub fn request_probe(&self) -> Result<(), QueueError> {
        match self.probes.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Closed(())) => Err(QueueError::Closed),
        }
    }

    /// Fires the cancellation signal. Safe to call any number of times,
    /// including after the pumps have exited.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn since_last_ack(&self) -> Duration {
        self.liveness.elapsed()
    }
}
