// src/services/connection_manager.rs

//! # Connection Manager Service
//!
//! The hub. A single coordination task owns the registry of live connections
//! and applies registration, unregistration, broadcast and liveness sweeps one
//! command at a time, in arrival order. Callers talk to it through the
//! cloneable [`ConnectionManager`] handle.
//!
//! Nothing inside the coordination task touches a transport: a broadcast is a
//! `try_send` onto each outbound queue and a probe is a `try_send` onto each
//! probe channel, so one slow client can never stall the loop.
//!
//! A broadcast only reaches the connections registered when its command is
//! processed. A client whose registration is still in flight may or may not
//! see it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{EvictionReason, HubError, QueueError};
use crate::services::connection::{ClientConnection, Payload};

/// Connection id paired with the reason it was removed.
pub type Eviction = (String, EvictionReason);

/// Result of fanning one payload out to the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<Eviction>,
}

/// Result of one liveness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: Vec<Eviction>,
}

enum Command {
    Register(ClientConnection),
    Unregister(String),
    Broadcast {
        payload: Payload,
        reply: oneshot::Sender<BroadcastReport>,
    },
    Sweep {
        timeout: Duration,
        reply: oneshot::Sender<SweepReport>,
    },
    Count(oneshot::Sender<usize>),
    Ids(oneshot::Sender<Vec<String>>),
}

// ====================================================
// SECTION: Handle
// ====================================================

/// Handle to the hub's coordination task.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
}

impl ConnectionManager {
    /// Starts the coordination task.
    ///
    /// # Arguments
    /// * `command_capacity` - How many commands may queue up before callers wait.
    /// * `shutdown` - Cancelling this stops the task and evicts every connection.
    pub fn spawn(command_capacity: usize, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(command_capacity.max(1));
        let task = tokio::spawn(run(Registry::default(), rx, shutdown));
        (Self { commands }, task)
    }

    /// Admits a connection. Broadcasts processed afterwards reach it.
    pub async fn register(&self, connection: ClientConnection) -> Result<(), HubError> {
        self.send(Command::Register(connection)).await
    }

    /// Removes a connection if present and releases its outbound queue.
    /// Unregistering an unknown id is a no-op.
    pub async fn unregister(&self, id: &str) -> Result<(), HubError> {
        self.send(Command::Unregister(id.to_string())).await
    }

    /// Pushes `payload` onto every registered queue, evicting any connection
    /// whose queue is full.
    pub async fn broadcast(&self, payload: Payload) -> Result<BroadcastReport, HubError> {
        self.request(|reply| Command::Broadcast { payload, reply })
            .await
    }

    /// Evicts connections silent for longer than `timeout` and asks the rest to probe.
    pub async fn sweep(&self, timeout: Duration) -> Result<SweepReport, HubError> {
        self.request(|reply| Command::Sweep { timeout, reply }).await
    }

    pub async fn connection_count(&self) -> Result<usize, HubError> {
        self.request(Command::Count).await
    }

    pub async fn connection_ids(&self) -> Result<Vec<String>, HubError> {
        self.request(Command::Ids).await
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply)).await?;
        response.await.map_err(|_| HubError::Closed)
    }
}

async fn run(
    mut registry: Registry,
    mut commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
) {
    info!("Connection hub started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => registry.apply(command),
                None => break,
            },
        }
    }
    registry.evict_all(EvictionReason::Shutdown);
    info!("Connection hub stopped");
}

// ====================================================
// SECTION: Registry
// ====================================================

/// Connection id to record. Only ever touched by the coordination task.
#[derive(Debug, Default)]
struct Registry {
    connections: HashMap<String, ClientConnection>,
}

impl Registry {
    fn apply(&mut self, command: Command) {
        match command {
            Command::Register(connection) => self.register(connection),
            Command::Unregister(id) => {
                self.remove(&id, EvictionReason::Disconnected);
            }
            Command::Broadcast { payload, reply } => {
                let _ = reply.send(self.broadcast(&payload));
            }
            Command::Sweep { timeout, reply } => {
                let _ = reply.send(self.sweep(timeout));
            }
            Command::Count(reply) => {
                let _ = reply.send(self.connections.len());
            }
            Command::Ids(reply) => {
                let _ = reply.send(self.connections.keys().cloned().collect());
            }
        }
    }

    fn register(&mut self, connection: ClientConnection) {
        let id = connection.id.clone();
        if let Some(displaced) = self.connections.insert(id.clone(), connection) {
            error!(
                "Duplicate connection id {} on register; tearing down the previous record",
                id
            );
            teardown(displaced, EvictionReason::Displaced);
        }
        info!("New client: {} (total: {})", id, self.connections.len());
    }

    /// Removes and tears down `id`. Returns `false` when it was already gone.
    fn remove(&mut self, id: &str, reason: EvictionReason) -> bool {
        match self.connections.remove(id) {
            Some(connection) => {
                let lifetime = Utc::now().signed_duration_since(connection.connected_at);
                teardown(connection, reason);
                info!(
                    "Client left: {} ({}, connected {}s) (total: {})",
                    id,
                    reason,
                    lifetime.num_seconds(),
                    self.connections.len()
                );
                true
            }
            None => {
                debug!("Client {} already removed ({})", id, reason);
                false
            }
        }
    }

    fn broadcast(&mut self, payload: &Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (id, connection) in &self.connections {
            match connection.enqueue(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(QueueError::Full) => {
                    warn!("Client {} cannot keep up, evicting", id);
                    report.evicted.push((id.clone(), EvictionReason::QueueFull));
                }
                Err(QueueError::Closed) => {
                    debug!("Client {} writer already gone, evicting", id);
                    report.evicted.push((id.clone(), EvictionReason::WriterGone));
                }
            }
        }
        self.remove_all(&report.evicted);

        if !report.evicted.is_empty() {
            info!(
                "Broadcast evicted {} client(s) (total: {})",
                report.evicted.len(),
                self.connections.len()
            );
        }
        debug!("Broadcast delivered to {} client(s)", report.delivered);
        report
    }

    fn sweep(&mut self, timeout: Duration) -> SweepReport {
        let mut report = SweepReport::default();

        for (id, connection) in &self.connections {
            let silent_for = connection.since_last_ack();
            if silent_for > timeout {
                warn!("Client {} timed out after {:?}", id, silent_for);
                report.evicted.push((id.clone(), EvictionReason::LivenessTimeout));
                continue;
            }
            match connection.request_probe() {
                Ok(()) => report.probed += 1,
                Err(e) => {
                    warn!("Ping failed for {}: {}", id, e);
                    report.evicted.push((id.clone(), EvictionReason::ProbeFailed));
                }
            }
        }
        self.remove_all(&report.evicted);

        report
    }

    fn remove_all(&mut self, evictions: &[Eviction]) {
        for (id, reason) in evictions {
            self.remove(id, *reason);
        }
    }

    fn evict_all(&mut self, reason: EvictionReason) {
        let count = self.connections.len();
        for (_, connection) in self.connections.drain() {
            teardown(connection, reason);
        }
        if count > 0 {
            info!("Evicted {} client(s) ({})", count, reason);
        }
    }
}

/// Drops the record, which releases its outbound queue. Reasons other than a
/// plain disconnect also cancel the pumps so they stop without draining.
fn teardown(connection: ClientConnection, reason: EvictionReason) {
    if reason.cancels_writer() {
        connection.cancel();
    }
}
