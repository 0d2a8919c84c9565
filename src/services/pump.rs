// src/services/pump.rs

//! # Read/Write Pumps
//!
//! Each connection runs two tasks. The read pump pulls frames off the
//! transport, hands data to the [`InboundHandler`] and records probe
//! acknowledgments. The write pump drains the outbound queue, sends keepalive
//! probes and is the only place the transport gets closed.
//!
//! Both pumps are generic over `Stream`/`Sink` of WebSocket messages so they can
//! run on a split `WebSocket` or on in-memory channels.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{ConnectionError, HubError, PumpExit};
use crate::services::connection::{ClientConnection, LivenessClock, Payload, PumpChannels};
use crate::services::connection_manager::ConnectionManager;
use crate::services::inbound::InboundHandler;

/// Upper bound on payloads folded into a single outbound frame.
const MAX_COALESCE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpTimings {
    /// Read deadline measured from the last probe acknowledgment.
    pub pong_wait: Duration,
    /// Keepalive probe interval.
    pub ping_period: Duration,
    /// Deadline for each transport write.
    pub write_wait: Duration,
}

/// How a connection ended, one exit per pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub id: String,
    pub read_exit: PumpExit,
    pub write_exit: PumpExit,
}

// ====================================================
// SECTION: Connection Wiring
// ====================================================

/// Runs one accepted session to completion.
///
/// Creates the record, registers with the hub, then runs the write pump as its
/// own task and the read pump on the current one. The welcome message is handed
/// to the write pump, which sends it as a frame of its own before touching the
/// outbound queue, so broadcasts admitted in between cannot precede or join it.
pub async fn serve_connection<S, R, E>(
    sink: S,
    stream: R,
    manager: &ConnectionManager,
    inbound: Arc<dyn InboundHandler>,
    queue_capacity: usize,
    timings: PumpTimings,
) -> Result<ConnectionSummary, HubError>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (connection, channels) = ClientConnection::new(queue_capacity);
    let id = connection.id.clone();
    let PumpChannels {
        outbound,
        probes,
        cancel,
        liveness,
    } = channels;

    let welcome = connection.welcome();
    manager.register(connection).await?;

    let writer = tokio::spawn(write_pump(
        id.clone(),
        sink,
        Some(welcome),
        outbound,
        probes,
        cancel.clone(),
        timings,
    ));

    let read_exit = read_pump(
        &id,
        stream,
        manager,
        inbound.as_ref(),
        cancel.clone(),
        &liveness,
        timings.pong_wait,
    )
    .await;

    let write_exit = match writer.await {
        Ok(exit) => exit,
        Err(e) => {
            warn!("Write pump for {} did not finish cleanly: {}", id, e);
            cancel.cancel();
            PumpExit::Cancelled
        }
    };

    info!("Connection {} finished", id);
    Ok(ConnectionSummary {
        id,
        read_exit,
        write_exit,
    })
}

// ====================================================
// SECTION: Read Pump
// ====================================================

/// Reads until the peer goes away, the read deadline passes, or the connection
/// is cancelled, then asks the hub to unregister `id` exactly once.
pub async fn read_pump<R, E>(
    id: &str,
    mut stream: R,
    manager: &ConnectionManager,
    inbound: &dyn InboundHandler,
    cancel: CancellationToken,
    liveness: &LivenessClock,
    pong_wait: Duration,
) -> PumpExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let exit = loop {
        let deadline = liveness.last_ack() + pong_wait;

        tokio::select! {
            _ = cancel.cancelled() => break PumpExit::Cancelled,
            next = time::timeout_at(deadline, stream.next()) => match next {
                Err(_) => break PumpExit::Failed(ConnectionError::ReadDeadline(pong_wait)),
                Ok(None) => break PumpExit::PeerClosed,
                Ok(Some(Err(e))) => break PumpExit::Failed(ConnectionError::Read(e.to_string())),
                Ok(Some(Ok(message))) => match message {
                    Message::Text(text) => inbound.handle(id, Payload::from(text)),
                    Message::Binary(data) => inbound.handle(id, Payload::from(data)),
                    Message::Pong(_) => liveness.mark_alive(),
                    // Answered by the transport itself.
                    Message::Ping(_) => {}
                    Message::Close(frame) => {
                        debug!("Client {} sent close frame: {:?}", id, frame);
                        break PumpExit::PeerClosed;
                    }
                },
            },
        }
    };

    match &exit {
        PumpExit::Failed(e) => warn!("Read error from {}: {}", id, e),
        other => debug!("Read pump for {} stopped: {:?}", id, other),
    }

    if manager.unregister(id).await.is_err() {
        // No hub left to release the queue, so stop the writer directly.
        cancel.cancel();
    }
    exit
}

// ====================================================
// SECTION: Write Pump
// ====================================================

/// Delivers queued payloads and keepalive probes until the queue is released,
/// a write fails, or the connection is cancelled. Closes `sink` exactly once.
///
/// `welcome`, if any, goes out alone as the first frame.
pub async fn write_pump<S>(
    id: String,
    mut sink: S,
    welcome: Option<Payload>,
    mut outbound: mpsc::Receiver<Payload>,
    mut probes: mpsc::Receiver<()>,
    cancel: CancellationToken,
    timings: PumpTimings,
) -> PumpExit
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut keepalive = time::interval_at(Instant::now() + timings.ping_period, timings.ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let greeted = match welcome {
        Some(payload) if !cancel.is_cancelled() => {
            send_within(&mut sink, frame(payload.to_vec()), timings.write_wait).await
        }
        _ => Ok(()),
    };

    let exit = match greeted {
        Err(e) => PumpExit::Failed(e),
        Ok(()) => loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break PumpExit::Cancelled,

                next = outbound.recv() => match next {
                    Some(payload) => {
                        let message = coalesce(payload, &mut outbound);
                        if let Err(e) = send_within(&mut sink, message, timings.write_wait).await {
                            break PumpExit::Failed(e);
                        }
                    }
                    None => {
                        if let Err(e) = send_within(&mut sink, Message::Close(None), timings.write_wait).await {
                            debug!("Close frame to {} not delivered: {}", id, e);
                        }
                        break PumpExit::QueueReleased;
                    }
                },

                _ = keepalive.tick() => {
                    if let Err(e) = probe(&mut sink, timings.write_wait).await {
                        break PumpExit::Failed(e);
                    }
                }

                Some(()) = probes.recv() => {
                    if let Err(e) = probe(&mut sink, timings.write_wait).await {
                        break PumpExit::Failed(e);
                    }
                }
            }
        },
    };

    // Lets the read pump unwind if it is still waiting on the peer.
    cancel.cancel();

    match time::timeout(timings.write_wait, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Closing transport for {} reported: {}", id, e),
        Err(_) => debug!("Closing transport for {} timed out", id),
    }

    match &exit {
        PumpExit::Failed(e) => warn!("Write pump for {} failed: {}", id, e),
        other => debug!("Write pump for {} stopped: {:?}", id, other),
    }
    exit
}

/// Folds whatever is already buffered behind `first` into one frame, newline separated.
fn coalesce(first: Payload, queue: &mut mpsc::Receiver<Payload>) -> Message {
    let mut buf = first.to_vec();
    for _ in 0..MAX_COALESCE {
        match queue.try_recv() {
            Ok(next) => {
                buf.push(b'\n');
                buf.extend_from_slice(&next);
            }
            Err(_) => break,
        }
    }

    frame(buf)
}

/// Text when the bytes are valid UTF-8, binary otherwise.
fn frame(bytes: Vec<u8>) -> Message {
    match String::from_utf8(bytes) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

async fn send_within<S>(sink: &mut S, message: Message, deadline: Duration) -> Result<(), ConnectionError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match time::timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Write(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout(deadline)),
    }
}

async fn probe<S>(sink: &mut S, deadline: Duration) -> Result<(), ConnectionError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    send_within(sink, Message::Ping(Vec::new()), deadline)
        .await
        .map_err(|e| match e {
            ConnectionError::Write(reason) => ConnectionError::Probe(reason),
            other => other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use parking_lot::Mutex;

    const TIMINGS: PumpTimings = PumpTimings {
        pong_wait: Duration::from_secs(60),
        ping_period: Duration::from_secs(54),
        write_wait: Duration::from_secs(10),
    };

    #[derive(Default)]
    struct Collect(Mutex<Vec<(String, Payload)>>);

    impl InboundHandler for Collect {
        fn handle(&self, connection_id: &str, payload: Payload) {
            self.0.lock().push((connection_id.to_string(), payload));
        }
    }

    type Writer = (
        tokio::task::JoinHandle<PumpExit>,
        fmpsc::UnboundedReceiver<Message>,
    );

    fn spawn_writer(channels: PumpChannels) -> Writer {
        spawn_writer_with(channels, None)
    }

    fn spawn_writer_with(channels: PumpChannels, welcome: Option<Payload>) -> Writer {
        let (sink, wire) = fmpsc::unbounded::<Message>();
        let handle = tokio::spawn(write_pump(
            "w".to_string(),
            sink,
            welcome,
            channels.outbound,
            channels.probes,
            channels.cancel,
            TIMINGS,
        ));
        (handle, wire)
    }

    fn text(s: &str) -> Message {
        Message::Text(s.to_string())
    }

    #[tokio::test]
    async fn writer_flushes_then_closes_when_queue_released() {
        let (conn, channels) = ClientConnection::with_id("w".into(), 8);
        let (handle, mut wire) = spawn_writer(channels);

        conn.enqueue(Payload::from_static(b"first")).unwrap();
        assert_eq!(wire.next().await, Some(text("first")));

        drop(conn);
        assert_eq!(wire.next().await, Some(Message::Close(None)));
        assert_eq!(wire.next().await, None);
        assert_eq!(handle.await.unwrap(), PumpExit::QueueReleased);
    }

    #[tokio::test]
    async fn writer_coalesces_buffered_payloads() {
        let (conn, channels) = ClientConnection::with_id("w".into(), 8);
        for part in ["a", "b", "c"] {
            conn.enqueue(Payload::from(part)).unwrap();
        }
        let (handle, mut wire) = spawn_writer(channels);

        assert_eq!(wire.next().await, Some(text("a\nb\nc")));
        drop(conn);
        assert_eq!(handle.await.unwrap(), PumpExit::QueueReleased);
    }

    #[tokio::test]
    async fn welcome_is_its_own_frame_even_with_a_backlog() {
        let (conn, channels) = ClientConnection::with_id("x".into(), 8);
        conn.enqueue(Payload::from_static(b"hello")).unwrap();
        conn.enqueue(Payload::from_static(b"again")).unwrap();
        let (handle, mut wire) = spawn_writer_with(channels, Some(conn.welcome()));

        assert_eq!(wire.next().await, Some(text("Welcome! Your ID is: x")));
        assert_eq!(wire.next().await, Some(text("hello\nagain")));

        drop(conn);
        assert_eq!(wire.next().await, Some(Message::Close(None)));
        assert_eq!(handle.await.unwrap(), PumpExit::QueueReleased);
    }

    #[tokio::test]
    async fn cancelled_writer_skips_the_welcome() {
        let (conn, channels) = ClientConnection::with_id("x".into(), 8);
        conn.cancel();
        let (handle, mut wire) = spawn_writer_with(channels, Some(conn.welcome()));

        assert_eq!(handle.await.unwrap(), PumpExit::Cancelled);
        assert_eq!(wire.next().await, None);
    }

    #[tokio::test]
    async fn writer_sends_binary_when_payload_is_not_utf8() {
        let (conn, channels) = ClientConnection::with_id("w".into(), 8);
        conn.enqueue(Payload::from_static(&[0xff, 0x00])).unwrap();
        let (_handle, mut wire) = spawn_writer(channels);

        assert_eq!(wire.next().await, Some(Message::Binary(vec![0xff, 0x00])));
    }

    #[tokio::test]
    async fn cancelled_writer_closes_without_draining() {
        let (conn, channels) = ClientConnection::with_id("w".into(), 8);
        conn.enqueue(Payload::from_static(b"never sent")).unwrap();
        conn.cancel();
        let (handle, mut wire) = spawn_writer(channels);

        assert_eq!(handle.await.unwrap(), PumpExit::Cancelled);
        assert_eq!(wire.next().await, None);
    }

    #[tokio::test]
    async fn probe_request_sends_ping() {
        let (conn, channels) = ClientConnection::with_id("w".into(), 8);
        let (handle, mut wire) = spawn_writer(channels);

        conn.request_probe().unwrap();
        assert_eq!(wire.next().await, Some(Message::Ping(Vec::new())));

        drop(conn);
        assert_eq!(wire.next().await, Some(Message::Close(None)));
        assert_eq!(handle.await.unwrap(), PumpExit::QueueReleased);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_fires_every_ping_period() {
        let (conn, channels) = ClientConnection::with_id("w".into(), 8);
        let started = Instant::now();
        let (_handle, mut wire) = spawn_writer(channels);

        assert_eq!(wire.next().await, Some(Message::Ping(Vec::new())));
        assert!(started.elapsed() >= TIMINGS.ping_period);
        assert_eq!(wire.next().await, Some(Message::Ping(Vec::new())));
        assert!(started.elapsed() >= TIMINGS.ping_period * 2);
        drop(conn);
    }

    #[tokio::test]
    async fn write_failure_cancels_the_connection() {
        let (conn, channels) = ClientConnection::with_id("w".into(), 8);
        let (handle, wire) = spawn_writer(channels);
        drop(wire);

        conn.enqueue(Payload::from_static(b"lost")).unwrap();
        let exit = handle.await.unwrap();

        assert!(matches!(exit, PumpExit::Failed(ConnectionError::Write(_))));
        assert!(conn.is_cancelled());
    }

    #[tokio::test]
    async fn reader_forwards_data_records_pongs_and_unregisters_once() {
        let (manager, _task) = ConnectionManager::spawn(8, CancellationToken::new());
        let (conn, channels) = ClientConnection::with_id("r".into(), 8);
        manager.register(conn).await.unwrap();

        let (peer, stream) = fmpsc::unbounded::<Result<Message, String>>();
        peer.unbounded_send(Ok(text("hi"))).unwrap();
        peer.unbounded_send(Ok(Message::Binary(vec![1, 2]))).unwrap();
        peer.unbounded_send(Ok(Message::Pong(Vec::new()))).unwrap();
        drop(peer);

        let inbound = Collect::default();
        let exit = read_pump(
            "r",
            stream,
            &manager,
            &inbound,
            channels.cancel.clone(),
            &channels.liveness,
            TIMINGS.pong_wait,
        )
        .await;

        assert_eq!(exit, PumpExit::PeerClosed);
        let seen = inbound.0.lock().clone();
        assert_eq!(
            seen,
            vec![
                ("r".to_string(), Payload::from_static(b"hi")),
                ("r".to_string(), Payload::from_static(&[1, 2])),
            ]
        );
        assert_eq!(manager.connection_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reader_stops_on_close_frame() {
        let (manager, _task) = ConnectionManager::spawn(8, CancellationToken::new());
        let (_conn, channels) = ClientConnection::with_id("r".into(), 8);
        let (peer, stream) = fmpsc::unbounded::<Result<Message, String>>();
        peer.unbounded_send(Ok(Message::Close(None))).unwrap();

        let exit = read_pump(
            "r",
            stream,
            &manager,
            &Collect::default(),
            channels.cancel.clone(),
            &channels.liveness,
            TIMINGS.pong_wait,
        )
        .await;

        assert_eq!(exit, PumpExit::PeerClosed);
    }

    #[tokio::test]
    async fn reader_reports_transport_errors() {
        let (manager, _task) = ConnectionManager::spawn(8, CancellationToken::new());
        let (_conn, channels) = ClientConnection::with_id("r".into(), 8);
        let (peer, stream) = fmpsc::unbounded::<Result<Message, String>>();
        peer.unbounded_send(Err("connection reset".to_string())).unwrap();

        let exit = read_pump(
            "r",
            stream,
            &manager,
            &Collect::default(),
            channels.cancel.clone(),
            &channels.liveness,
            TIMINGS.pong_wait,
        )
        .await;

        assert_eq!(
            exit,
            PumpExit::Failed(ConnectionError::Read("connection reset".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reader_gives_up_after_pong_wait_without_ack() {
        let (manager, _task) = ConnectionManager::spawn(8, CancellationToken::new());
        let (conn, channels) = ClientConnection::with_id("r".into(), 8);
        manager.register(conn).await.unwrap();
        let (_peer, stream) = fmpsc::unbounded::<Result<Message, String>>();

        let started = Instant::now();
        let exit = read_pump(
            "r",
            stream,
            &manager,
            &Collect::default(),
            channels.cancel.clone(),
            &channels.liveness,
            TIMINGS.pong_wait,
        )
        .await;

        assert_eq!(
            exit,
            PumpExit::Failed(ConnectionError::ReadDeadline(TIMINGS.pong_wait))
        );
        assert!(started.elapsed() >= TIMINGS.pong_wait);
        assert_eq!(manager.connection_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_extends_the_read_deadline() {
        let (manager, _task) = ConnectionManager::spawn(8, CancellationToken::new());
        let (_conn, channels) = ClientConnection::with_id("r".into(), 8);
        let (peer, stream) = fmpsc::unbounded::<Result<Message, String>>();

        let started = Instant::now();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(40)).await;
            let _ = peer.unbounded_send(Ok(Message::Pong(Vec::new())));
            time::sleep(Duration::from_secs(1000)).await;
            drop(peer);
        });

        let exit = read_pump(
            "r",
            stream,
            &manager,
            &Collect::default(),
            channels.cancel.clone(),
            &channels.liveness,
            TIMINGS.pong_wait,
        )
        .await;

        assert!(matches!(
            exit,
            PumpExit::Failed(ConnectionError::ReadDeadline(_))
        ));
        assert!(started.elapsed() >= Duration::from_secs(100));
    }

    #[tokio::test]
    async fn cancellation_stops_the_reader() {
        let (manager, _task) = ConnectionManager::spawn(8, CancellationToken::new());
        let (conn, channels) = ClientConnection::with_id("r".into(), 8);
        let (_peer, stream) = fmpsc::unbounded::<Result<Message, String>>();
        conn.cancel();

        let exit = read_pump(
            "r",
            stream,
            &manager,
            &Collect::default(),
            channels.cancel.clone(),
            &channels.liveness,
            TIMINGS.pong_wait,
        )
        .await;

        assert_eq!(exit, PumpExit::Cancelled);
    }

    #[tokio::test]
    async fn session_gets_welcome_first_then_broadcasts() {
        let (manager, _task) = ConnectionManager::spawn(8, CancellationToken::new());
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        let (peer, stream) = fmpsc::unbounded::<Result<Message, String>>();

        let session_manager = manager.clone();
        let session = tokio::spawn(async move {
            serve_connection(
                sink,
                stream,
                &session_manager,
                Arc::new(Collect::default()),
                8,
                TIMINGS,
            )
            .await
        });

        let welcome = match wire.next().await {
            Some(Message::Text(body)) => body,
            other => panic!("expected welcome, got {other:?}"),
        };
        let id = welcome
            .strip_prefix("Welcome! Your ID is: ")
            .expect("welcome prefix")
            .to_string();
        assert_eq!(manager.connection_ids().await.unwrap(), vec![id.clone()]);

        manager.broadcast(Payload::from_static(b"hello")).await.unwrap();
        assert_eq!(wire.next().await, Some(text("hello")));

        drop(peer);
        assert_eq!(wire.next().await, Some(Message::Close(None)));

        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.id, id);
        assert_eq!(summary.read_exit, PumpExit::PeerClosed);
        assert_eq!(summary.write_exit, PumpExit::QueueReleased);
        assert_eq!(manager.connection_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn session_fails_when_hub_is_gone() {
        let shutdown = CancellationToken::new();
        let (manager, task) = ConnectionManager::spawn(8, shutdown.clone());
        shutdown.cancel();
        task.await.unwrap();

        let (sink, _wire) = fmpsc::unbounded::<Message>();
        let (_peer, stream) = fmpsc::unbounded::<Result<Message, String>>();
        let result = serve_connection(
            sink,
            stream,
            &manager,
            Arc::new(Collect::default()),
            8,
            TIMINGS,
        )
        .await;

        assert_eq!(result, Err(HubError::Closed));
    }
}
