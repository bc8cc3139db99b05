//! Per-client connection: a writer actor plus an inbound reader.
//!
//! Each connection is split in two halves:
//!
//! - [`ConnectionHandle`] - cloneable, shared with rooms and the registry.
//!   `send` enqueues onto a bounded outbound queue drained by a writer task.
//! - [`Inbound`] - owned by the connection task in the hub, yields decoded
//!   client messages one at a time.
//!
//! # Backpressure
//!
//! `send` never waits. When the outbound queue is full the connection is
//! force-closed: its token is cancelled, the writer stops, and the next
//! `Inbound::receive` yields [`ReceiveError::ForceClosed`] so the hub runs
//! the usual disconnect cleanup.
//!
//! # Lifecycle
//!
//! The writer exits when the token is cancelled or when every handle has
//! been dropped (after flushing what is queued). Either way it sends a
//! best-effort close frame.

use crate::errors::HubError;
use crate::transport::{BoxFrameSink, BoxFrameStream, Frame, Transport, TransportError};

use super::metrics::ActorMetrics;

use common::types::ConnectionId;
use futures::{SinkExt, StreamExt};
use signaling_protocol::{
    decode_client_message, encode_server_message, ClientMessage, ProtocolError, ServerMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Upper bound on delivering the final close frame.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Tunables for one connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Capacity of the outbound queue.
    pub outbound_buffer: usize,
    /// Close the connection when no frame arrives for this long.
    pub idle_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_buffer: crate::config::DEFAULT_OUTBOUND_BUFFER,
            idle_timeout: Duration::from_secs(crate::config::DEFAULT_IDLE_TIMEOUT_SECONDS),
        }
    }
}

/// Handle used to push messages to one client.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    connection_id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl ConnectionHandle {
    /// Enqueue a message for delivery without waiting.
    ///
    /// # Errors
    ///
    /// Returns `HubError::ConnectionClosed` if the connection is gone, or if
    /// the outbound queue was full (the connection is force-closed first).
    pub fn send(&self, message: ServerMessage) -> Result<(), HubError> {
        if self.cancel_token.is_cancelled() {
            return Err(HubError::ConnectionClosed);
        }

        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                self.metrics.record_drop();
                warn!(
                    target: "sig.actor.connection",
                    connection_id = %self.connection_id,
                    message_type = message.message_type(),
                    "Outbound queue full, force-closing slow connection"
                );
                self.cancel_token.cancel();
                Err(HubError::ConnectionClosed)
            }
            Err(TrySendError::Closed(_)) => Err(HubError::ConnectionClosed),
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }
}

/// Why an inbound item is an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiveError {
    /// The frame could not be decoded. The connection stays open.
    #[error("Malformed message: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("No frame received within the idle window")]
    IdleTimeout,

    #[error("Transport failed: {0}")]
    Transport(TransportError),

    /// The connection was closed locally (overflow or shutdown).
    #[error("Connection force-closed")]
    ForceClosed,
}

impl ReceiveError {
    /// Returns true if the inbound sequence ends after this item.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, ReceiveError::Malformed(_))
    }

    /// Bounded label for the connection-closed metric.
    #[must_use]
    pub const fn close_reason(&self) -> &'static str {
        match self {
            ReceiveError::Malformed(_) => "malformed",
            ReceiveError::IdleTimeout => "idle_timeout",
            ReceiveError::Transport(_) => "transport_error",
            ReceiveError::ForceClosed => "force_closed",
        }
    }
}

/// Inbound half of a connection.
pub struct Inbound {
    connection_id: ConnectionId,
    stream: BoxFrameStream,
    idle_timeout: Duration,
    cancel_token: CancellationToken,
    finished: bool,
}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbound")
            .field("connection_id", &self.connection_id)
            .field("idle_timeout", &self.idle_timeout)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Inbound {
    /// Next inbound message.
    ///
    /// Returns `None` once the client has closed the transport, and after
    /// any fatal error has been yielded. Keepalive frames are consumed here
    /// and only reset the idle timer.
    pub async fn receive(&mut self) -> Option<Result<ClientMessage, ReceiveError>> {
        if self.finished {
            return None;
        }

        let item = loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    break Err(ReceiveError::ForceClosed);
                }

                next = tokio::time::timeout(self.idle_timeout, self.stream.next()) => {
                    match next {
                        Err(_) => break Err(ReceiveError::IdleTimeout),
                        Ok(None | Some(Ok(Frame::Close))) => {
                            self.finished = true;
                            return None;
                        }
                        Ok(Some(Err(e))) => break Err(ReceiveError::Transport(e)),
                        Ok(Some(Ok(Frame::Keepalive))) => {}
                        Ok(Some(Ok(Frame::Binary(_)))) => {
                            break Err(ReceiveError::Malformed(ProtocolError::BinaryFrame));
                        }
                        Ok(Some(Ok(Frame::Text(text)))) => {
                            break decode_client_message(&text).map_err(ReceiveError::from);
                        }
                    }
                }
            }
        };

        if let Err(e) = &item {
            if e.is_fatal() {
                self.finished = true;
            }
        }

        Some(item)
    }
}

/// Writer actor draining the outbound queue into the transport sink.
struct ConnectionWriter {
    connection_id: ConnectionId,
    receiver: mpsc::Receiver<ServerMessage>,
    sink: BoxFrameSink,
    cancel_token: CancellationToken,
}

/// Build a connection over `transport` and spawn its writer.
///
/// Returns the shared handle, the inbound half, and the writer's join handle.
pub fn spawn(
    connection_id: ConnectionId,
    transport: Transport,
    settings: ConnectionSettings,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
) -> (ConnectionHandle, Inbound, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(settings.outbound_buffer.max(1));
    let Transport { sink, stream } = transport;

    let writer = ConnectionWriter {
        connection_id,
        receiver,
        sink,
        cancel_token: cancel_token.clone(),
    };
    let task_handle = tokio::spawn(writer.run());

    let handle = ConnectionHandle {
        connection_id,
        sender,
        cancel_token: cancel_token.clone(),
        metrics,
    };

    let inbound = Inbound {
        connection_id,
        stream,
        idle_timeout: settings.idle_timeout,
        cancel_token,
        finished: false,
    };

    (handle, inbound, task_handle)
}

impl ConnectionWriter {
    #[instrument(skip_all, name = "sig.actor.connection", fields(connection_id = %self.connection_id))]
    async fn run(mut self) {
        debug!(
            target: "sig.actor.connection",
            connection_id = %self.connection_id,
            "Connection writer started"
        );

        let mut frames_sent: u64 = 0;
        let mut transport_failed = false;

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sig.actor.connection",
                        connection_id = %self.connection_id,
                        "Connection writer received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        // Every handle dropped; queue fully flushed.
                        break;
                    };

                    let text = match encode_server_message(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(
                                target: "sig.actor.connection",
                                connection_id = %self.connection_id,
                                message_type = message.message_type(),
                                error = %e,
                                "Failed to encode outbound message, skipping"
                            );
                            continue;
                        }
                    };

                    // A stalled peer must not pin the writer past cancellation.
                    tokio::select! {
                        biased;

                        () = self.cancel_token.cancelled() => break,

                        result = self.sink.send(Frame::Text(text)) => {
                            if let Err(e) = result {
                                debug!(
                                    target: "sig.actor.connection",
                                    connection_id = %self.connection_id,
                                    error = %e,
                                    "Transport write failed, closing connection"
                                );
                                self.cancel_token.cancel();
                                transport_failed = true;
                                break;
                            }
                            frames_sent += 1;
                        }
                    }
                }
            }
        }

        self.receiver.close();
        // Best effort; the peer may already be gone or stalled.
        if !transport_failed {
            let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, async {
                let _ = self.sink.send(Frame::Close).await;
                let _ = self.sink.close().await;
            })
            .await;
        }

        debug!(
            target: "sig.actor.connection",
            connection_id = %self.connection_id,
            frames_sent = frames_sent,
            transport_failed = transport_failed,
            "Connection writer stopped"
        );
    }
}
