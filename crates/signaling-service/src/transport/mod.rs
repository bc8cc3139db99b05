//! Transport boundary.
//!
//! The hub never sees HTTP or WebSocket types. A [`Transport`] is a pair of
//! boxed frame sink and frame stream; adapters convert a concrete channel
//! into one:
//!
//! - [`websocket`] - an upgraded axum WebSocket
//! - [`memory`] - an in-process channel pair, for embedding and tests

pub mod memory;
pub mod websocket;

use futures::stream::BoxStream;
use futures::Sink;
use std::pin::Pin;

/// One transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text carrying one JSON message.
    Text(String),
    /// Binary data; never valid in this protocol.
    Binary(Vec<u8>),
    /// Transport-level liveness traffic (WebSocket ping/pong). Resets the
    /// idle timer but carries no message.
    Keepalive,
    /// Orderly close.
    Close,
}

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer or the local side has gone away.
    #[error("Transport closed")]
    Closed,

    /// Read or write failure.
    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// Outbound half of a transport.
pub type BoxFrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a transport.
pub type BoxFrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// A bidirectional frame channel to one client.
pub struct Transport {
    pub sink: BoxFrameSink,
    pub stream: BoxFrameStream,
}

impl Transport {
    #[must_use]
    pub fn new(sink: BoxFrameSink, stream: BoxFrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
