//! In-process transport built on bounded channels.
//!
//! [`channel`] returns the server half as a [`Transport`] and the client
//! half as a [`MemoryPeer`]. Dropping or closing the peer ends the server's
//! inbound stream exactly like a client hanging up.

use super::{Frame, Transport, TransportError};
use futures::{future, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{PollSendError, PollSender};

/// Create a connected transport pair with `buffer` frames of capacity in
/// each direction.
#[must_use]
pub fn channel(buffer: usize) -> (Transport, MemoryPeer) {
    let (client_tx, server_rx) = mpsc::channel(buffer);
    let (server_tx, client_rx) = mpsc::channel(buffer);

    let sink = PollSender::new(server_tx)
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame)));
    let stream = ReceiverStream::new(server_rx).boxed();

    let transport = Transport::new(Box::pin(sink), stream);
    let peer = MemoryPeer {
        sender: Some(client_tx),
        receiver: client_rx,
    };

    (transport, peer)
}

impl<T> From<PollSendError<T>> for TransportError {
    fn from(_: PollSendError<T>) -> Self {
        TransportError::Closed
    }
}

/// Client side of an in-memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
    sender: Option<mpsc::Sender<Result<Frame, TransportError>>>,
    receiver: mpsc::Receiver<Frame>,
}

impl MemoryPeer {
    /// Deliver a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if either side has closed.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        self.push(Ok(frame)).await
    }

    /// Deliver a text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if either side has closed.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.push(Ok(Frame::Text(text.into()))).await
    }

    /// Make the server's next read fail with `error`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if either side has closed.
    pub async fn inject_error(&self, error: TransportError) -> Result<(), TransportError> {
        self.push(Err(error)).await
    }

    async fn push(&self, item: Result<Frame, TransportError>) -> Result<(), TransportError> {
        let sender = self.sender.as_ref().ok_or(TransportError::Closed)?;
        sender.send(item).await.map_err(|_| TransportError::Closed)
    }

    /// Receive the next frame sent by the server, or `None` once the server
    /// has released its sink.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv_frame(&mut self) -> Option<Frame> {
        self.receiver.try_recv().ok()
    }

    /// Hang up: the server's inbound stream ends after any queued frames.
    pub fn close(&mut self) {
        self.sender = None;
    }
}
