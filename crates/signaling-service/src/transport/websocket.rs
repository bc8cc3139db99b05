//! Adapter from an upgraded axum WebSocket to a [`Transport`].
//!
//! axum answers WebSocket pings on its own; both pings and pongs surface
//! here as [`Frame::Keepalive`] so they keep the connection's idle timer
//! fresh.

use super::{Frame, Transport, TransportError};
use axum::extract::ws::{Message, WebSocket};
use futures::{future, SinkExt, StreamExt};

/// Split an upgraded socket into a frame transport.
#[must_use]
pub fn into_transport(socket: WebSocket) -> Transport {
    let (sink, stream) = socket.split();

    // `with` converts errors on every poll, so the sink stays usable
    // after a failed write.
    let sink =
        sink.with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame_to_message(frame))));

    let stream = stream.map(|result| {
        result
            .map(message_to_frame)
            .map_err(|e| TransportError::Io(e.to_string()))
    });

    Transport::new(Box::pin(sink), stream.boxed())
}

impl From<axum::Error> for TransportError {
    fn from(e: axum::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

fn message_to_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(_) | Message::Pong(_) => Frame::Keepalive,
        Message::Close(_) => Frame::Close,
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Keepalive => Message::Ping(Vec::new()),
        Frame::Close => Message::Close(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_mapping() {
        assert_eq!(
            message_to_frame(Message::Text("{}".to_string())),
            Frame::Text("{}".to_string())
        );
        assert_eq!(
            message_to_frame(Message::Binary(vec![1, 2])),
            Frame::Binary(vec![1, 2])
        );
        assert_eq!(message_to_frame(Message::Ping(vec![9])), Frame::Keepalive);
        assert_eq!(message_to_frame(Message::Pong(Vec::new())), Frame::Keepalive);
        assert_eq!(message_to_frame(Message::Close(None)), Frame::Close);
    }

    #[test]
    fn test_outbound_mapping() {
        assert!(matches!(
            frame_to_message(Frame::Text("x".to_string())),
            Message::Text(t) if t == "x"
        ));
        assert!(matches!(frame_to_message(Frame::Keepalive), Message::Ping(_)));
        assert!(matches!(frame_to_message(Frame::Close), Message::Close(None)));
    }

    #[test]
    fn test_socket_error_maps_to_io() {
        let error = TransportError::from(axum::Error::new("connection reset"));
        assert_eq!(error, TransportError::Io("connection reset".to_string()));
    }
}
