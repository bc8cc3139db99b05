//! WebSocket test client speaking the signaling protocol.

use crate::server_harness::TestSignalingServer;
use futures::{SinkExt, StreamExt};
use signaling_protocol::{
    decode_server_message, encode_client_message, ChatMessage, ClientMessage, ErrorNotice,
    IceCandidate, JoinRequest, Joined, ServerMessage, SessionDescription,
};
use common::types::{RoomId, UserId};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long `recv` waits before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected signaling client.
pub struct TestClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect to the server's `/ws` endpoint.
    pub async fn connect(server: &TestSignalingServer) -> Result<Self, anyhow::Error> {
        let (socket, _) = connect_async(server.ws_url()).await?;
        Ok(Self { socket })
    }

    /// Connect with an identity header, as an auth proxy would.
    pub async fn connect_with_header(
        server: &TestSignalingServer,
        name: &'static str,
        value: &str,
    ) -> Result<Self, anyhow::Error> {
        let mut request = server.ws_url().into_client_request()?;
        request
            .headers_mut()
            .insert(name, HeaderValue::from_str(value)?);
        let (socket, _) = connect_async(request).await?;
        Ok(Self { socket })
    }

    /// Send a typed client message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), anyhow::Error> {
        let text = encode_client_message(message)?;
        self.send_raw(text).await
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: impl Into<String>) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Send a binary frame.
    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Binary(data)).await?;
        Ok(())
    }

    /// Send `join` and wait for `joined`.
    pub async fn join(&mut self, room_id: &str, user_id: &str) -> Result<Joined, anyhow::Error> {
        self.send_join(room_id, Some(user_id)).await?;
        match self.recv().await? {
            ServerMessage::Joined(joined) => Ok(joined),
            other => Err(anyhow::anyhow!("Expected joined, got {:?}", other)),
        }
    }

    /// Send `join` without waiting for the reply.
    pub async fn send_join(
        &mut self,
        room_id: &str,
        user_id: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        self.send(&ClientMessage::Join(JoinRequest {
            room_id: RoomId::from(room_id),
            user_id: user_id.map(UserId::from),
        }))
        .await
    }

    pub async fn leave(&mut self) -> Result<(), anyhow::Error> {
        self.send(&ClientMessage::Leave).await
    }

    pub async fn offer(&mut self, target: &str, sdp: &str) -> Result<(), anyhow::Error> {
        self.send(&ClientMessage::Offer(SessionDescription {
            target_id: UserId::from(target),
            sdp: sdp.to_string(),
        }))
        .await
    }

    pub async fn answer(&mut self, target: &str, sdp: &str) -> Result<(), anyhow::Error> {
        self.send(&ClientMessage::Answer(SessionDescription {
            target_id: UserId::from(target),
            sdp: sdp.to_string(),
        }))
        .await
    }

    pub async fn ice_candidate(
        &mut self,
        target: &str,
        candidate: serde_json::Value,
    ) -> Result<(), anyhow::Error> {
        self.send(&ClientMessage::IceCandidate(IceCandidate {
            target_id: UserId::from(target),
            candidate,
        }))
        .await
    }

    pub async fn chat(&mut self, message: &str) -> Result<(), anyhow::Error> {
        self.send(&ClientMessage::Chat(ChatMessage {
            message: message.to_string(),
        }))
        .await
    }

    /// Receive the next server message, failing after [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Result<ServerMessage, anyhow::Error> {
        self.recv_within(RECV_TIMEOUT)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No message within {:?}", RECV_TIMEOUT))
    }

    /// Receive the next server message, or `None` if nothing arrives in time.
    ///
    /// Fails if the connection closes.
    pub async fn recv_within(
        &mut self,
        wait: Duration,
    ) -> Result<Option<ServerMessage>, anyhow::Error> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.socket.next()).await {
                Err(_) => return Ok(None),
                Ok(frame) => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(Some(decode_server_message(&text)?)),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(anyhow::anyhow!("Connection closed"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Receive the next message and require it to be an error.
    pub async fn recv_error(&mut self) -> Result<ErrorNotice, anyhow::Error> {
        match self.recv().await? {
            ServerMessage::Error(notice) => Ok(notice),
            other => Err(anyhow::anyhow!("Expected error, got {:?}", other)),
        }
    }

    /// Assert that nothing arrives for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) -> Result<(), anyhow::Error> {
        match self.recv_within(wait).await? {
            None => Ok(()),
            Some(message) => Err(anyhow::anyhow!("Unexpected message {:?}", message)),
        }
    }

    /// Wait until the server closes the connection, skipping any messages
    /// still in flight.
    pub async fn expect_closed(&mut self, wait: Duration) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.socket.next()).await {
                Err(_) => return Err(anyhow::anyhow!("Connection still open after {:?}", wait)),
                Ok(Some(Ok(Message::Close(_))) | None | Some(Err(_))) => return Ok(()),
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    /// Stop reading without closing, so server-side queues fill up.
    pub fn into_stalled(self) -> WebSocketStream<MaybeTlsStream<TcpStream>> {
        self.socket
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.socket.close(None).await?;
        Ok(())
    }
}
