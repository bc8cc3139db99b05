//! Codec for encoding and decoding signaling messages.
//!
//! Inbound frames are validated here, at the transport boundary. Anything
//! that does not decode into a [`ClientMessage`] becomes a
//! [`ProtocolError`], which the server reports back to the sender without
//! closing the connection.

use crate::message::{ClientMessage, ErrorReason, ServerMessage};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Maximum accepted size of a single text frame, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Longest message type echoed back in an `unknown_type` error.
const MAX_ECHOED_TYPE_LEN: usize = 64;

/// Error type for codec operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame exceeds [`MAX_MESSAGE_SIZE`]
    #[error("Message too large: {0} bytes")]
    TooLarge(usize),

    /// Frame was binary; the protocol is UTF-8 JSON only
    #[error("Binary frames are not supported")]
    BinaryFrame,

    /// Frame is not a JSON object
    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    /// Object has no string `type` field
    #[error("Message has no type field")]
    MissingType,

    /// `type` names no known message
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// `payload` does not match the shape required by `type`
    #[error("Invalid {message_type} payload: {reason}")]
    InvalidPayload {
        message_type: &'static str,
        reason: String,
    },

    /// Serialization of an outbound message failed
    #[error("Encoding failed: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Wire error code reported to the client for this error.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        match self {
            ProtocolError::TooLarge(_)
            | ProtocolError::BinaryFrame
            | ProtocolError::MalformedJson(_)
            | ProtocolError::MissingType => ErrorReason::MalformedMessage,
            ProtocolError::UnknownType(_) => ErrorReason::UnknownType,
            ProtocolError::InvalidPayload { .. } => ErrorReason::InvalidPayload,
            ProtocolError::Encode(_) => ErrorReason::InternalError,
        }
    }
}

/// Decode a client message from a text frame
///
/// A missing or `null` payload is treated as an empty object, so
/// `{"type":"leave"}` and `{"type":"leave","payload":{}}` are equivalent.
/// Unknown payload fields are ignored.
///
/// # Errors
///
/// Returns an error if the frame is oversized, is not a JSON object, has no
/// `type`, names an unknown type, or carries a payload of the wrong shape.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(text.len()));
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;

    let Value::Object(mut object) = value else {
        return Err(ProtocolError::MalformedJson(
            "expected a JSON object".to_string(),
        ));
    };

    let message_type = match object.remove("type") {
        Some(Value::String(message_type)) => message_type,
        _ => return Err(ProtocolError::MissingType),
    };

    let payload = match object.remove("payload") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(payload) => payload,
    };

    match message_type.as_str() {
        "join" => parse_payload("join", payload).map(ClientMessage::Join),
        "leave" => Ok(ClientMessage::Leave),
        "offer" => parse_payload("offer", payload).map(ClientMessage::Offer),
        "answer" => parse_payload("answer", payload).map(ClientMessage::Answer),
        "ice-candidate" => parse_payload("ice-candidate", payload).map(ClientMessage::IceCandidate),
        "chat" => parse_payload("chat", payload).map(ClientMessage::Chat),
        "ping" => Ok(ClientMessage::Ping),
        other => Err(ProtocolError::UnknownType(
            other.chars().take(MAX_ECHOED_TYPE_LEN).collect(),
        )),
    }
}

fn parse_payload<T: DeserializeOwned>(
    message_type: &'static str,
    payload: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        message_type,
        reason: e.to_string(),
    })
}

/// Encode a server message to a text frame
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_server_message(message: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Encode a client message to a text frame
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_client_message(message: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a server message from a text frame
///
/// # Errors
///
/// Returns an error if the frame is not a valid server message
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::message::{ChatMessage, JoinRequest, SessionDescription};
    use common::types::{RoomId, UserId};
    use serde_json::json;

    #[test]
    fn test_decode_join() {
        let msg =
            decode_client_message(r#"{"type":"join","payload":{"roomId":"room_1","userId":"Alice"}}"#)
                .unwrap();

        assert_eq!(
            msg,
            ClientMessage::Join(JoinRequest {
                room_id: RoomId::from("room_1"),
                user_id: Some(UserId::from("Alice")),
            })
        );
    }

    #[test]
    fn test_decode_join_without_user_id() {
        let msg = decode_client_message(r#"{"type":"join","payload":{"roomId":"room_1"}}"#).unwrap();

        assert!(matches!(msg, ClientMessage::Join(JoinRequest { user_id: None, .. })));
    }

    #[test]
    fn test_decode_offer_keeps_sdp_verbatim() {
        let sdp = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n";
        let frame = json!({"type": "offer", "payload": {"targetId": "Bob", "sdp": sdp}}).to_string();

        let msg = decode_client_message(&frame).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Offer(SessionDescription {
                target_id: UserId::from("Bob"),
                sdp: sdp.to_string(),
            })
        );
    }

    #[test]
    fn test_decode_ice_candidate_keeps_candidate_opaque() {
        let candidate = json!({
            "candidate": "candidate:842163049 1 udp 1677729535 192.0.2.1 3478 typ srflx",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        });
        let frame = json!({
            "type": "ice-candidate",
            "payload": {"targetId": "Alice", "candidate": candidate}
        })
        .to_string();

        let msg = decode_client_message(&frame).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::IceCandidate(ice) if ice.target_id.as_str() == "Alice" && ice.candidate == candidate
        ));
    }

    #[test]
    fn test_missing_or_null_payload_is_empty_object() {
        assert_eq!(
            decode_client_message(r#"{"type":"leave"}"#).unwrap(),
            ClientMessage::Leave
        );
        assert_eq!(
            decode_client_message(r#"{"type":"ping","payload":null}"#).unwrap(),
            ClientMessage::Ping
        );
    }

    #[test]
    fn test_decode_chat() {
        let msg = decode_client_message(r#"{"type":"chat","payload":{"message":"hi"}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Chat(ChatMessage {
                message: "hi".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_json() {
        let err = decode_client_message("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedJson(_)));
        assert_eq!(err.reason(), ErrorReason::MalformedMessage);

        let err = decode_client_message("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedJson(_)));
    }

    #[test]
    fn test_missing_type() {
        let err = decode_client_message(r#"{"payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingType));

        let err = decode_client_message(r#"{"type":7}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingType));
    }

    #[test]
    fn test_unknown_type() {
        let err = decode_client_message(r#"{"type":"renegotiate","payload":{}}"#).unwrap_err();
        assert!(matches!(&err, ProtocolError::UnknownType(t) if t == "renegotiate"));
        assert_eq!(err.reason(), ErrorReason::UnknownType);
    }

    #[test]
    fn test_unknown_type_is_truncated() {
        let long_type = "x".repeat(1000);
        let frame = json!({"type": long_type}).to_string();

        let err = decode_client_message(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(echoed) if echoed.len() == MAX_ECHOED_TYPE_LEN));
    }

    #[test]
    fn test_invalid_payload() {
        let err = decode_client_message(r#"{"type":"offer","payload":{"sdp":"X"}}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidPayload {
                message_type: "offer",
                ..
            }
        ));
        assert_eq!(err.reason(), ErrorReason::InvalidPayload);

        let err = decode_client_message(r#"{"type":"join","payload":{"roomId":42}}"#).unwrap_err();
        assert_eq!(err.reason(), ErrorReason::InvalidPayload);
    }

    #[test]
    fn test_oversized_frame_rejected_before_parsing() {
        let frame = format!(
            r#"{{"type":"chat","payload":{{"message":"{}"}}}}"#,
            "a".repeat(MAX_MESSAGE_SIZE)
        );

        let err = decode_client_message(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge(len) if len == frame.len()));
    }

    #[test]
    fn test_client_encoding_is_accepted_by_decoder() {
        let msg = ClientMessage::Answer(SessionDescription {
            target_id: UserId::from("Alice"),
            sdp: "Y".to_string(),
        });

        let text = encode_client_message(&msg).unwrap();
        assert_eq!(decode_client_message(&text).unwrap(), msg);
    }

    #[test]
    fn test_decode_server_message() {
        let msg = decode_server_message(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Pong);

        let text = encode_server_message(&ServerMessage::error(
            ErrorReason::TargetNotInRoom,
            "Target is not in this room",
        ))
        .unwrap();
        assert!(text.contains(r#""reason":"target_not_in_room""#));
    }
}
