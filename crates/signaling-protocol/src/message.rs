//! Typed signaling messages.
//!
//! Every message travels as `{"type": <kebab-case tag>, "payload": {...}}`
//! with camelCase payload fields. SDP blobs and ICE candidates are opaque:
//! the server forwards them without inspecting their contents.

use common::types::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Client -> server
// ============================================================================

/// Payload of a `join` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Room to join.
    pub room_id: RoomId,
    /// Self-asserted identity. May be omitted when the deployment injects
    /// the identity at the transport boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Payload of an `offer` or `answer` addressed to another participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    pub target_id: UserId,
    pub sdp: String,
}

/// Payload of an `ice-candidate` addressed to another participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub target_id: UserId,
    pub candidate: Value,
}

/// Payload of a `chat` message broadcast to the rest of the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: String,
}

/// Messages sent by clients.
///
/// Decoding goes through [`crate::codec::decode_client_message`], which
/// tolerates a missing `payload` and reports precise errors. `Serialize`
/// is derived for client implementations and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join(JoinRequest),
    Leave,
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    Chat(ChatMessage),
    Ping,
}

impl ClientMessage {
    /// Wire tag of this message, also used as a bounded metric label.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::Join(_) => "join",
            ClientMessage::Leave => "leave",
            ClientMessage::Offer(_) => "offer",
            ClientMessage::Answer(_) => "answer",
            ClientMessage::IceCandidate(_) => "ice-candidate",
            ClientMessage::Chat(_) => "chat",
            ClientMessage::Ping => "ping",
        }
    }
}

// ============================================================================
// Server -> client
// ============================================================================

/// Reply to a successful `join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Joined {
    pub room_id: RoomId,
    pub user_id: UserId,
    /// Members already present, in the order they joined.
    pub members: Vec<UserId>,
}

/// Membership notification naming a single peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub user_id: UserId,
}

/// A relayed `offer` or `answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedDescription {
    pub from_identity: UserId,
    pub sdp: String,
}

/// A relayed `ice-candidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedCandidate {
    pub from_identity: UserId,
    pub candidate: Value,
}

/// A relayed `chat` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedChat {
    pub from_identity: UserId,
    pub message: String,
}

/// Acknowledgement of an explicit `leave`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Left {
    pub room_id: RoomId,
}

/// Error report sent to the client that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub reason: ErrorReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    Joined(Joined),
    UserJoined(Peer),
    UserLeft(Peer),
    Offer(RelayedDescription),
    Answer(RelayedDescription),
    IceCandidate(RelayedCandidate),
    Chat(RelayedChat),
    Left(Left),
    Pong,
    Error(ErrorNotice),
}

impl ServerMessage {
    /// Build an `error` message.
    #[must_use]
    pub fn error(reason: ErrorReason, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorNotice {
            reason,
            message: Some(message.into()),
        })
    }

    /// Build a `user-joined` notification.
    #[must_use]
    pub fn user_joined(user_id: UserId) -> Self {
        ServerMessage::UserJoined(Peer { user_id })
    }

    /// Build a `user-left` notification.
    #[must_use]
    pub fn user_left(user_id: UserId) -> Self {
        ServerMessage::UserLeft(Peer { user_id })
    }

    /// Wire tag of this message, also used as a bounded metric label.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Joined(_) => "joined",
            ServerMessage::UserJoined(_) => "user-joined",
            ServerMessage::UserLeft(_) => "user-left",
            ServerMessage::Offer(_) => "offer",
            ServerMessage::Answer(_) => "answer",
            ServerMessage::IceCandidate(_) => "ice-candidate",
            ServerMessage::Chat(_) => "chat",
            ServerMessage::Left(_) => "left",
            ServerMessage::Pong => "pong",
            ServerMessage::Error(_) => "error",
        }
    }
}

/// Stable machine-readable error codes carried in `error` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    MalformedMessage,
    UnknownType,
    InvalidPayload,
    InvalidIdentity,
    InvalidRoomId,
    IdentityMismatch,
    NotInRoom,
    AlreadyInRoom,
    RoomFull,
    DuplicateUserInRoom,
    DuplicateIdentity,
    TargetNotInRoom,
    RoomNotFound,
    RoomExists,
    ChatDisabled,
    ServerAtCapacity,
    ServerShuttingDown,
    InternalError,
}

impl ErrorReason {
    /// Returns the wire code, also used as a bounded metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::MalformedMessage => "malformed_message",
            ErrorReason::UnknownType => "unknown_type",
            ErrorReason::InvalidPayload => "invalid_payload",
            ErrorReason::InvalidIdentity => "invalid_identity",
            ErrorReason::InvalidRoomId => "invalid_room_id",
            ErrorReason::IdentityMismatch => "identity_mismatch",
            ErrorReason::NotInRoom => "not_in_room",
            ErrorReason::AlreadyInRoom => "already_in_room",
            ErrorReason::RoomFull => "room_full",
            ErrorReason::DuplicateUserInRoom => "duplicate_user_in_room",
            ErrorReason::DuplicateIdentity => "duplicate_identity",
            ErrorReason::TargetNotInRoom => "target_not_in_room",
            ErrorReason::RoomNotFound => "room_not_found",
            ErrorReason::RoomExists => "room_exists",
            ErrorReason::ChatDisabled => "chat_disabled",
            ErrorReason::ServerAtCapacity => "server_at_capacity",
            ErrorReason::ServerShuttingDown => "server_shutting_down",
            ErrorReason::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
