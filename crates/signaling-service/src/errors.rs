//! Signaling hub error types.
//!
//! Every variant maps to a stable wire [`ErrorReason`] that is sent to the
//! client that caused it, and to an HTTP status for the management routes.
//! Internal details are logged server-side but not exposed to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::types::{RoomId, UserId};
use serde::Serialize;
use signaling_protocol::{ErrorNotice, ErrorReason, ProtocolError, ServerMessage};
use thiserror::Error;

/// Signaling hub error type.
///
/// Grouped by how the hub reacts:
/// - Protocol errors: reported to the sender, connection stays open
/// - Capacity and conflict errors: reported to the requester only
/// - `Internal`, `RoomRetired`, `ConnectionClosed`: logged, reported as
///   `internal_error`, and the connection is closed
#[derive(Debug, Error)]
pub enum HubError {
    /// Inbound frame failed validation.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Identity is empty, too long, or contains control characters.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Room ID is empty, too long, or contains control characters.
    #[error("Invalid room ID: {0}")]
    InvalidRoomId(String),

    /// Client-asserted identity differs from the authenticated one.
    #[error("Identity does not match authenticated identity")]
    IdentityMismatch,

    /// Operation requires the connection to have joined a room.
    #[error("Not in a room")]
    NotInRoom,

    /// `join` received while already in a room.
    #[error("Already in a room")]
    AlreadyInRoom,

    /// Room is at its participant limit.
    #[error("Room at capacity: {0}")]
    RoomFull(RoomId),

    /// Identity is already present in the room.
    #[error("Duplicate user in room: {0}")]
    DuplicateUserInRoom(UserId),

    /// Identity is already registered under the active identity scope.
    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(UserId),

    /// Relay target is not a member of the sender's room.
    #[error("Target not in room: {0}")]
    TargetNotInRoom(UserId),

    /// Room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Participant is not registered.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(UserId),

    /// Conflict error (e.g., room already exists).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Chat relay requested in a room with chat disabled.
    #[error("Chat is disabled in this room")]
    ChatDisabled,

    /// Room limit reached (load shedding).
    #[error("Server at capacity")]
    ServerAtCapacity,

    /// Hub is draining (graceful shutdown).
    #[error("Hub is draining")]
    Draining,

    /// Room actor emptied and stopped before handling the request.
    #[error("Room retired")]
    RoomRetired,

    /// Connection is closed or was force-closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the wire error code for this error.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        match self {
            HubError::Protocol(e) => e.reason(),
            HubError::InvalidIdentity(_) => ErrorReason::InvalidIdentity,
            HubError::InvalidRoomId(_) => ErrorReason::InvalidRoomId,
            HubError::IdentityMismatch => ErrorReason::IdentityMismatch,
            HubError::NotInRoom | HubError::ParticipantNotFound(_) => ErrorReason::NotInRoom,
            HubError::AlreadyInRoom => ErrorReason::AlreadyInRoom,
            HubError::RoomFull(_) => ErrorReason::RoomFull,
            HubError::DuplicateUserInRoom(_) => ErrorReason::DuplicateUserInRoom,
            HubError::DuplicateIdentity(_) => ErrorReason::DuplicateIdentity,
            HubError::TargetNotInRoom(_) => ErrorReason::TargetNotInRoom,
            HubError::RoomNotFound(_) => ErrorReason::RoomNotFound,
            HubError::Conflict(_) => ErrorReason::RoomExists,
            HubError::ChatDisabled => ErrorReason::ChatDisabled,
            HubError::ServerAtCapacity => ErrorReason::ServerAtCapacity,
            HubError::Draining => ErrorReason::ServerShuttingDown,
            HubError::RoomRetired | HubError::ConnectionClosed | HubError::Internal(_) => {
                ErrorReason::InternalError
            }
        }
    }

    /// Returns true if the connection that hit this error must be closed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            HubError::Internal(_) | HubError::RoomRetired | HubError::ConnectionClosed
        )
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::Protocol(_)
            | HubError::InvalidIdentity(_)
            | HubError::InvalidRoomId(_)
            | HubError::NotInRoom
            | HubError::AlreadyInRoom
            | HubError::TargetNotInRoom(_)
            | HubError::ChatDisabled => StatusCode::BAD_REQUEST,
            HubError::IdentityMismatch => StatusCode::FORBIDDEN,
            HubError::RoomNotFound(_) | HubError::ParticipantNotFound(_) => StatusCode::NOT_FOUND,
            HubError::RoomFull(_)
            | HubError::DuplicateUserInRoom(_)
            | HubError::DuplicateIdentity(_)
            | HubError::Conflict(_) => StatusCode::CONFLICT,
            HubError::ServerAtCapacity | HubError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            HubError::RoomRetired | HubError::ConnectionClosed | HubError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            HubError::Protocol(e) => e.to_string(),
            HubError::InvalidIdentity(reason) | HubError::InvalidRoomId(reason) => reason.clone(),
            HubError::IdentityMismatch => {
                "userId does not match the authenticated identity".to_string()
            }
            HubError::NotInRoom | HubError::ParticipantNotFound(_) => {
                "Join a room first".to_string()
            }
            HubError::AlreadyInRoom => "Leave the current room before joining another".to_string(),
            HubError::RoomFull(_) => "Room is at capacity".to_string(),
            HubError::DuplicateUserInRoom(user_id) => {
                format!("{user_id} is already in this room")
            }
            HubError::DuplicateIdentity(user_id) => format!("{user_id} is already connected"),
            HubError::TargetNotInRoom(user_id) => format!("{user_id} is not in this room"),
            HubError::RoomNotFound(_) => "Room not found".to_string(),
            HubError::Conflict(msg) => msg.clone(),
            HubError::ChatDisabled => "Chat is disabled in this room".to_string(),
            HubError::ServerAtCapacity => "Server is at capacity, please try again".to_string(),
            HubError::Draining => "Server is shutting down, please reconnect".to_string(),
            HubError::RoomRetired | HubError::ConnectionClosed | HubError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Build the `error` message sent to the client.
    #[must_use]
    pub fn to_server_message(&self) -> ServerMessage {
        ServerMessage::Error(ErrorNotice {
            reason: self.reason(),
            message: Some(self.client_message()),
        })
    }
}

/// Error response body for the HTTP routes.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log actual error server-side, return generic message to client
            tracing::error!(target: "sig.http", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.reason().as_str(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_mapping() {
        assert_eq!(
            HubError::RoomFull(RoomId::from("r")).reason(),
            ErrorReason::RoomFull
        );
        assert_eq!(
            HubError::DuplicateUserInRoom(UserId::from("a")).reason(),
            ErrorReason::DuplicateUserInRoom
        );
        assert_eq!(
            HubError::DuplicateIdentity(UserId::from("a")).reason(),
            ErrorReason::DuplicateIdentity
        );
        assert_eq!(
            HubError::TargetNotInRoom(UserId::from("b")).reason(),
            ErrorReason::TargetNotInRoom
        );
        assert_eq!(HubError::NotInRoom.reason(), ErrorReason::NotInRoom);
        assert_eq!(HubError::AlreadyInRoom.reason(), ErrorReason::AlreadyInRoom);
        assert_eq!(
            HubError::Draining.reason(),
            ErrorReason::ServerShuttingDown
        );
        assert_eq!(
            HubError::Protocol(ProtocolError::UnknownType("x".to_string())).reason(),
            ErrorReason::UnknownType
        );
        assert_eq!(
            HubError::Internal("boom".to_string()).reason(),
            ErrorReason::InternalError
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = HubError::Internal("room actor mailbox closed for room_1".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
        assert!(!err.client_message().contains("room_1"));

        assert_eq!(
            HubError::RoomRetired.client_message(),
            "An internal error occurred"
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(HubError::Internal("x".to_string()).is_fatal());
        assert!(HubError::ConnectionClosed.is_fatal());
        assert!(HubError::RoomRetired.is_fatal());

        assert!(!HubError::RoomFull(RoomId::from("r")).is_fatal());
        assert!(!HubError::TargetNotInRoom(UserId::from("b")).is_fatal());
        assert!(!HubError::Protocol(ProtocolError::MissingType).is_fatal());
        assert!(!HubError::Draining.is_fatal());
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            HubError::RoomNotFound(RoomId::from("r")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HubError::Conflict("exists".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            HubError::InvalidRoomId("empty".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HubError::Draining.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            HubError::Internal("x".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_to_server_message() {
        let msg = HubError::TargetNotInRoom(UserId::from("Bob")).to_server_message();
        assert_eq!(
            msg,
            ServerMessage::Error(ErrorNotice {
                reason: ErrorReason::TargetNotInRoom,
                message: Some("Bob is not in this room".to_string()),
            })
        );
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", HubError::RoomFull(RoomId::from("room_1"))),
            "Room at capacity: room_1"
        );
        assert_eq!(
            format!(
                "{}",
                HubError::Protocol(ProtocolError::UnknownType("bogus".to_string()))
            ),
            "Protocol error: Unknown message type: bogus"
        );
    }
}
