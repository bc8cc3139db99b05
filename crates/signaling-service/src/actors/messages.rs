//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use crate::errors::HubError;

use super::connection::ConnectionHandle;
use super::room::RoomHandle;

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, RoomId, UserId};
use serde_json::Value;
use signaling_protocol::{RelayedCandidate, RelayedDescription, ServerMessage};
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `RoomManagerActor`.
#[derive(Debug)]
pub enum ManagerMessage {
    /// Resolve a room, creating it with default options if unknown.
    GetOrCreate {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomHandle, HubError>>,
    },

    /// Resolve an existing room.
    GetIfExists {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomHandle, HubError>>,
    },

    /// Pre-register a room with explicit options.
    CreateRoom {
        room_id: RoomId,
        options: RoomOptions,
        respond_to: oneshot::Sender<Result<RoomHandle, HubError>>,
    },

    /// Read-only room summary.
    GetRoomInfo {
        room_id: RoomId,
        respond_to: oneshot::Sender<Option<RoomInfo>>,
    },

    /// Sent by a room actor when its last member leaves, just before it
    /// stops accepting messages. No reply.
    RoomEmpty { room_id: RoomId, instance_id: u64 },

    /// Get current status (for health checks and the status route).
    GetStatus {
        respond_to: oneshot::Sender<ManagerStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Add a participant; replies with the members already present.
    Join {
        participant: Participant,
        respond_to: oneshot::Sender<Result<Vec<UserId>, HubError>>,
    },

    /// Remove a participant bound to `connection_id`. Replies `true` if a
    /// member was removed.
    Leave {
        user_id: UserId,
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Forward an addressed signal to one member.
    Relay {
        from: UserId,
        to: UserId,
        signal: Signal,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Forward a chat message to every other member.
    Chat {
        from: UserId,
        message: String,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Get a snapshot of room state.
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// A room member as seen by the room actor.
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub connection: ConnectionHandle,
    pub joined_at: DateTime<Utc>,
}

/// Per-room settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomOptions {
    /// Participant limit (`None` = unlimited).
    pub max_participants: Option<usize>,
    /// Whether `chat` messages are relayed.
    pub chat_enabled: bool,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            max_participants: None,
            chat_enabled: true,
        }
    }
}

/// Addressed peer-to-peer negotiation payloads. Opaque to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: Value },
}

impl Signal {
    /// Build the message delivered to the target.
    #[must_use]
    pub fn into_server_message(self, from_identity: UserId) -> ServerMessage {
        match self {
            Signal::Offer { sdp } => ServerMessage::Offer(RelayedDescription { from_identity, sdp }),
            Signal::Answer { sdp } => {
                ServerMessage::Answer(RelayedDescription { from_identity, sdp })
            }
            Signal::IceCandidate { candidate } => ServerMessage::IceCandidate(RelayedCandidate {
                from_identity,
                candidate,
            }),
        }
    }

    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::IceCandidate { .. } => "ice-candidate",
        }
    }
}

/// Snapshot of a room.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: RoomId,
    /// Members in join order.
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub options: RoomOptions,
}

/// Summary of a room held by the manager.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
    pub options: RoomOptions,
}

/// Manager status.
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub participant_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Membership and lifecycle events published on the hub's event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    RoomCreated { room_id: RoomId },
    ParticipantJoined { room_id: RoomId, user_id: UserId },
    ParticipantLeft { room_id: RoomId, user_id: UserId },
    RoomClosed { room_id: RoomId },
}
