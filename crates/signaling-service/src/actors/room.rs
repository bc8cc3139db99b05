//! `RoomActor` - per-room actor that owns membership and fan-out.
//!
//! Each `RoomActor`:
//! - Owns the member list for one room, in join order
//! - Serializes every join, leave, relay and chat for that room
//! - Delivers to members with the non-blocking `ConnectionHandle::send`, so
//!   a slow client never stalls the room
//!
//! # Retirement
//!
//! When the last member leaves (or a join on a still-empty room is
//! rejected) the room:
//! 1. Enqueues `RoomEmpty` on the manager mailbox
//! 2. Closes its own mailbox
//! 3. Answers every request already queued (`Join` gets `RoomRetired`)
//! 4. Exits
//!
//! Because step 1 happens before step 2, a caller that sees `RoomRetired`
//! and asks the manager again is served after the removal and gets a
//! fresh room.

use crate::errors::HubError;

use super::messages::{
    ManagerMessage, Participant, RoomEvent, RoomMessage, RoomOptions, RoomState, Signal,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, RoomId, UserId};
use signaling_protocol::{Joined, RelayedChat, ServerMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Handle to a `RoomActor`.
///
/// A send failure means the room has retired; callers resolve the room
/// again through the manager.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    room_id: RoomId,
    instance_id: u64,
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    member_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Distinguishes successive rooms created under the same ID.
    #[must_use]
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Current member count, readable without a round-trip to the actor.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.member_count.load(Ordering::Acquire)
    }

    /// Add a participant. On success the participant has been sent
    /// `joined`, the other members `user-joined`, and the existing members
    /// are returned in join order.
    pub async fn add_participant(&self, participant: Participant) -> Result<Vec<UserId>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                participant,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::RoomRetired)?;

        rx.await.map_err(|_| HubError::RoomRetired)?
    }

    /// Remove the participant bound to `connection_id`.
    ///
    /// Returns `Ok(false)` if no such member was present.
    pub async fn remove_participant(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<bool, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Leave {
                user_id,
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::RoomRetired)?;

        rx.await.map_err(|_| HubError::RoomRetired)
    }

    /// Forward `signal` from one member to another.
    pub async fn relay(&self, from: UserId, to: UserId, signal: Signal) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Relay {
                from,
                to,
                signal,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::RoomRetired)?;

        rx.await.map_err(|_| HubError::RoomRetired)?
    }

    /// Forward a chat message to every other member.
    pub async fn chat(&self, from: UserId, message: String) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Chat {
                from,
                message,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::RoomRetired)?;

        rx.await.map_err(|_| HubError::RoomRetired)?
    }

    /// Get a snapshot of the room.
    pub async fn get_state(&self) -> Result<RoomState, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| HubError::RoomRetired)?;

        rx.await.map_err(|_| HubError::RoomRetired)
    }

    /// Cancel the room actor. Every member connection is closed.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// Collaborators shared by every room.
#[derive(Clone, Debug)]
pub struct RoomContext {
    /// Manager mailbox. Weak so that rooms never keep the manager alive.
    pub manager: mpsc::WeakSender<ManagerMessage>,
    pub metrics: Arc<ActorMetrics>,
    pub events: broadcast::Sender<RoomEvent>,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    instance_id: u64,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    /// Members in join order.
    participants: Vec<Participant>,
    options: RoomOptions,
    created_at: DateTime<Utc>,
    /// Keep a pre-registered room alive until its first member arrives.
    retain_while_empty: bool,
    member_count: Arc<AtomicUsize>,
    context: RoomContext,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: RoomId,
        instance_id: u64,
        options: RoomOptions,
        retain_while_empty: bool,
        cancel_token: CancellationToken,
        context: RoomContext,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let member_count = Arc::new(AtomicUsize::new(0));

        let actor = Self {
            room_id: room_id.clone(),
            instance_id,
            receiver,
            cancel_token: cancel_token.clone(),
            participants: Vec::new(),
            options,
            created_at: Utc::now(),
            retain_while_empty,
            member_count: Arc::clone(&member_count),
            context,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            room_id,
            instance_id,
            sender,
            cancel_token,
            member_count,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "sig.actor.room",
        fields(room_id = %self.room_id, instance_id = self.instance_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            instance_id = self.instance_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sig.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            let now_empty = self.handle_message(message);
                            self.context.metrics.record_message_processed();

                            if now_empty && !self.retain_while_empty {
                                self.retire().await;
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "sig.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            instance_id = self.instance_id,
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message. Returns true if the room is empty after a
    /// membership change.
    fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::Join {
                participant,
                respond_to,
            } => {
                let result = self.handle_join(participant);
                let rejected = result.is_err();
                let _ = respond_to.send(result);
                rejected && self.participants.is_empty()
            }

            RoomMessage::Leave {
                user_id,
                connection_id,
                respond_to,
            } => {
                let removed = self.handle_leave(&user_id, connection_id);
                let _ = respond_to.send(removed);
                removed && self.participants.is_empty()
            }

            RoomMessage::Relay {
                from,
                to,
                signal,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_relay(from, &to, signal));
                false
            }

            RoomMessage::Chat {
                from,
                message,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_chat(from, message));
                false
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
                false
            }
        }
    }

    fn handle_join(&mut self, participant: Participant) -> Result<Vec<UserId>, HubError> {
        if let Some(max) = self.options.max_participants {
            if self.participants.len() >= max {
                debug!(
                    target: "sig.actor.room",
                    room_id = %self.room_id,
                    user_id = %participant.user_id,
                    max_participants = max,
                    "Join rejected: room full"
                );
                return Err(HubError::RoomFull(self.room_id.clone()));
            }
        }

        if self.is_member(&participant.user_id) {
            return Err(HubError::DuplicateUserInRoom(participant.user_id));
        }

        let members = self.member_ids();

        // The joiner hears `joined` before anything a peer sends in reaction
        // to `user-joined`.
        let joined = ServerMessage::Joined(Joined {
            room_id: self.room_id.clone(),
            user_id: participant.user_id.clone(),
            members: members.clone(),
        });
        if let Err(e) = participant.connection.send(joined) {
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                user_id = %participant.user_id,
                error = %e,
                "Joining connection already closed"
            );
        }

        self.broadcast(
            &participant.user_id,
            &ServerMessage::user_joined(participant.user_id.clone()),
        );

        let user_id = participant.user_id.clone();
        self.participants.push(participant);
        self.retain_while_empty = false;
        self.member_count
            .store(self.participants.len(), Ordering::Release);
        self.context.metrics.participant_joined();
        let _ = self.context.events.send(RoomEvent::ParticipantJoined {
            room_id: self.room_id.clone(),
            user_id: user_id.clone(),
        });

        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            user_id = %user_id,
            members = self.participants.len(),
            "Participant joined"
        );

        Ok(members)
    }

    fn handle_leave(&mut self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        let Some(position) = self
            .participants
            .iter()
            .position(|p| &p.user_id == user_id && p.connection_id == connection_id)
        else {
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                user_id = %user_id,
                "Leave ignored: not a member on this connection"
            );
            return false;
        };

        let participant = self.participants.remove(position);
        self.member_count
            .store(self.participants.len(), Ordering::Release);
        self.context.metrics.participant_left();

        self.broadcast(user_id, &ServerMessage::user_left(user_id.clone()));

        let _ = self.context.events.send(RoomEvent::ParticipantLeft {
            room_id: self.room_id.clone(),
            user_id: user_id.clone(),
        });

        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            user_id = %user_id,
            members = self.participants.len(),
            duration_secs = (Utc::now() - participant.joined_at).num_seconds(),
            "Participant left"
        );

        true
    }

    fn handle_relay(&self, from: UserId, to: &UserId, signal: Signal) -> Result<(), HubError> {
        if !self.is_member(&from) {
            return Err(HubError::NotInRoom);
        }

        let target = self
            .participants
            .iter()
            .find(|p| &p.user_id == to)
            .ok_or_else(|| HubError::TargetNotInRoom(to.clone()))?;

        let message_type = signal.message_type();
        if let Err(e) = target
            .connection
            .send(signal.into_server_message(from.clone()))
        {
            // The target is being torn down; its own cleanup removes it.
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                from = %from,
                to = %to,
                message_type = message_type,
                error = %e,
                "Relay target connection closed"
            );
        }

        Ok(())
    }

    fn handle_chat(&self, from: UserId, message: String) -> Result<(), HubError> {
        if !self.options.chat_enabled {
            return Err(HubError::ChatDisabled);
        }
        if !self.is_member(&from) {
            return Err(HubError::NotInRoom);
        }

        let chat = ServerMessage::Chat(RelayedChat {
            from_identity: from.clone(),
            message,
        });
        self.broadcast(&from, &chat);

        Ok(())
    }

    fn get_state(&self) -> RoomState {
        RoomState {
            room_id: self.room_id.clone(),
            members: self.member_ids(),
            created_at: self.created_at,
            options: self.options,
        }
    }

    /// Send `message` to every member except `except`.
    fn broadcast(&self, except: &UserId, message: &ServerMessage) {
        for participant in &self.participants {
            if &participant.user_id == except {
                continue;
            }
            if let Err(e) = participant.connection.send(message.clone()) {
                debug!(
                    target: "sig.actor.room",
                    room_id = %self.room_id,
                    user_id = %participant.user_id,
                    message_type = message.message_type(),
                    error = %e,
                    "Broadcast skipped closed connection"
                );
            }
        }
    }

    fn is_member(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user_id == user_id)
    }

    fn member_ids(&self) -> Vec<UserId> {
        self.participants.iter().map(|p| p.user_id.clone()).collect()
    }

    /// Hand the room back to the manager and answer whatever is queued.
    async fn retire(&mut self) {
        if let Some(manager) = self.context.manager.upgrade() {
            let notice = ManagerMessage::RoomEmpty {
                room_id: self.room_id.clone(),
                instance_id: self.instance_id,
            };
            if manager.send(notice).await.is_err() {
                debug!(
                    target: "sig.actor.room",
                    room_id = %self.room_id,
                    "Manager gone, retiring without notice"
                );
            }
        }

        self.receiver.close();

        let mut drained = 0usize;
        while let Some(message) = self.receiver.recv().await {
            drained += 1;
            match message {
                RoomMessage::Join { respond_to, .. } => {
                    let _ = respond_to.send(Err(HubError::RoomRetired));
                }
                RoomMessage::Leave { respond_to, .. } => {
                    let _ = respond_to.send(false);
                }
                RoomMessage::Relay { respond_to, .. } | RoomMessage::Chat { respond_to, .. } => {
                    let _ = respond_to.send(Err(HubError::NotInRoom));
                }
                RoomMessage::GetState { respond_to } => {
                    let _ = respond_to.send(self.get_state());
                }
            }
        }

        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            instance_id = self.instance_id,
            drained_requests = drained,
            "Room empty, retired"
        );
    }

    /// Close every member connection. Their connection tasks run the
    /// usual disconnect cleanup.
    fn graceful_shutdown(&mut self) {
        if !self.participants.is_empty() {
            warn!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                participants = self.participants.len(),
                "Closing member connections on shutdown"
            );
        }

        for participant in self.participants.drain(..) {
            participant.connection.close();
            self.context.metrics.participant_left();
            let _ = self.context.events.send(RoomEvent::ParticipantLeft {
                room_id: self.room_id.clone(),
                user_id: participant.user_id,
            });
        }
        self.member_count.store(0, Ordering::Release);
        self.receiver.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::{self, ConnectionHandle, ConnectionSettings};
    use crate::transport::memory::{self, MemoryPeer};
    use crate::transport::Frame;
    use serde_json::json;
    use signaling_protocol::{decode_server_message, RelayedDescription};
    use std::time::Duration;

    struct TestRoom {
        handle: RoomHandle,
        task: JoinHandle<()>,
        manager_rx: mpsc::Receiver<ManagerMessage>,
        // Keeps the weak manager sender upgradable.
        _manager_tx: mpsc::Sender<ManagerMessage>,
        metrics: Arc<ActorMetrics>,
        events: broadcast::Receiver<RoomEvent>,
    }

    fn spawn_room(options: RoomOptions, retain_while_empty: bool) -> TestRoom {
        let (manager_tx, manager_rx) = mpsc::channel(8);
        let (events_tx, events) = broadcast::channel(64);
        let metrics = ActorMetrics::new();
        let context = RoomContext {
            manager: manager_tx.downgrade(),
            metrics: Arc::clone(&metrics),
            events: events_tx,
        };
        let (handle, task) = RoomActor::spawn(
            RoomId::from("room_1"),
            1,
            options,
            retain_while_empty,
            CancellationToken::new(),
            context,
        );
        TestRoom {
            handle,
            task,
            manager_rx,
            _manager_tx: manager_tx,
            metrics,
            events,
        }
    }

    struct Member {
        participant: Participant,
        handle: ConnectionHandle,
        peer: MemoryPeer,
    }

    fn member(name: &str) -> Member {
        let (transport, peer) = memory::channel(32);
        let connection_id = ConnectionId::new();
        let (handle, _inbound, _writer) = connection::spawn(
            connection_id,
            transport,
            ConnectionSettings::default(),
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        Member {
            participant: Participant {
                user_id: UserId::from(name),
                connection_id,
                connection: handle.clone(),
                joined_at: Utc::now(),
            },
            handle,
            peer,
        }
    }

    async fn next(peer: &mut MemoryPeer) -> ServerMessage {
        let frame = tokio::time::timeout(Duration::from_secs(5), peer.recv_frame())
            .await
            .unwrap();
        match frame {
            Some(Frame::Text(text)) => decode_server_message(&text).unwrap(),
            other => unreachable!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_sends_joined_and_notifies_others() {
        let room = spawn_room(RoomOptions::default(), false);
        let mut alice = member("Alice");
        let mut bob = member("Bob");

        let members = room
            .handle
            .add_participant(alice.participant.clone())
            .await
            .unwrap();
        assert!(members.is_empty());
        assert!(matches!(next(&mut alice.peer).await, ServerMessage::Joined(j) if j.members.is_empty()));

        let members = room
            .handle
            .add_participant(bob.participant.clone())
            .await
            .unwrap();
        assert_eq!(members, vec![UserId::from("Alice")]);
        assert!(matches!(
            next(&mut bob.peer).await,
            ServerMessage::Joined(j) if j.members == vec![UserId::from("Alice")]
        ));
        assert_eq!(
            next(&mut alice.peer).await,
            ServerMessage::user_joined(UserId::from("Bob"))
        );

        assert_eq!(room.handle.member_count(), 2);
        assert_eq!(room.metrics.participant_count(), 2);
    }

    #[tokio::test]
    async fn test_members_listed_in_join_order() {
        let room = spawn_room(RoomOptions::default(), false);
        for name in ["Carol", "Alice", "Bob"] {
            room.handle
                .add_participant(member(name).participant)
                .await
                .unwrap();
        }

        let state = room.handle.get_state().await.unwrap();
        assert_eq!(
            state.members,
            vec![
                UserId::from("Carol"),
                UserId::from("Alice"),
                UserId::from("Bob")
            ]
        );
    }

    #[tokio::test]
    async fn test_room_full() {
        let options = RoomOptions {
            max_participants: Some(1),
            chat_enabled: true,
        };
        let room = spawn_room(options, false);
        let alice = member("Alice");
        let bob = member("Bob");

        room.handle.add_participant(alice.participant).await.unwrap();
        let result = room.handle.add_participant(bob.participant).await;

        assert!(matches!(result, Err(HubError::RoomFull(_))));
        assert_eq!(room.handle.member_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let room = spawn_room(RoomOptions::default(), false);
        room.handle
            .add_participant(member("Alice").participant)
            .await
            .unwrap();

        let result = room
            .handle
            .add_participant(member("Alice").participant)
            .await;
        assert!(matches!(result, Err(HubError::DuplicateUserInRoom(u)) if u.as_str() == "Alice"));
    }

    #[tokio::test]
    async fn test_relay_reaches_only_target() {
        let room = spawn_room(RoomOptions::default(), false);
        let mut alice = member("Alice");
        let mut bob = member("Bob");
        let mut carol = member("Carol");
        for m in [&alice, &bob, &carol] {
            room.handle
                .add_participant(m.participant.clone())
                .await
                .unwrap();
        }
        // Drain membership traffic
        next(&mut alice.peer).await;
        next(&mut alice.peer).await;
        next(&mut alice.peer).await;
        next(&mut bob.peer).await;
        next(&mut bob.peer).await;
        next(&mut carol.peer).await;

        room.handle
            .relay(
                UserId::from("Bob"),
                UserId::from("Alice"),
                Signal::Offer {
                    sdp: "X".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            next(&mut alice.peer).await,
            ServerMessage::Offer(RelayedDescription {
                from_identity: UserId::from("Bob"),
                sdp: "X".to_string(),
            })
        );
        assert!(carol.peer.try_recv_frame().is_none());
        assert!(bob.peer.try_recv_frame().is_none());
    }

    #[tokio::test]
    async fn test_relay_preserves_candidate_payload() {
        let room = spawn_room(RoomOptions::default(), false);
        let mut alice = member("Alice");
        let bob = member("Bob");
        room.handle
            .add_participant(alice.participant.clone())
            .await
            .unwrap();
        room.handle
            .add_participant(bob.participant.clone())
            .await
            .unwrap();
        next(&mut alice.peer).await;
        next(&mut alice.peer).await;

        let candidate = json!({"candidate": "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host", "sdpMLineIndex": 0});
        room.handle
            .relay(
                UserId::from("Bob"),
                UserId::from("Alice"),
                Signal::IceCandidate {
                    candidate: candidate.clone(),
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            next(&mut alice.peer).await,
            ServerMessage::IceCandidate(c) if c.candidate == candidate
        ));
    }

    #[tokio::test]
    async fn test_relay_errors() {
        let room = spawn_room(RoomOptions::default(), false);
        room.handle
            .add_participant(member("Alice").participant)
            .await
            .unwrap();

        let absent_target = room
            .handle
            .relay(
                UserId::from("Alice"),
                UserId::from("Carol"),
                Signal::Answer {
                    sdp: "Y".to_string(),
                },
            )
            .await;
        assert!(matches!(absent_target, Err(HubError::TargetNotInRoom(u)) if u.as_str() == "Carol"));

        let outsider = room
            .handle
            .relay(
                UserId::from("Mallory"),
                UserId::from("Alice"),
                Signal::Answer {
                    sdp: "Y".to_string(),
                },
            )
            .await;
        assert!(matches!(outsider, Err(HubError::NotInRoom)));
    }

    #[tokio::test]
    async fn test_chat_broadcast_and_disabled() {
        let room = spawn_room(RoomOptions::default(), false);
        let mut alice = member("Alice");
        let mut bob = member("Bob");
        room.handle
            .add_participant(alice.participant.clone())
            .await
            .unwrap();
        room.handle
            .add_participant(bob.participant.clone())
            .await
            .unwrap();
        next(&mut alice.peer).await;
        next(&mut alice.peer).await;
        next(&mut bob.peer).await;

        room.handle
            .chat(UserId::from("Alice"), "hi".to_string())
            .await
            .unwrap();
        assert_eq!(
            next(&mut bob.peer).await,
            ServerMessage::Chat(RelayedChat {
                from_identity: UserId::from("Alice"),
                message: "hi".to_string(),
            })
        );
        assert!(alice.peer.try_recv_frame().is_none());

        let quiet = spawn_room(
            RoomOptions {
                max_participants: None,
                chat_enabled: false,
            },
            false,
        );
        quiet
            .handle
            .add_participant(member("Alice").participant)
            .await
            .unwrap();
        let result = quiet.handle.chat(UserId::from("Alice"), "hi".to_string()).await;
        assert!(matches!(result, Err(HubError::ChatDisabled)));
    }

    #[tokio::test]
    async fn test_leave_notifies_and_is_idempotent() {
        let room = spawn_room(RoomOptions::default(), false);
        let mut alice = member("Alice");
        let bob = member("Bob");
        room.handle
            .add_participant(alice.participant.clone())
            .await
            .unwrap();
        room.handle
            .add_participant(bob.participant.clone())
            .await
            .unwrap();
        next(&mut alice.peer).await;
        next(&mut alice.peer).await;

        let removed = room
            .handle
            .remove_participant(UserId::from("Bob"), bob.participant.connection_id)
            .await
            .unwrap();
        assert!(removed);
        assert_eq!(
            next(&mut alice.peer).await,
            ServerMessage::user_left(UserId::from("Bob"))
        );

        let removed_again = room
            .handle
            .remove_participant(UserId::from("Bob"), bob.participant.connection_id)
            .await
            .unwrap();
        assert!(!removed_again);
        assert_eq!(room.handle.member_count(), 1);
    }

    #[tokio::test]
    async fn test_leave_from_other_connection_is_ignored() {
        let room = spawn_room(RoomOptions::default(), false);
        let alice = member("Alice");
        room.handle
            .add_participant(alice.participant.clone())
            .await
            .unwrap();

        let removed = room
            .handle
            .remove_participant(UserId::from("Alice"), ConnectionId::new())
            .await
            .unwrap();
        assert!(!removed);
        assert_eq!(room.handle.member_count(), 1);
    }

    #[tokio::test]
    async fn test_last_leave_retires_room() {
        let mut room = spawn_room(RoomOptions::default(), false);
        let alice = member("Alice");
        room.handle
            .add_participant(alice.participant.clone())
            .await
            .unwrap();

        room.handle
            .remove_participant(UserId::from("Alice"), alice.participant.connection_id)
            .await
            .unwrap();

        let notice = room.manager_rx.recv().await.unwrap();
        assert!(matches!(
            notice,
            ManagerMessage::RoomEmpty { ref room_id, instance_id: 1 } if room_id.as_str() == "room_1"
        ));

        tokio::time::timeout(Duration::from_secs(5), room.task)
            .await
            .unwrap()
            .unwrap();

        // Requests after retirement fail so the caller re-resolves the room.
        let result = room.handle.add_participant(member("Bob").participant).await;
        assert!(matches!(result, Err(HubError::RoomRetired)));
    }

    #[tokio::test]
    async fn test_rejected_join_on_empty_room_retires() {
        let options = RoomOptions {
            max_participants: Some(0),
            chat_enabled: true,
        };
        let mut room = spawn_room(options, false);

        let result = room.handle.add_participant(member("Alice").participant).await;
        assert!(matches!(result, Err(HubError::RoomFull(_))));
        assert!(matches!(
            room.manager_rx.recv().await,
            Some(ManagerMessage::RoomEmpty { .. })
        ));
    }

    #[tokio::test]
    async fn test_pre_registered_room_survives_until_first_leave() {
        let options = RoomOptions {
            max_participants: Some(0),
            chat_enabled: true,
        };
        let mut room = spawn_room(options, true);

        // Rejected join on a retained empty room keeps it open.
        let result = room.handle.add_participant(member("Alice").participant).await;
        assert!(matches!(result, Err(HubError::RoomFull(_))));
        assert!(room.manager_rx.try_recv().is_err());
        assert!(room.handle.get_state().await.is_ok());

        let mut open = spawn_room(RoomOptions::default(), true);
        let alice = member("Alice");
        open.handle
            .add_participant(alice.participant.clone())
            .await
            .unwrap();
        open.handle
            .remove_participant(UserId::from("Alice"), alice.participant.connection_id)
            .await
            .unwrap();
        assert!(matches!(
            open.manager_rx.recv().await,
            Some(ManagerMessage::RoomEmpty { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_closes_member_connections() {
        let room = spawn_room(RoomOptions::default(), false);
        let alice = member("Alice");
        room.handle
            .add_participant(alice.participant.clone())
            .await
            .unwrap();

        room.handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), room.task)
            .await
            .unwrap()
            .unwrap();

        assert!(alice.handle.is_closed());
        assert_eq!(room.metrics.participant_count(), 0);
    }

    #[tokio::test]
    async fn test_membership_events_published() {
        let mut room = spawn_room(RoomOptions::default(), false);
        let alice = member("Alice");
        room.handle
            .add_participant(alice.participant.clone())
            .await
            .unwrap();
        room.handle
            .remove_participant(UserId::from("Alice"), alice.participant.connection_id)
            .await
            .unwrap();

        assert_eq!(
            room.events.recv().await.unwrap(),
            RoomEvent::ParticipantJoined {
                room_id: RoomId::from("room_1"),
                user_id: UserId::from("Alice"),
            }
        );
        assert_eq!(
            room.events.recv().await.unwrap(),
            RoomEvent::ParticipantLeft {
                room_id: RoomId::from("room_1"),
                user_id: UserId::from("Alice"),
            }
        );
    }
}
