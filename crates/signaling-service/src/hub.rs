//! Signaling hub: the per-connection state machine.
//!
//! Every client connection runs one task that reads its inbound messages
//! and drives a small state machine:
//!
//! ```text
//! Connected --join--> Joined --leave--> Connected
//!     |                  |
//!     +---- closed ------+--> Closed
//! ```
//!
//! - `Connected`: transport open, no room
//! - `Joined`: bound to one room under one identity
//! - `Closed`: terminal; room membership and registry entry released
//!
//! Bad input from one client is answered with an `error` message to that
//! client only. Transport loss, idle timeout and forced close all run the
//! same cleanup as an explicit `leave`, exactly once.

use crate::actors::connection::{self, ConnectionHandle, ConnectionSettings, Inbound, ReceiveError};
use crate::actors::{
    ActorMetrics, ActorType, ManagerSettings, ManagerStatus, Participant, RoomEvent, RoomHandle,
    RoomInfo, RoomManagerHandle, RoomOptions, Signal,
};
use crate::config::{Config, IdentityScope, RoomPolicy};
use crate::errors::HubError;
use crate::observability::metrics as prom;
use crate::registry::{ParticipantRegistry, RegistryKey, Registration};
use crate::transport::Transport;

use chrono::Utc;
use common::types::{ConnectionId, RoomId, UserId};
use signaling_protocol::{ClientMessage, JoinRequest, Left, ServerMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Attempts to join when the resolved room retires underneath the caller.
const MAX_JOIN_ATTEMPTS: usize = 3;

/// Capacity of the membership event feed.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Bound on flushing a connection's queued messages after cleanup.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for connections to drain on shutdown.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Hub policy and limits.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub instance_id: String,
    pub identity_scope: IdentityScope,
    pub room_policy: RoomPolicy,
    /// Options for rooms created on join.
    pub default_room_options: RoomOptions,
    pub max_rooms: usize,
    pub connection: ConnectionSettings,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            instance_id: crate::config::DEFAULT_INSTANCE_ID_PREFIX.to_string(),
            identity_scope: IdentityScope::default(),
            room_policy: RoomPolicy::default(),
            default_room_options: RoomOptions::default(),
            max_rooms: crate::config::DEFAULT_MAX_ROOMS,
            connection: ConnectionSettings::default(),
        }
    }
}

impl From<&Config> for HubConfig {
    fn from(config: &Config) -> Self {
        Self {
            instance_id: config.instance_id.clone(),
            identity_scope: config.identity_scope,
            room_policy: config.room_policy,
            default_room_options: RoomOptions {
                max_participants: config.max_participants,
                chat_enabled: config.chat_enabled,
            },
            max_rooms: config.max_rooms,
            connection: ConnectionSettings {
                outbound_buffer: config.outbound_buffer,
                idle_timeout: config.idle_timeout(),
            },
        }
    }
}

/// The signaling hub. Cheap to clone; all clones share one hub.
#[derive(Clone, Debug)]
pub struct SignalingHub {
    inner: Arc<HubInner>,
}

#[derive(Debug)]
struct HubInner {
    config: HubConfig,
    manager: RoomManagerHandle,
    registry: ParticipantRegistry,
    metrics: Arc<ActorMetrics>,
    events: broadcast::Sender<RoomEvent>,
    /// Parent of every connection token; cancelled on shutdown.
    connections_token: CancellationToken,
    accepting: AtomicBool,
}

impl SignalingHub {
    /// Create a hub and spawn its room manager.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        let metrics = ActorMetrics::new();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let manager = RoomManagerHandle::new(
            ManagerSettings {
                instance_id: config.instance_id.clone(),
                max_rooms: config.max_rooms,
                default_room_options: config.default_room_options,
            },
            Arc::clone(&metrics),
            events.clone(),
        );

        info!(
            target: "sig.hub",
            instance_id = %config.instance_id,
            identity_scope = ?config.identity_scope,
            room_policy = ?config.room_policy,
            "Signaling hub created"
        );

        Self {
            inner: Arc::new(HubInner {
                config,
                manager,
                registry: ParticipantRegistry::new(),
                metrics,
                events,
                connections_token: CancellationToken::new(),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Serve one client until it disconnects.
    ///
    /// `injected_identity` is the identity vouched for by the boundary layer,
    /// if the deployment injects identities. Returns once the connection is
    /// closed and all of its state has been released.
    pub async fn serve_connection(&self, transport: Transport, injected_identity: Option<UserId>) {
        let connection_id = ConnectionId::new();
        let accepting = self.is_accepting();

        // A connection refused during shutdown still needs a live writer to
        // deliver its error before closing.
        let token = if accepting {
            self.inner.connections_token.child_token()
        } else {
            CancellationToken::new()
        };

        let (handle, inbound, writer) = connection::spawn(
            connection_id,
            transport,
            self.inner.config.connection,
            token,
            Arc::clone(&self.inner.metrics),
        );
        self.inner.metrics.connection_opened();

        let mut session = ConnectionSession {
            hub: self,
            connection_id,
            connection: handle,
            injected_identity,
            state: SessionState::Connected,
        };

        let close_reason = if accepting {
            session.run(inbound).await
        } else {
            session.report(&HubError::Draining);
            "server_shutting_down"
        };

        session.close().await;
        drop(session);

        // Every handle is gone now; let the writer flush and send close.
        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
            Ok(Ok(())) => {}
            Ok(Err(join_error)) => {
                error!(
                    target: "sig.hub",
                    connection_id = %connection_id,
                    error = %join_error,
                    "Connection writer task failed"
                );
                if join_error.is_panic() {
                    self.inner.metrics.record_panic(ActorType::Connection);
                }
            }
            Err(_) => {
                warn!(
                    target: "sig.hub",
                    connection_id = %connection_id,
                    "Connection writer did not finish in time"
                );
            }
        }

        self.inner.metrics.connection_closed();
        prom::record_connection_closed(close_reason);

        debug!(
            target: "sig.hub",
            connection_id = %connection_id,
            reason = close_reason,
            "Connection closed"
        );
    }

    /// Pre-register a room with explicit options.
    ///
    /// # Errors
    ///
    /// - `InvalidRoomId` if the ID is empty or malformed
    /// - `Conflict` if the room exists
    /// - `ServerAtCapacity` / `Draining` if no room can be created
    pub async fn create_room(
        &self,
        room_id: RoomId,
        options: RoomOptions,
    ) -> Result<RoomInfo, HubError> {
        validate_room_id(&room_id)?;

        self.inner
            .manager
            .create_room(room_id.clone(), options)
            .await?;

        self.inner
            .manager
            .room_info(room_id.clone())
            .await?
            .ok_or(HubError::RoomNotFound(room_id))
    }

    /// Summary of a room, or `None` if no such room is open.
    ///
    /// # Errors
    ///
    /// Returns `Draining` once the hub has shut down.
    pub async fn room_info(&self, room_id: RoomId) -> Result<Option<RoomInfo>, HubError> {
        self.inner.manager.room_info(room_id).await
    }

    /// Current member count of a room, or `None` if no such room is open.
    ///
    /// # Errors
    ///
    /// Returns `Draining` once the hub has shut down.
    pub async fn room_member_count(&self, room_id: RoomId) -> Result<Option<usize>, HubError> {
        Ok(self
            .room_info(room_id)
            .await?
            .map(|info| info.member_count))
    }

    /// Look up the connection serving an identity.
    ///
    /// # Errors
    ///
    /// Returns `ParticipantNotFound` if the identity is not online there.
    pub fn lookup_participant(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<Registration, HubError> {
        let key = RegistryKey::new(self.inner.config.identity_scope, room_id, user_id);
        self.inner.registry.lookup(&key)
    }

    /// Identities currently online, with their rooms.
    #[must_use]
    pub fn online_identities(&self) -> Vec<(UserId, RoomId)> {
        self.inner.registry.online_identities()
    }

    /// Subscribe to membership and room lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<RoomEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of rooms, connections and participants.
    ///
    /// # Errors
    ///
    /// Returns `Draining` once the hub has shut down.
    pub async fn status(&self) -> Result<ManagerStatus, HubError> {
        self.inner.manager.get_status().await
    }

    /// Number of actor tasks (rooms and connection writers) that panicked.
    #[must_use]
    pub fn actor_panic_count(&self) -> u64 {
        self.inner.metrics.panic_count()
    }

    /// Whether new connections are served.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting connections and rooms, close every connection, and
    /// wait up to `deadline` for all connection tasks to clean up.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the room manager could not be reached.
    #[instrument(skip_all, name = "sig.hub.shutdown")]
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), HubError> {
        self.inner.accepting.store(false, Ordering::Release);
        let started = Instant::now();

        info!(
            target: "sig.hub",
            instance_id = %self.inner.config.instance_id,
            connections = self.inner.metrics.connection_count(),
            deadline_secs = deadline.as_secs(),
            "Shutting down signaling hub"
        );

        // Rooms close their members; then catch connections not in a room.
        let result = match self.inner.manager.shutdown(deadline).await {
            Err(HubError::Draining) => Ok(()),
            other => other,
        };
        self.inner.connections_token.cancel();

        let metrics = Arc::clone(&self.inner.metrics);
        let remaining = deadline.saturating_sub(started.elapsed());
        let drained = tokio::time::timeout(remaining, async move {
            while metrics.connection_count() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                target: "sig.hub",
                connections = self.inner.metrics.connection_count(),
                "Shutdown deadline reached with connections still open"
            );
        } else {
            info!(target: "sig.hub", "Signaling hub shut down");
        }

        result
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug)]
enum SessionState {
    Connected,
    Joined {
        room: RoomHandle,
        user_id: UserId,
        key: RegistryKey,
    },
    Closed,
}

/// Per-connection state machine.
struct ConnectionSession<'a> {
    hub: &'a SignalingHub,
    connection_id: ConnectionId,
    connection: ConnectionHandle,
    injected_identity: Option<UserId>,
    state: SessionState,
}

impl ConnectionSession<'_> {
    /// Read and dispatch messages until the connection ends. Returns the
    /// close reason label.
    #[instrument(skip_all, name = "sig.hub.connection", fields(connection_id = %self.connection_id))]
    async fn run(&mut self, mut inbound: Inbound) -> &'static str {
        debug!(
            target: "sig.hub",
            connection_id = %self.connection_id,
            "Connection opened"
        );

        loop {
            let Some(item) = inbound.receive().await else {
                return "client_closed";
            };

            match item {
                Ok(message) => {
                    let message_type = message.message_type();
                    prom::record_message(message_type);
                    let started = Instant::now();
                    let result = self.handle_message(message).await;
                    prom::record_message_latency(message_type, started.elapsed());

                    if let Err(e) = result {
                        self.report(&e);
                        if e.is_fatal() {
                            return match e {
                                HubError::ConnectionClosed => "force_closed",
                                _ => "internal_error",
                            };
                        }
                    }
                }
                Err(ReceiveError::Malformed(e)) => {
                    self.report(&HubError::Protocol(e));
                }
                Err(e) => {
                    debug!(
                        target: "sig.hub",
                        connection_id = %self.connection_id,
                        error = %e,
                        "Connection ended"
                    );
                    return e.close_reason();
                }
            }
        }
    }

    async fn handle_message(&mut self, message: ClientMessage) -> Result<(), HubError> {
        match message {
            ClientMessage::Join(request) => self.handle_join(request).await,
            ClientMessage::Leave => self.leave_room(true).await,
            ClientMessage::Offer(description) => {
                self.relay(
                    description.target_id,
                    Signal::Offer {
                        sdp: description.sdp,
                    },
                )
                .await
            }
            ClientMessage::Answer(description) => {
                self.relay(
                    description.target_id,
                    Signal::Answer {
                        sdp: description.sdp,
                    },
                )
                .await
            }
            ClientMessage::IceCandidate(candidate) => {
                self.relay(
                    candidate.target_id,
                    Signal::IceCandidate {
                        candidate: candidate.candidate,
                    },
                )
                .await
            }
            ClientMessage::Chat(chat) => self.chat(chat.message).await,
            ClientMessage::Ping => self.connection.send(ServerMessage::Pong),
        }
    }

    async fn handle_join(&mut self, request: JoinRequest) -> Result<(), HubError> {
        if !matches!(self.state, SessionState::Connected) {
            return Err(HubError::AlreadyInRoom);
        }

        let user_id = self.resolve_identity(request.user_id)?;
        let room_id = request.room_id;
        validate_room_id(&room_id)?;

        let hub = &self.hub.inner;
        let scope = hub.config.identity_scope;
        let key = RegistryKey::new(scope, &room_id, &user_id);
        let registration = Registration {
            connection_id: self.connection_id,
            connection: self.connection.clone(),
            room_id: room_id.clone(),
            registered_at: Utc::now(),
        };

        // Global identities are claimed before entering any room.
        if scope == IdentityScope::Global {
            hub.registry.register(key.clone(), registration.clone())?;
        }

        let participant = Participant {
            user_id: user_id.clone(),
            connection_id: self.connection_id,
            connection: self.connection.clone(),
            joined_at: Utc::now(),
        };

        let (room, members) = match self.enter_room(&room_id, participant).await {
            Ok(joined) => joined,
            Err(e) => {
                if scope == IdentityScope::Global {
                    hub.registry.unregister_connection(&key, self.connection_id);
                }
                return Err(e);
            }
        };

        if scope == IdentityScope::Room {
            if let Err(e) = hub.registry.register(key.clone(), registration) {
                // The room admitted the identity, so the registry should not hold it.
                error!(
                    target: "sig.hub",
                    connection_id = %self.connection_id,
                    room_id = %room_id,
                    user_id = %user_id,
                    error = %e,
                    "Registry out of sync with room membership"
                );
                if let Err(rollback) = room
                    .remove_participant(user_id.clone(), self.connection_id)
                    .await
                {
                    warn!(
                        target: "sig.hub",
                        connection_id = %self.connection_id,
                        room_id = %room_id,
                        user_id = %user_id,
                        error = %rollback,
                        "Failed to roll back room membership"
                    );
                }
                return Err(HubError::Internal(
                    "registry out of sync with room membership".to_string(),
                ));
            }
        }

        info!(
            target: "sig.hub",
            connection_id = %self.connection_id,
            room_id = %room_id,
            user_id = %user_id,
            existing_members = members.len(),
            "Joined room"
        );

        self.state = SessionState::Joined { room, user_id, key };
        Ok(())
    }

    /// Resolve the room per policy and add the participant, retrying when
    /// the resolved room retires before the join lands.
    async fn enter_room(
        &self,
        room_id: &RoomId,
        participant: Participant,
    ) -> Result<(RoomHandle, Vec<UserId>), HubError> {
        let hub = &self.hub.inner;
        let mut attempt = 1;

        loop {
            let room = match hub.config.room_policy {
                RoomPolicy::CreateOnJoin => hub.manager.get_or_create(room_id.clone()).await?,
                RoomPolicy::ExistingOnly => hub.manager.get_if_exists(room_id.clone()).await?,
            };

            match room.add_participant(participant.clone()).await {
                Ok(members) => return Ok((room, members)),
                Err(HubError::RoomRetired) if attempt < MAX_JOIN_ATTEMPTS => {
                    debug!(
                        target: "sig.hub",
                        connection_id = %self.connection_id,
                        room_id = %room_id,
                        attempt = attempt,
                        "Room retired during join, resolving again"
                    );
                    attempt += 1;
                }
                Err(HubError::RoomRetired) => {
                    warn!(
                        target: "sig.hub",
                        connection_id = %self.connection_id,
                        room_id = %room_id,
                        attempts = attempt,
                        "Room kept retiring during join, refusing"
                    );
                    return Err(HubError::ServerAtCapacity);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn resolve_identity(&self, claimed: Option<UserId>) -> Result<UserId, HubError> {
        let user_id = match (&self.injected_identity, claimed) {
            (Some(injected), Some(claimed)) if &claimed != injected => {
                return Err(HubError::IdentityMismatch);
            }
            (Some(injected), _) => injected.clone(),
            (None, Some(claimed)) => claimed,
            (None, None) => {
                return Err(HubError::InvalidIdentity("userId is required".to_string()));
            }
        };

        if !user_id.is_valid() {
            return Err(HubError::InvalidIdentity(
                "userId must be 1-128 characters without control characters or surrounding whitespace"
                    .to_string(),
            ));
        }

        Ok(user_id)
    }

    /// Leave the current room. An explicit leave is acknowledged with `left`.
    async fn leave_room(&mut self, explicit: bool) -> Result<(), HubError> {
        let (room, user_id, key) = match std::mem::replace(&mut self.state, SessionState::Connected)
        {
            SessionState::Joined { room, user_id, key } => (room, user_id, key),
            other => {
                self.state = other;
                return Err(HubError::NotInRoom);
            }
        };

        // Release the identity before the room so a stale entry never
        // outlives membership.
        self.hub
            .inner
            .registry
            .unregister_connection(&key, self.connection_id);

        match room
            .remove_participant(user_id.clone(), self.connection_id)
            .await
        {
            Ok(_) => {}
            Err(HubError::RoomRetired) => {
                // Closed by shutdown or supervision; nothing left to remove.
                debug!(
                    target: "sig.hub",
                    connection_id = %self.connection_id,
                    room_id = %room.room_id(),
                    "Room already gone on leave"
                );
            }
            Err(e) => {
                warn!(
                    target: "sig.hub",
                    connection_id = %self.connection_id,
                    room_id = %room.room_id(),
                    error = %e,
                    "Failed to leave room"
                );
            }
        }

        info!(
            target: "sig.hub",
            connection_id = %self.connection_id,
            room_id = %room.room_id(),
            user_id = %user_id,
            explicit = explicit,
            "Left room"
        );

        if explicit {
            self.connection.send(ServerMessage::Left(Left {
                room_id: room.room_id().clone(),
            }))?;
        }

        Ok(())
    }

    async fn relay(&self, target: UserId, signal: Signal) -> Result<(), HubError> {
        let SessionState::Joined { room, user_id, .. } = &self.state else {
            return Err(HubError::NotInRoom);
        };

        room.relay(user_id.clone(), target, signal).await
    }

    async fn chat(&self, message: String) -> Result<(), HubError> {
        let SessionState::Joined { room, user_id, .. } = &self.state else {
            return Err(HubError::NotInRoom);
        };

        room.chat(user_id.clone(), message).await
    }

    /// Tell the client about an error. Never fails.
    fn report(&self, e: &HubError) {
        prom::record_error(e.reason().as_str());

        if e.is_fatal() {
            error!(
                target: "sig.hub",
                connection_id = %self.connection_id,
                error = %e,
                "Closing connection after internal error"
            );
        } else {
            debug!(
                target: "sig.hub",
                connection_id = %self.connection_id,
                reason = e.reason().as_str(),
                error = %e,
                "Request rejected"
            );
        }

        let _ = self.connection.send(e.to_server_message());
    }

    /// Release room membership and registry entry. Runs once; later calls
    /// are no-ops.
    async fn close(&mut self) {
        if matches!(self.state, SessionState::Joined { .. }) {
            let _ = self.leave_room(false).await;
        }
        self.state = SessionState::Closed;
    }
}

fn validate_room_id(room_id: &RoomId) -> Result<(), HubError> {
    if room_id.is_valid() {
        Ok(())
    } else {
        Err(HubError::InvalidRoomId(
            "roomId must be 1-128 characters without control characters or surrounding whitespace"
                .to_string(),
        ))
    }
}
