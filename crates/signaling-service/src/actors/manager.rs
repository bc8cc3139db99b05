//! `RoomManagerActor` - singleton supervisor for room actors.
//!
//! The `RoomManagerActor` owns the room namespace:
//!
//! - Singleton per hub
//! - Creates rooms on demand, or up front via `create_room`
//! - Removes a room when it reports itself empty
//! - Owns the root `CancellationToken`; every room gets a child token
//! - Monitors room actor health (panic detection via `JoinHandle`)
//!
//! Handlers never await a room, so the manager is never held up by room
//! I/O, and rooms never wait on the manager for a reply.
//!
//! # Graceful Shutdown
//!
//! On `shutdown(deadline)` the manager:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (every room closes its members)
//! 3. Waits up to `deadline` for room tasks to finish
//! 4. Replies to the caller

use crate::errors::HubError;

use super::messages::{ManagerMessage, ManagerStatus, RoomEvent, RoomInfo, RoomOptions};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomContext, RoomHandle};

use chrono::{DateTime, Utc};
use common::types::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the manager mailbox.
const MANAGER_CHANNEL_BUFFER: usize = 1000;

/// How often room tasks are checked for unexpected exits.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on waiting for a removed room's task in the background.
const ROOM_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shutdown deadline used when the root token is cancelled directly.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Settings for the room manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Hub instance ID, for logs.
    pub instance_id: String,
    /// Upper bound on open rooms.
    pub max_rooms: usize,
    /// Options for rooms created on join.
    pub default_room_options: RoomOptions,
}

/// Handle to the `RoomManagerActor`.
///
/// This is the public interface for interacting with the manager.
/// All methods are async and return results via oneshot channels.
#[derive(Clone, Debug)]
pub struct RoomManagerHandle {
    sender: mpsc::Sender<ManagerMessage>,
    cancel_token: CancellationToken,
}

impl RoomManagerHandle {
    /// Create a new `RoomManagerActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        settings: ManagerSettings,
        metrics: Arc<ActorMetrics>,
        events: broadcast::Sender<RoomEvent>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(MANAGER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let context = RoomContext {
            manager: sender.downgrade(),
            metrics,
            events,
        };

        let actor = RoomManagerActor::new(settings, receiver, cancel_token.clone(), context);
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Resolve `room_id`, creating an empty room with default options if it
    /// is unknown.
    pub async fn get_or_create(&self, room_id: RoomId) -> Result<RoomHandle, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::GetOrCreate {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| self.send_error(&e))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Resolve an existing room.
    pub async fn get_if_exists(&self, room_id: RoomId) -> Result<RoomHandle, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::GetIfExists {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| self.send_error(&e))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Pre-register a room with explicit options.
    ///
    /// The room stays open while empty until its first member leaves.
    pub async fn create_room(
        &self,
        room_id: RoomId,
        options: RoomOptions,
    ) -> Result<RoomHandle, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::CreateRoom {
                room_id,
                options,
                respond_to: tx,
            })
            .await
            .map_err(|e| self.send_error(&e))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Summary of a room, or `None` if it does not exist.
    pub async fn room_info(&self, room_id: RoomId) -> Result<Option<RoomInfo>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::GetRoomInfo {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| self.send_error(&e))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the current manager status.
    pub async fn get_status(&self) -> Result<ManagerStatus, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| self.send_error(&e))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting rooms, close every room, and wait up to `deadline`
    /// for room tasks to finish.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| self.send_error(&e))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    fn send_error<T>(&self, e: &mpsc::error::SendError<T>) -> HubError {
        if self.cancel_token.is_cancelled() {
            HubError::Draining
        } else {
            HubError::Internal(format!("channel send failed: {e}"))
        }
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    /// Handle to the room actor.
    handle: RoomHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    created_at: DateTime<Utc>,
    options: RoomOptions,
}

/// The `RoomManagerActor` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct RoomManagerActor {
    settings: ManagerSettings,
    receiver: mpsc::Receiver<ManagerMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, ManagedRoom>,
    /// Whether the manager is accepting new rooms.
    accepting_new: bool,
    /// Instance counter; successive rooms under one ID never share a value.
    next_room_instance: u64,
    context: RoomContext,
    mailbox: MailboxMonitor,
    shutdown_deadline: Duration,
    shutdown_waiter: Option<oneshot::Sender<Result<(), HubError>>>,
}

impl RoomManagerActor {
    fn new(
        settings: ManagerSettings,
        receiver: mpsc::Receiver<ManagerMessage>,
        cancel_token: CancellationToken,
        context: RoomContext,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Manager, settings.instance_id.clone());

        Self {
            settings,
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            accepting_new: true,
            next_room_instance: 1,
            context,
            mailbox,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            shutdown_waiter: None,
        }
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "sig.actor.manager",
        fields(instance_id = %self.settings.instance_id)
    )]
    async fn run(mut self) {
        info!(
            target: "sig.actor.manager",
            instance_id = %self.settings.instance_id,
            max_rooms = self.settings.max_rooms,
            "RoomManagerActor started"
        );

        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sig.actor.manager",
                        instance_id = %self.settings.instance_id,
                        "RoomManagerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Check for terminated room actors
                _ = health_check.tick() => {
                    self.check_room_health().await;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            self.handle_message(message);
                            self.context.metrics.record_message_processed();
                        }
                        None => {
                            // Channel closed, exit
                            info!(
                                target: "sig.actor.manager",
                                instance_id = %self.settings.instance_id,
                                "RoomManagerActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        if let Some(waiter) = self.shutdown_waiter.take() {
            let _ = waiter.send(Ok(()));
        }

        info!(
            target: "sig.actor.manager",
            instance_id = %self.settings.instance_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomManagerActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: ManagerMessage) {
        match message {
            ManagerMessage::GetOrCreate {
                room_id,
                respond_to,
            } => {
                let result = self.get_or_create(room_id);
                let _ = respond_to.send(result);
            }

            ManagerMessage::GetIfExists {
                room_id,
                respond_to,
            } => {
                let result = self.get_if_exists(&room_id);
                let _ = respond_to.send(result);
            }

            ManagerMessage::CreateRoom {
                room_id,
                options,
                respond_to,
            } => {
                let result = self.create_room(room_id, options);
                let _ = respond_to.send(result);
            }

            ManagerMessage::GetRoomInfo {
                room_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.room_info(&room_id));
            }

            ManagerMessage::RoomEmpty {
                room_id,
                instance_id,
            } => {
                self.handle_room_empty(&room_id, instance_id);
            }

            ManagerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ManagerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.initiate_shutdown(deadline, respond_to);
            }
        }
    }

    fn get_or_create(&mut self, room_id: RoomId) -> Result<RoomHandle, HubError> {
        if !self.accepting_new {
            return Err(HubError::Draining);
        }

        if let Some(managed) = self.rooms.get(&room_id) {
            return Ok(managed.handle.clone());
        }

        let options = self.settings.default_room_options;
        self.spawn_room(room_id, options, false)
    }

    fn get_if_exists(&self, room_id: &RoomId) -> Result<RoomHandle, HubError> {
        if !self.accepting_new {
            return Err(HubError::Draining);
        }

        self.rooms
            .get(room_id)
            .map(|managed| managed.handle.clone())
            .ok_or_else(|| HubError::RoomNotFound(room_id.clone()))
    }

    fn create_room(&mut self, room_id: RoomId, options: RoomOptions) -> Result<RoomHandle, HubError> {
        if !self.accepting_new {
            return Err(HubError::Draining);
        }

        if self.rooms.contains_key(&room_id) {
            return Err(HubError::Conflict("Room already exists".to_string()));
        }

        self.spawn_room(room_id, options, true)
    }

    fn spawn_room(
        &mut self,
        room_id: RoomId,
        options: RoomOptions,
        retain_while_empty: bool,
    ) -> Result<RoomHandle, HubError> {
        if self.rooms.len() >= self.settings.max_rooms {
            warn!(
                target: "sig.actor.manager",
                instance_id = %self.settings.instance_id,
                max_rooms = self.settings.max_rooms,
                "Room limit reached, rejecting new room"
            );
            return Err(HubError::ServerAtCapacity);
        }

        let instance_id = self.next_room_instance;
        self.next_room_instance += 1;

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            instance_id,
            options,
            retain_while_empty,
            self.cancel_token.child_token(),
            self.context.clone(),
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                created_at: Utc::now(),
                options,
            },
        );

        self.context.metrics.room_created();
        let _ = self.context.events.send(RoomEvent::RoomCreated {
            room_id: room_id.clone(),
        });

        info!(
            target: "sig.actor.manager",
            instance_id = %self.settings.instance_id,
            room_id = %room_id,
            room_instance = instance_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    fn room_info(&self, room_id: &RoomId) -> Option<RoomInfo> {
        self.rooms.get(room_id).map(|managed| RoomInfo {
            room_id: room_id.clone(),
            member_count: managed.handle.member_count(),
            created_at: managed.created_at,
            options: managed.options,
        })
    }

    /// Remove a room that reported itself empty, unless it has already been
    /// replaced by a newer instance.
    fn handle_room_empty(&mut self, room_id: &RoomId, instance_id: u64) {
        let is_current = self
            .rooms
            .get(room_id)
            .is_some_and(|managed| managed.handle.instance_id() == instance_id);

        if !is_current {
            debug!(
                target: "sig.actor.manager",
                instance_id = %self.settings.instance_id,
                room_id = %room_id,
                room_instance = instance_id,
                "Ignoring empty notice for stale room instance"
            );
            return;
        }

        if let Some(managed) = self.rooms.remove(room_id) {
            // Don't block the message loop on the room task
            let manager_id = self.settings.instance_id.clone();
            let room_id_owned = room_id.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(ROOM_CLEANUP_TIMEOUT, managed.task_handle).await {
                    Ok(Ok(())) => {
                        debug!(
                            target: "sig.actor.manager",
                            instance_id = %manager_id,
                            room_id = %room_id_owned,
                            "Room actor task completed cleanly"
                        );
                    }
                    Ok(Err(e)) => {
                        warn!(
                            target: "sig.actor.manager",
                            instance_id = %manager_id,
                            room_id = %room_id_owned,
                            error = ?e,
                            "Room actor task panicked during removal"
                        );
                    }
                    Err(_) => {
                        warn!(
                            target: "sig.actor.manager",
                            instance_id = %manager_id,
                            room_id = %room_id_owned,
                            "Room actor task cleanup timed out"
                        );
                    }
                }
            });

            self.room_closed(room_id);
        }
    }

    /// Bookkeeping for a room leaving the map.
    fn room_closed(&self, room_id: &RoomId) {
        self.context.metrics.room_removed();
        let _ = self.context.events.send(RoomEvent::RoomClosed {
            room_id: room_id.clone(),
        });

        info!(
            target: "sig.actor.manager",
            instance_id = %self.settings.instance_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor removed"
        );
    }

    /// Get current manager status.
    fn get_status(&self) -> ManagerStatus {
        ManagerStatus {
            room_count: self.rooms.len(),
            connection_count: self.context.metrics.connection_count(),
            participant_count: self.context.metrics.participant_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Initiate graceful shutdown. The reply is sent once rooms have drained.
    fn initiate_shutdown(
        &mut self,
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    ) {
        info!(
            target: "sig.actor.manager",
            instance_id = %self.settings.instance_id,
            room_count = self.rooms.len(),
            deadline_secs = deadline.as_secs(),
            "Initiating graceful shutdown"
        );

        // Stop accepting new rooms
        self.accepting_new = false;
        self.shutdown_deadline = deadline;
        self.shutdown_waiter = Some(respond_to);

        // Cancel the root token (propagates to all rooms)
        self.cancel_token.cancel();
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "sig.actor.manager",
            instance_id = %self.settings.instance_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;
        self.receiver.close();

        // Cancel all room actors (already done via parent token, but be explicit)
        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        let deadline = Instant::now() + self.shutdown_deadline;
        let rooms: Vec<(RoomId, ManagedRoom)> = self.rooms.drain().collect();
        for (room_id, managed) in rooms {
            match tokio::time::timeout_at(deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sig.actor.manager",
                        instance_id = %self.settings.instance_id,
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sig.actor.manager",
                        instance_id = %self.settings.instance_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sig.actor.manager",
                        instance_id = %self.settings.instance_id,
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.room_closed(&room_id);
        }

        // Answer anything that raced the shutdown
        while let Ok(message) = self.receiver.try_recv() {
            self.reject_while_draining(message);
        }

        info!(
            target: "sig.actor.manager",
            instance_id = %self.settings.instance_id,
            "Graceful shutdown complete"
        );
    }

    fn reject_while_draining(&self, message: ManagerMessage) {
        match message {
            ManagerMessage::GetOrCreate { respond_to, .. }
            | ManagerMessage::GetIfExists { respond_to, .. }
            | ManagerMessage::CreateRoom { respond_to, .. } => {
                let _ = respond_to.send(Err(HubError::Draining));
            }
            ManagerMessage::GetRoomInfo { respond_to, .. } => {
                let _ = respond_to.send(None);
            }
            ManagerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }
            ManagerMessage::Shutdown { respond_to, .. } => {
                let _ = respond_to.send(Ok(()));
            }
            ManagerMessage::RoomEmpty { .. } => {}
        }
    }

    /// Check health of managed room actors.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };

            // Check if it was a panic
            match managed.task_handle.await {
                Ok(()) => {
                    // Retired; its empty notice is still queued
                    debug!(
                        target: "sig.actor.manager",
                        instance_id = %self.settings.instance_id,
                        room_id = %room_id,
                        "Room actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "sig.actor.manager",
                            instance_id = %self.settings.instance_id,
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked - triggering investigation"
                        );
                        self.context.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            self.room_closed(&room_id);
        }
    }
}
