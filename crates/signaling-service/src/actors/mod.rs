//! Actor model implementation for the signaling hub.
//!
//! ```text
//! RoomManagerActor (singleton per hub)
//! └── supervises N RoomActors
//!     └── RoomActor (one per open room)
//!         ├── owns the member list
//!         └── fans out to each member's ConnectionHandle
//!
//! Connection (one per client transport)
//! ├── writer task: drains the bounded outbound queue into the transport
//! └── Inbound: read by the hub's connection task
//! ```
//!
//! # Key Design Decisions
//!
//! - **One room per connection**: a client is in at most one room at a time
//! - **CancellationToken propagation**: the manager owns the root token, rooms get child tokens
//! - **Non-blocking fan-out**: rooms deliver with `try_send`; a full queue force-closes that client
//! - **Message passing**: all inter-actor communication via `tokio::sync::mpsc` channels
//!
//! # Modules
//!
//! - [`manager`] - `RoomManagerActor` singleton that owns the room namespace
//! - [`room`] - `RoomActor` per open room, owns membership
//! - [`connection`] - per-client outbound writer and inbound reader
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod manager;
pub mod messages;
pub mod metrics;
pub mod room;

// Re-export primary types
pub use connection::{ConnectionHandle, ConnectionSettings, Inbound, ReceiveError};
pub use manager::{ManagerSettings, RoomManagerHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use room::{RoomActor, RoomHandle};
