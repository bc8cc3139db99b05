//! Switchboard Signaling Service Library
//!
//! This library provides the core of the Switchboard signaling hub, which
//! lets browser clients find each other inside a named room and exchange
//! the WebRTC control messages they need to connect peer-to-peer:
//!
//! - Room membership with per-room capacity and identity uniqueness
//! - Addressed relay of `offer`, `answer` and `ice_candidate` messages
//! - Optional room chat
//! - Idle timeouts and bounded per-connection outbound queues
//! - Graceful shutdown that drains every room and connection
//!
//! # Architecture
//!
//! ```text
//! SignalingHub (one per process)
//! ├── ParticipantRegistry (who is online, keyed by identity scope)
//! ├── RoomManagerActor (room namespace)
//! │   └── RoomActor (one per open room)
//! └── connection task (one per client)
//!     └── ConnectionHandle -> outbound writer
//! ```
//!
//! The hub never parses HTTP; [`routes`] upgrades `/ws` requests and hands
//! the resulting [`transport::Transport`] to [`hub::SignalingHub::serve_connection`].
//!
//! # Modules
//!
//! - [`actors`] - Room manager, room and connection actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire reasons and HTTP status codes
//! - [`hub`] - Per-connection state machine and the hub's public surface
//! - [`registry`] - Concurrent identity registry
//! - [`routes`] - Axum router: WebSocket upgrade, room API, health, metrics
//! - [`transport`] - Frame transport over WebSocket or in-memory channels
//! - [`observability`] - Metrics and health endpoints

#![warn(clippy::pedantic)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod hub;
pub mod observability;
pub mod registry;
pub mod routes;
pub mod transport;
