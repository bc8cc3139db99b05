//! Signaling wire protocol for Switchboard.
//!
//! Clients and the server exchange UTF-8 JSON objects of the form
//! `{"type": "...", "payload": {...}}`. This crate defines the typed
//! messages for both directions and the codec that validates frames at the
//! transport boundary, so the rest of the service only ever handles
//! well-formed [`ClientMessage`] values.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;

pub use codec::{
    decode_client_message, decode_server_message, encode_client_message, encode_server_message,
    ProtocolError, MAX_MESSAGE_SIZE,
};
pub use message::*;
