//! Common data types for Switchboard components.
//!
//! Room and user identifiers are opaque strings supplied by the systems
//! that create rooms and authenticate users. Connection identifiers are
//! generated by the signaling service for each transport connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length, in bytes, of a room or user identifier.
pub const MAX_ID_LEN: usize = 128;

/// Returns true if `value` is usable as an opaque identifier.
///
/// Identifiers must be non-empty, at most [`MAX_ID_LEN`] bytes, and free of
/// control characters. Surrounding whitespace is rejected rather than trimmed
/// so that two clients never disagree about the same name.
fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_ID_LEN
        && value.trim() == value
        && !value.chars().any(char::is_control)
}

/// Unique identifier for a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap an opaque room identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the identifier against the length and character rules.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_identifier(&self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity of a participant, unique within a room at any instant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an opaque user identity.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the identity against the length and character rules.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_identifier(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique identifier for a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
