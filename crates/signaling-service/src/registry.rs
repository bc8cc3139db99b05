//! Participant registry: identity bookkeeping across the hub.
//!
//! A concurrent map from identity to the connection serving it, shared by
//! every connection task. How identities collide depends on
//! [`IdentityScope`]:
//!
//! - `Room`: the key includes the room, so the same name may be online in
//!   two rooms at once
//! - `Global`: the key is the identity alone, so it may be online only once

use crate::actors::ConnectionHandle;
use crate::config::IdentityScope;
use crate::errors::HubError;

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, RoomId, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Registry key, scoped per [`IdentityScope`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    room_id: Option<RoomId>,
    user_id: UserId,
}

impl RegistryKey {
    /// Build the key for `user_id` joining `room_id` under `scope`.
    #[must_use]
    pub fn new(scope: IdentityScope, room_id: &RoomId, user_id: &UserId) -> Self {
        let room_id = match scope {
            IdentityScope::Room => Some(room_id.clone()),
            IdentityScope::Global => None,
        };
        Self {
            room_id,
            user_id: user_id.clone(),
        }
    }
}

/// An online identity.
#[derive(Debug, Clone)]
pub struct Registration {
    pub connection_id: ConnectionId,
    pub connection: ConnectionHandle,
    pub room_id: RoomId,
    pub registered_at: DateTime<Utc>,
}

/// Concurrent identity registry.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    entries: DashMap<RegistryKey, Registration>,
}

impl ParticipantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity.
    ///
    /// # Errors
    ///
    /// Returns `HubError::DuplicateIdentity` if the key is already taken.
    pub fn register(&self, key: RegistryKey, registration: Registration) -> Result<(), HubError> {
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                debug!(
                    target: "sig.registry",
                    user_id = %occupied.key().user_id,
                    existing_connection = %occupied.get().connection_id,
                    "Identity already registered"
                );
                Err(HubError::DuplicateIdentity(occupied.key().user_id.clone()))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(registration);
                Ok(())
            }
        }
    }

    /// Remove an identity. No-op if absent.
    pub fn unregister(&self, key: &RegistryKey) {
        self.entries.remove(key);
    }

    /// Remove an identity only if it is held by `connection_id`.
    ///
    /// Returns true if an entry was removed.
    pub fn unregister_connection(&self, key: &RegistryKey, connection_id: ConnectionId) -> bool {
        self.entries
            .remove_if(key, |_, registration| {
                registration.connection_id == connection_id
            })
            .is_some()
    }

    /// Look up an online identity.
    ///
    /// # Errors
    ///
    /// Returns `HubError::ParticipantNotFound` if the key is not registered.
    pub fn lookup(&self, key: &RegistryKey) -> Result<Registration, HubError> {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HubError::ParticipantNotFound(key.user_id.clone()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identities currently online, with the room each is in.
    #[must_use]
    pub fn online_identities(&self) -> Vec<(UserId, RoomId)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().user_id.clone(), entry.value().room_id.clone()))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::{self, ConnectionSettings};
    use crate::actors::ActorMetrics;
    use crate::transport::memory;
    use tokio_util::sync::CancellationToken;

    fn registration(room: &str) -> Registration {
        let (transport, _peer) = memory::channel(4);
        let connection_id = ConnectionId::new();
        let (connection, _inbound, _writer) = connection::spawn(
            connection_id,
            transport,
            ConnectionSettings::default(),
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        Registration {
            connection_id,
            connection,
            room_id: RoomId::from(room),
            registered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_room_scope_allows_same_name_in_two_rooms() {
        let registry = ParticipantRegistry::new();
        let alice = UserId::from("Alice");

        let key_a = RegistryKey::new(IdentityScope::Room, &RoomId::from("a"), &alice);
        let key_b = RegistryKey::new(IdentityScope::Room, &RoomId::from("b"), &alice);

        registry.register(key_a, registration("a")).unwrap();
        registry.register(key_b, registration("b")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_global_scope_rejects_second_registration() {
        let registry = ParticipantRegistry::new();
        let alice = UserId::from("Alice");

        let key_a = RegistryKey::new(IdentityScope::Global, &RoomId::from("a"), &alice);
        let key_b = RegistryKey::new(IdentityScope::Global, &RoomId::from("b"), &alice);

        registry.register(key_a, registration("a")).unwrap();
        let result = registry.register(key_b, registration("b"));
        assert!(matches!(result, Err(HubError::DuplicateIdentity(u)) if u.as_str() == "Alice"));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ParticipantRegistry::new();
        let key = RegistryKey::new(IdentityScope::Room, &RoomId::from("a"), &UserId::from("Alice"));

        registry.register(key.clone(), registration("a")).unwrap();
        registry.unregister(&key);
        registry.unregister(&key);

        assert!(registry.is_empty());
        assert!(matches!(
            registry.lookup(&key),
            Err(HubError::ParticipantNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unregister_connection_ignores_newer_owner() {
        let registry = ParticipantRegistry::new();
        let key = RegistryKey::new(IdentityScope::Global, &RoomId::from("a"), &UserId::from("Alice"));

        let old = registration("a");
        let old_connection = old.connection_id;
        registry.register(key.clone(), old).unwrap();
        registry.unregister(&key);

        let newer = registration("b");
        let newer_connection = newer.connection_id;
        registry.register(key.clone(), newer).unwrap();

        // Stale cleanup from the old connection must not evict the new one.
        assert!(!registry.unregister_connection(&key, old_connection));
        assert_eq!(registry.lookup(&key).unwrap().connection_id, newer_connection);

        assert!(registry.unregister_connection(&key, newer_connection));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_online_identities() {
        let registry = ParticipantRegistry::new();
        let key = RegistryKey::new(IdentityScope::Room, &RoomId::from("a"), &UserId::from("Alice"));
        registry.register(key, registration("a")).unwrap();

        assert_eq!(
            registry.online_identities(),
            vec![(UserId::from("Alice"), RoomId::from("a"))]
        );
    }
}
