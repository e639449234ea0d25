//! Connection registry - live transport sessions and their room binding.
//!
//! The registry is a plain mutex-guarded map: every operation is a short
//! lookup or insert, and the lock is never held across an await point.
//! Room membership itself lives in the room actors; the registry only
//! records which room a connection is currently bound to, which the
//! coordinator uses to enforce the at-most-one-room rule and to clean up
//! on disconnect.

use crate::actors::connection::ConnectionHandle;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// One registered connection.
#[derive(Debug, Clone)]
struct ConnectionEntry {
    connection: ConnectionHandle,
    /// Room this connection is currently a member of, if any.
    room_id: Option<String>,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<HashMap<String, ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// Create a new shared registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, ConnectionEntry>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a connection. Returns false if the id is already taken.
    pub fn register(&self, connection: ConnectionHandle) -> bool {
        let mut map = self.guard();
        let connection_id = connection.connection_id().to_string();
        if map.contains_key(&connection_id) {
            return false;
        }

        debug!(
            target: "sg.registry",
            connection_id = %connection_id,
            user_id = %connection.user_id(),
            "Connection registered"
        );
        map.insert(
            connection_id,
            ConnectionEntry {
                connection,
                room_id: None,
            },
        );
        true
    }

    /// Remove a connection, returning its handle if it was present.
    pub fn deregister(&self, connection_id: &str) -> Option<ConnectionHandle> {
        let entry = self.guard().remove(connection_id)?;
        debug!(
            target: "sg.registry",
            connection_id = %connection_id,
            "Connection deregistered"
        );
        Some(entry.connection)
    }

    /// Get the handle for a registered connection.
    pub fn connection(&self, connection_id: &str) -> Option<ConnectionHandle> {
        self.guard()
            .get(connection_id)
            .map(|entry| entry.connection.clone())
    }

    /// Bind a connection to a room. Returns false if the connection is
    /// not registered.
    pub fn bind_room(&self, connection_id: &str, room_id: &str) -> bool {
        let mut map = self.guard();
        let Some(entry) = map.get_mut(connection_id) else {
            return false;
        };
        entry.room_id = Some(room_id.to_string());
        true
    }

    /// Clear a connection's room binding, but only if it still points at
    /// `room_id`. A binding replaced by a newer join is left alone.
    pub fn clear_room(&self, connection_id: &str, room_id: &str) {
        let mut map = self.guard();
        if let Some(entry) = map.get_mut(connection_id) {
            if entry.room_id.as_deref() == Some(room_id) {
                entry.room_id = None;
            }
        }
    }

    /// Room the connection is currently bound to.
    pub fn current_room(&self, connection_id: &str) -> Option<String> {
        self.guard().get(connection_id)?.room_id.clone()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}
