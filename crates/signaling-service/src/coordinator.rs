//! Presence coordinator - orchestrates joins, leaves, disconnects, and
//! signal relay across the registry and the room directory.
//!
//! The coordinator owns no state of its own; it is a cheap-to-clone facade
//! the transport layer calls into. Per-room consistency comes from the
//! room actors, the at-most-one-room rule comes from the registry binding,
//! and the coordinator stitches the two together.
//!
//! # Rejoin after expiry
//!
//! A join can race a room's eviction: the directory hands out a handle
//! whose actor is already exiting. The room sends its expiry notice to the
//! directory before dropping its mailbox, so by the time a caller observes
//! the closed channel the removal is already queued ahead of any retry.
//! One retry through `get_or_create` therefore always lands on a fresh
//! room.

use crate::actors::connection::ConnectionHandle;
use crate::actors::directory::DirectoryHandle;
use crate::actors::metrics::ServiceMetrics;
use crate::actors::room::RoomHandle;
use crate::errors::SignalingError;
use crate::metadata::MetadataNotifier;
use crate::registry::ConnectionRegistry;

use serde_json::value::RawValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Coordinator facade over the registry and the actor tree.
#[derive(Clone)]
pub struct SignalingCoordinator {
    registry: Arc<ConnectionRegistry>,
    directory: DirectoryHandle,
    notifier: MetadataNotifier,
    metrics: Arc<ServiceMetrics>,
}

impl SignalingCoordinator {
    /// Create a new coordinator.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: DirectoryHandle,
        notifier: MetadataNotifier,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            registry,
            directory,
            notifier,
            metrics,
        }
    }

    /// Register a freshly accepted connection.
    pub fn register_connection(&self, connection: ConnectionHandle) -> Result<(), SignalingError> {
        let connection_id = connection.connection_id().to_string();
        if !self.registry.register(connection) {
            return Err(SignalingError::Internal(format!(
                "duplicate connection id: {connection_id}"
            )));
        }
        self.metrics.connection_registered();
        Ok(())
    }

    /// Join a room, creating it if needed. Replies with the member count.
    ///
    /// A connection already bound to a different room is force-left from
    /// it first, so a connection is a member of at most one room. Joining
    /// the room it is already in is an idempotent no-op.
    pub async fn handle_join(
        &self,
        connection_id: &str,
        room_id: &str,
    ) -> Result<usize, SignalingError> {
        let connection = self.registry.connection(connection_id).ok_or_else(|| {
            SignalingError::Internal(format!("connection not registered: {connection_id}"))
        })?;

        if let Some(current) = self.registry.current_room(connection_id) {
            if current != room_id {
                debug!(
                    target: "sg.coordinator",
                    connection_id = %connection_id,
                    from_room = %current,
                    to_room = %room_id,
                    "Force-leaving previous room before join"
                );
                self.leave_quiet(connection_id, &current).await;
            }
        }

        let count = match self.try_join(connection_id, &connection, room_id).await {
            Err(SignalingError::RoomClosed) => {
                debug!(
                    target: "sg.coordinator",
                    connection_id = %connection_id,
                    room_id = %room_id,
                    "Room expired under join, retrying"
                );
                self.try_join(connection_id, &connection, room_id).await?
            }
            other => other?,
        };

        self.registry.bind_room(connection_id, room_id);
        self.notifier.count_changed(room_id, count);

        info!(
            target: "sg.coordinator",
            connection_id = %connection_id,
            room_id = %room_id,
            count = count,
            "Join handled"
        );
        Ok(count)
    }

    async fn try_join(
        &self,
        connection_id: &str,
        connection: &ConnectionHandle,
        room_id: &str,
    ) -> Result<usize, SignalingError> {
        let room = self.directory.get_or_create(room_id.to_string()).await?;
        match room
            .join(
                connection_id.to_string(),
                connection.user_id().to_string(),
                connection.clone(),
            )
            .await
        {
            // Already in this room: absorb as a no-op and report the
            // current count.
            Err(SignalingError::AlreadyMember(_)) => {
                let snapshot = room.get_state().await?;
                Ok(snapshot.members.len())
            }
            other => other,
        }
    }

    /// Leave a room explicitly. Replies with the remaining member count.
    pub async fn handle_leave(
        &self,
        connection_id: &str,
        room_id: &str,
    ) -> Result<usize, SignalingError> {
        let room = self
            .lookup_room(room_id)
            .await?
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))?;

        let result = room.leave(connection_id.to_string()).await;
        self.registry.clear_room(connection_id, room_id);

        let count = match result {
            // Expired mid-leave: the member is gone either way.
            Err(SignalingError::RoomClosed) => {
                return Err(SignalingError::RoomNotFound(room_id.to_string()));
            }
            other => other?,
        };

        self.notifier.count_changed(room_id, count);
        info!(
            target: "sg.coordinator",
            connection_id = %connection_id,
            room_id = %room_id,
            count = count,
            "Leave handled"
        );
        Ok(count)
    }

    /// Handle a dropped transport session.
    ///
    /// Invoked exactly once per connection by the transport layer, with or
    /// without a preceding explicit leave. Stops delivery, runs the leave
    /// path for any bound room, and deregisters.
    pub async fn handle_disconnect(&self, connection_id: &str) {
        let room_id = self.registry.current_room(connection_id);
        let Some(connection) = self.registry.deregister(connection_id) else {
            return;
        };
        connection.cancel();

        if let Some(room_id) = room_id {
            self.leave_quiet(connection_id, &room_id).await;
        }

        self.metrics.connection_closed();
        info!(
            target: "sg.coordinator",
            connection_id = %connection_id,
            "Disconnect handled"
        );
    }

    /// Relay an opaque payload to the other members of `room_id`.
    ///
    /// A nonexistent (or already evicted) room reports `RoomNotFound`
    /// before anything else. A connection relaying into an existing room it
    /// is not bound to gets an authorization error and nothing is
    /// delivered. The room actor re-verifies membership against its own
    /// map.
    pub async fn relay(
        &self,
        connection_id: &str,
        room_id: &str,
        payload: Box<RawValue>,
    ) -> Result<(), SignalingError> {
        let room = self
            .lookup_room(room_id)
            .await?
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))?;

        if self.registry.current_room(connection_id).as_deref() != Some(room_id) {
            return Err(SignalingError::Authorization(room_id.to_string()));
        }

        match room.relay(connection_id.to_string(), payload).await {
            Err(SignalingError::RoomClosed) => {
                Err(SignalingError::RoomNotFound(room_id.to_string()))
            }
            other => other,
        }
    }

    /// Leave with every idempotent condition absorbed. Used by the
    /// force-leave and disconnect paths, where the member may already be
    /// gone.
    async fn leave_quiet(&self, connection_id: &str, room_id: &str) {
        let room = match self.directory.lookup(room_id.to_string()).await {
            Ok(Some(room)) => room,
            Ok(None) | Err(_) => {
                self.registry.clear_room(connection_id, room_id);
                return;
            }
        };

        let result = room.leave(connection_id.to_string()).await;
        self.registry.clear_room(connection_id, room_id);

        match result {
            Ok(count) => self.notifier.count_changed(room_id, count),
            Err(e) if e.is_idempotent_noop() => {}
            Err(SignalingError::RoomClosed) => {}
            Err(e) => {
                warn!(
                    target: "sg.coordinator",
                    connection_id = %connection_id,
                    room_id = %room_id,
                    error = %e,
                    "Cleanup leave failed"
                );
            }
        }
    }

    async fn lookup_room(&self, room_id: &str) -> Result<Option<RoomHandle>, SignalingError> {
        self.directory.lookup(room_id.to_string()).await
    }

    /// Shared metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Directory handle, for health reporting and shutdown.
    #[must_use]
    pub fn directory(&self) -> &DirectoryHandle {
        &self.directory
    }

    /// Connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
