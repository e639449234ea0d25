//! Message types for actor communication.
//!
//! All inter-actor communication is strongly-typed message passing over
//! `tokio::sync::mpsc`; request-reply uses `tokio::sync::oneshot`.

use crate::actors::connection::ConnectionHandle;
use crate::actors::room::RoomHandle;
use crate::errors::SignalingError;

use serde_json::value::RawValue;
use tokio::sync::oneshot;

/// Messages sent to the `RoomDirectoryActor`.
#[derive(Debug)]
pub enum DirectoryMessage {
    /// Look up a room, creating it (and spawning its actor) if absent.
    GetOrCreate {
        room_id: String,
        respond_to: oneshot::Sender<Result<RoomHandle, SignalingError>>,
    },

    /// Look up an existing room without creating one.
    Lookup {
        room_id: String,
        respond_to: oneshot::Sender<Option<RoomHandle>>,
    },

    /// A room's Draining grace window elapsed; its actor is exiting.
    /// The entry is removed only if `generation` matches, so a fresh room
    /// spawned under the same id survives a stale notice.
    RoomExpired { room_id: String, generation: u64 },

    /// Current directory status (for health/introspection).
    GetStatus {
        respond_to: oneshot::Sender<DirectoryStatus>,
    },
}

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A connection joins the room. Replies with the resulting member count.
    Join {
        connection_id: String,
        user_id: String,
        connection: ConnectionHandle,
        respond_to: oneshot::Sender<Result<usize, SignalingError>>,
    },

    /// A connection leaves the room. Replies with the remaining count.
    Leave {
        connection_id: String,
        respond_to: oneshot::Sender<Result<usize, SignalingError>>,
    },

    /// Fan an opaque payload out to every member except the sender.
    Relay {
        sender_connection_id: String,
        payload: Box<RawValue>,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// Snapshot of the room state (for tests/introspection).
    GetState {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// Directory status snapshot.
#[derive(Debug, Clone)]
pub struct DirectoryStatus {
    /// Rooms currently tracked (Active or Draining).
    pub room_count: usize,
    /// Whether the directory still accepts new rooms.
    pub accepting: bool,
}

/// Point-in-time snapshot of a room.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub generation: u64,
    pub lifecycle: RoomLifecycle,
    pub members: Vec<MemberInfo>,
    pub created_at: i64,
}

/// Externally visible lifecycle phase of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomLifecycle {
    /// Has at least one member.
    Active,
    /// Empty; eviction deadline armed.
    Draining,
}

/// One member of a room.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub connection_id: String,
    pub user_id: String,
}
