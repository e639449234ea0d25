//! Signaling Service Library
//!
//! Core functionality for the room-presence and signal-relay service:
//!
//! - Room membership tracking with presence broadcasts
//! - Opaque WebRTC negotiation payload relay between room members
//! - Bounded per-connection outbound queues with a non-blocking
//!   overflow policy
//! - Lazy room creation and grace-window eviction of empty rooms
//!
//! # Architecture
//!
//! The service uses an actor model hierarchy:
//!
//! ```text
//! RoomDirectoryActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns the member map and lifecycle phase
//!         └── delivers through ConnectionActors (one per WebSocket)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One room per connection**: joining a second room force-leaves the
//!   first; a user with two tabs has two connections and two member slots
//! - **Count is cardinality**: the participant count is always derived
//!   from the member map, never tracked separately
//! - **Generations**: rooms carry a generation so a stale expiry notice
//!   can never remove a freshly recreated room under the same id
//! - **Advisory metadata**: the external metadata store receives
//!   fire-and-forget snapshots and never sits on a presence or relay path
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`coordinator`] - Join/leave/disconnect/relay orchestration
//! - [`registry`] - Live connections and their room binding
//! - [`protocol`] - JSON wire protocol for the WebSocket channel
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire-level error codes

pub mod actors;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod metadata;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod transport;
