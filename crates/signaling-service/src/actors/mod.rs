//! Actor hierarchy for the signaling engine.
//!
//! ```text
//! RoomDirectoryActor (singleton)
//! └── RoomActor (one per active room)
//!     └── delivers through ConnectionActor (one per connection)
//! ```
//!
//! Cancellation flows down the same tree: cancelling the directory token
//! cancels every room, and cancelling a room cancels nothing outside it -
//! connection actors are owned by the transport layer and only borrowed
//! by rooms for delivery.

pub mod connection;
pub mod directory;
pub mod messages;
pub mod metrics;
pub mod room;

pub use connection::{ConnectionActor, ConnectionHandle, DeliveryError, DeliverySink, SinkClosed};
pub use directory::{DirectoryHandle, RoomDirectoryActor};
pub use messages::{DirectoryStatus, MemberInfo, RoomLifecycle, RoomSnapshot};
pub use metrics::ServiceMetrics;
pub use room::{RoomActor, RoomHandle};
