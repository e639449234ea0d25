//! WebSocket transport layer: authentication and the socket lifecycle.

pub mod auth;
pub mod ws;

pub use ws::{ws_router, TransportState};
