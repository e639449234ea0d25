//! Signaling service error types.
//!
//! Errors map to wire-level error codes sent back to the offending client
//! only. Internal details are logged server-side but never exposed.

use thiserror::Error;

/// Signaling service error type.
///
/// Wire code mapping:
/// - `Authorization`: `unauthorized`
/// - `AlreadyMember`: `already_member` (idempotent, normally absorbed)
/// - `NotMember`: `not_member` (idempotent, normally absorbed)
/// - `RoomNotFound`, `RoomClosed`: `room_not_found`
/// - `Backpressure`: `backpressure`
/// - `ShuttingDown`: `unavailable`
/// - `Internal`: `internal`
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The connection is not authorized to operate on the room.
    #[error("not authorized for room {0}")]
    Authorization(String),

    /// The connection is already a member of the room.
    #[error("already a member of room {0}")]
    AlreadyMember(String),

    /// The connection is not a member of the room.
    #[error("not a member of room {0}")]
    NotMember(String),

    /// No room exists under the given id.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// The room actor has already exited; the directory entry is stale.
    /// Callers retry through the directory, which resolves the race.
    #[error("room channel closed")]
    RoomClosed,

    /// A recipient's bounded outbound queue overflowed.
    #[error("outbound delivery queue overflow")]
    Backpressure,

    /// The service is shutting down and not accepting new rooms.
    #[error("service is shutting down")]
    ShuttingDown,

    /// Internal error (actor mailbox plumbing failed).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Returns the stable wire error code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SignalingError::Authorization(_) => "unauthorized",
            SignalingError::AlreadyMember(_) => "already_member",
            SignalingError::NotMember(_) => "not_member",
            SignalingError::RoomNotFound(_) | SignalingError::RoomClosed => "room_not_found",
            SignalingError::Backpressure => "backpressure",
            SignalingError::ShuttingDown => "unavailable",
            SignalingError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::Authorization(room_id) => {
                format!("Not authorized for room {room_id}")
            }
            SignalingError::AlreadyMember(_) => "Already a member of this room".to_string(),
            SignalingError::NotMember(_) => "Not a member of this room".to_string(),
            SignalingError::RoomNotFound(_) | SignalingError::RoomClosed => {
                "Room not found".to_string()
            }
            SignalingError::Backpressure => "Delivery queue overflow".to_string(),
            SignalingError::ShuttingDown => "Service is shutting down".to_string(),
            SignalingError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// True for conditions the presence paths treat as idempotent no-ops.
    #[must_use]
    pub fn is_idempotent_noop(&self) -> bool {
        matches!(
            self,
            SignalingError::AlreadyMember(_) | SignalingError::NotMember(_)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            SignalingError::Authorization("r1".to_string()).error_code(),
            "unauthorized"
        );
        assert_eq!(
            SignalingError::AlreadyMember("r1".to_string()).error_code(),
            "already_member"
        );
        assert_eq!(
            SignalingError::NotMember("r1".to_string()).error_code(),
            "not_member"
        );
        assert_eq!(
            SignalingError::RoomNotFound("r1".to_string()).error_code(),
            "room_not_found"
        );
        assert_eq!(SignalingError::RoomClosed.error_code(), "room_not_found");
        assert_eq!(SignalingError::Backpressure.error_code(), "backpressure");
        assert_eq!(SignalingError::ShuttingDown.error_code(), "unavailable");
        assert_eq!(
            SignalingError::Internal("oops".to_string()).error_code(),
            "internal"
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SignalingError::Internal("channel send failed: conn-57 at 10.0.0.3".to_string());
        assert!(!err.client_message().contains("10.0.0"));
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_idempotent_noop_classification() {
        assert!(SignalingError::AlreadyMember("r1".to_string()).is_idempotent_noop());
        assert!(SignalingError::NotMember("r1".to_string()).is_idempotent_noop());
        assert!(!SignalingError::RoomNotFound("r1".to_string()).is_idempotent_noop());
        assert!(!SignalingError::Authorization("r1".to_string()).is_idempotent_noop());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SignalingError::RoomNotFound("daily-standup".to_string())),
            "room not found: daily-standup"
        );
        assert_eq!(
            format!("{}", SignalingError::Backpressure),
            "outbound delivery queue overflow"
        );
    }
}
