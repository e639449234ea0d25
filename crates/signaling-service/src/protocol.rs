//! Wire protocol for the WebSocket signaling channel.
//!
//! Events are JSON objects tagged with a `type` field. Signal payloads are
//! opaque: they are captured as [`RawValue`] at the edge and relayed
//! byte-for-byte, never inspected or re-encoded.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Inbound event from an authenticated client connection.
#[derive(Debug)]
pub enum ClientEvent {
    /// Join a room (created lazily on first join).
    Join { room_id: String },
    /// Leave a room explicitly.
    Leave { room_id: String },
    /// Relay an opaque negotiation payload (SDP/ICE) to the other members.
    Signal {
        room_id: String,
        payload: Box<RawValue>,
    },
}

// Hand-written because serde's internal-tagging content buffer cannot yield a
// `RawValue`: a derived `#[serde(tag = "type")]` fails on every `signal`
// frame. Instead the frame is captured as raw JSON, the tag is extracted, and
// the matching plain per-variant struct is decoded from the original bytes —
// same wire format, and the payload stays byte-for-byte opaque.
impl<'de> Deserialize<'de> for ClientEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        #[derive(Deserialize)]
        struct Tag {
            #[serde(rename = "type")]
            kind: String,
        }

        #[derive(Deserialize)]
        struct RoomFields {
            room_id: String,
        }

        #[derive(Deserialize)]
        struct SignalFields {
            room_id: String,
            payload: Box<RawValue>,
        }

        let frame = Box::<RawValue>::deserialize(deserializer)?;
        let tag: Tag = serde_json::from_str(frame.get()).map_err(D::Error::custom)?;
        match tag.kind.as_str() {
            "join" => {
                let fields: RoomFields =
                    serde_json::from_str(frame.get()).map_err(D::Error::custom)?;
                Ok(ClientEvent::Join {
                    room_id: fields.room_id,
                })
            }
            "leave" => {
                let fields: RoomFields =
                    serde_json::from_str(frame.get()).map_err(D::Error::custom)?;
                Ok(ClientEvent::Leave {
                    room_id: fields.room_id,
                })
            }
            "signal" => {
                let fields: SignalFields =
                    serde_json::from_str(frame.get()).map_err(D::Error::custom)?;
                Ok(ClientEvent::Signal {
                    room_id: fields.room_id,
                    payload: fields.payload,
                })
            }
            other => Err(D::Error::unknown_variant(other, &["join", "leave", "signal"])),
        }
    }
}

/// Outbound event delivered to a client connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Membership change in a room the connection belongs to.
    Presence {
        room_id: String,
        kind: PresenceKind,
        user_id: String,
        count: usize,
    },
    /// Relayed signal payload from another member, unchanged.
    Signal {
        room_id: String,
        payload: Box<RawValue>,
    },
    /// Error for the caller only; never broadcast.
    Error {
        code: &'static str,
        message: String,
    },
}

/// Kind of presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Joined,
    Left,
}
