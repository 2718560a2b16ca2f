// Envelope types for client-relay communication.
//
// After the color line, every line in both directions is one `Envelope`:
// `{"Type":"JOIN"|"MOVE"|"LEAVE","Payload":"..."}`. The payload is an
// opaque string to this crate. For JOIN it is a display name, for MOVE it is
// `"x1,y1:x2,y2"` (parsed by the relay's history module), for LEAVE it is
// unused.
//
// The relay forwards envelopes verbatim, so the same type describes traffic
// in both directions.

use serde::{Deserialize, Serialize};

/// Plain-text line written to both clients when the JOIN handshake fails.
pub const HANDSHAKE_FAILED_LINE: &str = "Opponent failed to join.";

/// Message kind carried in the `Type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "JOIN")]
    Join,
    #[serde(rename = "MOVE")]
    Move,
    #[serde(rename = "LEAVE")]
    Leave,
}

/// One line of post-handshake wire traffic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    #[serde(rename = "Type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: String,
}

impl Envelope {
    pub fn new(kind: MessageKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Announce a display name (client → relay) or an opponent's name
    /// (relay → client).
    pub fn join(name: impl Into<String>) -> Self {
        Self::new(MessageKind::Join, name)
    }

    /// A move in `"x1,y1:x2,y2"` form.
    pub fn movement(payload: impl Into<String>) -> Self {
        Self::new(MessageKind::Move, payload)
    }

    pub fn leave() -> Self {
        Self::new(MessageKind::Leave, String::new())
    }
}
