//! The message envelope exchanged between peers.
//!
//! Every payload travels as `{ "type": "...", "data": ... }`.  The type tag is
//! the only thing the channel looks at; `data` is an arbitrary JSON value that
//! only the consumer of that type understands.
//!
//! ```text
//! { "type": "style", "data": { "boxStyle": { ... } } }
//! ```

use serde::{Deserialize, Serialize};

/// A typed message.
///
/// Two messages are equal when both the type tag and the JSON payload are
/// equal, which is what "received unchanged" means for a relayed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Type tag used by consumers to pick the messages they care about.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Message {
    /// Builds a message from a type tag and a JSON payload.
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Returns `true` if this message carries the given type tag.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
