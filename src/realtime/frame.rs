//! Chat wire frames
//!
//! Control frames are JSON text frames tagged by `type`. Application frames
//! are opaque text and pass through untouched.

use serde::{Deserialize, Serialize};

use crate::types::Result;

/// Frames the client itself emits around application traffic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Sent once per connection, before any application message
    Enter {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    /// Sent on intentional teardown, before closing
    Leave {
        #[serde(rename = "roomId")]
        room_id: String,
    },
}

impl ControlFrame {
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }
}

#[derive(Deserialize)]
struct TypedFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Whether an inbound frame is the server's `{"type":"unauthorized"}` signal
pub fn is_unauthorized(text: &str) -> bool {
    serde_json::from_str::<TypedFrame>(text)
        .map(|frame| frame.kind.as_deref() == Some("unauthorized"))
        .unwrap_or(false)
}
