//! Server-sent-event framing.
//!
//! ```text
//! id: <sequence-number>
//! data: <json>
//!
//! ```

use std::fmt;

use serde_json::Value;

use crate::error::PayloadError;
use crate::payload::Payload;

/// Error data emitted when a fresh-prompt stream fails.
pub const STREAM_ERROR_MESSAGE: &str = "Streaming error occurred";
/// Error data emitted when a resumed stream fails.
pub const RESUME_ERROR_MESSAGE: &str = "Resume streaming error occurred";

/// One wire record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: u64,
    data: String,
}

impl Frame {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// True for the reserved terminal error frame.
    pub fn is_error(&self) -> bool {
        serde_json::from_str::<Value>(&self.data)
            .ok()
            .and_then(|v| v.get("error").cloned())
            .is_some()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id: {}\ndata: {}\n\n", self.id, self.data)
    }
}

/// Zero-based sequence counter scoped to one streaming call. A number is
/// consumed only when a frame is actually produced.
#[derive(Debug, Default)]
pub struct FrameSequencer {
    next: u64,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and frame a payload. On failure no number is consumed.
    pub fn frame(&mut self, payload: &Payload) -> Result<Frame, PayloadError> {
        let data = payload.to_json()?;
        Ok(self.push(data))
    }

    /// The reserved `{"error": ...}` frame, using the next number.
    pub fn error_frame(&mut self, message: &str) -> Frame {
        let data = format!("{{\"error\": {}}}", Value::String(message.to_string()));
        self.push(data)
    }

    /// Frames produced so far.
    pub fn emitted(&self) -> u64 {
        self.next
    }

    fn push(&mut self, data: String) -> Frame {
        let frame = Frame {
            id: self.next,
            data,
        };
        self.next += 1;
        frame
    }
}
