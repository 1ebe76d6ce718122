//! The normalized output unit handed to the transport.
//!
//! A [`Payload`] is built once, serialized, and dropped. Field order on the
//! wire is `id, content, type, category`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PayloadError;

/// User-facing text returned by `invoke` when the runtime fails.
pub const INVOKE_FAILURE_MESSAGE: &str =
    "An error occurred while processing your request. Please try again.";

/// Whether a payload is a complete unit or an incremental fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "interrupt")]
    Interrupt,
    #[serde(rename = "reasoning")]
    Reasoning,
    #[serde(rename = "text.chunk")]
    TextChunk,
    #[serde(rename = "reasoning.chunk")]
    ReasoningChunk,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Interrupt => "interrupt",
            Self::Reasoning => "reasoning",
            Self::TextChunk => "text.chunk",
            Self::ReasoningChunk => "reasoning.chunk",
        }
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self, Self::TextChunk | Self::ReasoningChunk)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of the unit identified by a payload's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "response.start")]
    Start,
    #[serde(rename = "response")]
    Response,
    #[serde(rename = "response.end")]
    End,
    #[serde(rename = "response.error")]
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "response.start",
            Self::Response => "response",
            Self::End => "response.end",
            Self::Error => "response.error",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload body: a bare value (token text, interrupt value) or a tool-shaped
/// object. `ToolResult` must stay ahead of `Tool` so untagged decoding picks
/// the richer shape first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadContent {
    ToolResult {
        name: String,
        content: Value,
        artifact: Value,
    },
    Tool {
        name: String,
        content: Value,
    },
    Value(Value),
}

impl PayloadContent {
    /// Tool name carried by the content, if it is tool-shaped.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::ToolResult { name, .. } | Self::Tool { name, .. } => Some(name),
            Self::Value(_) => None,
        }
    }
}

impl From<&str> for PayloadContent {
    fn from(text: &str) -> Self {
        Self::Value(Value::String(text.to_string()))
    }
}

impl From<Value> for PayloadContent {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// One normalized event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PayloadFields")]
pub struct Payload {
    id: String,
    content: PayloadContent,
    #[serde(rename = "type")]
    response_type: ResponseType,
    category: Category,
}

/// Decoded fields, validated through [`Payload::new`].
#[derive(Deserialize)]
struct PayloadFields {
    id: String,
    content: PayloadContent,
    #[serde(rename = "type")]
    response_type: ResponseType,
    category: Category,
}

impl TryFrom<PayloadFields> for Payload {
    type Error = PayloadError;

    fn try_from(fields: PayloadFields) -> Result<Self, Self::Error> {
        Self::new(
            fields.id,
            fields.category,
            fields.response_type,
            fields.content,
        )
    }
}

impl Payload {
    /// Build a payload. Fails if `id` is empty.
    pub fn new(
        id: impl Into<String>,
        category: Category,
        response_type: ResponseType,
        content: impl Into<PayloadContent>,
    ) -> Result<Self, PayloadError> {
        let id = id.into();
        if id.is_empty() {
            return Err(PayloadError::EmptyId);
        }
        Ok(Self {
            id,
            content: content.into(),
            response_type,
            category,
        })
    }

    /// An interrupt surfaced to the human, under a fresh id.
    pub fn interrupt(value: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: PayloadContent::Value(value),
            response_type: ResponseType::Response,
            category: Category::Interrupt,
        }
    }

    /// A fragment of the top-level assistant reply.
    pub fn text_chunk(message_id: &str, text: Value) -> Result<Self, PayloadError> {
        Self::new(
            message_id,
            Category::TextChunk,
            ResponseType::Response,
            PayloadContent::Value(text),
        )
    }

    /// Announcement of a tool invocation.
    pub fn tool_start(tool_id: &str, name: &str, args: Value) -> Result<Self, PayloadError> {
        Self::new(
            tool_id,
            Category::Reasoning,
            ResponseType::Start,
            PayloadContent::Tool {
                name: name.to_string(),
                content: args,
            },
        )
    }

    /// A fragment attributed to the tool in flight.
    pub fn tool_chunk(
        tool_id: &str,
        name: &str,
        text: Value,
        phase: ResponseType,
    ) -> Result<Self, PayloadError> {
        Self::new(
            tool_id,
            Category::ReasoningChunk,
            phase,
            PayloadContent::Tool {
                name: name.to_string(),
                content: text,
            },
        )
    }

    /// Result of a completed tool invocation.
    pub fn tool_end(
        tool_id: &str,
        name: &str,
        content: Value,
        artifact: Value,
    ) -> Result<Self, PayloadError> {
        Self::new(
            tool_id,
            Category::Reasoning,
            ResponseType::End,
            PayloadContent::ToolResult {
                name: name.to_string(),
                content,
                artifact,
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn content(&self) -> &PayloadContent {
        &self.content
    }

    /// Compact JSON, as written into a frame's `data:` line.
    pub fn to_json(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Result shape of the single-shot `invoke` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub message: String,
}

impl InvokeResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn failure() -> Self {
        Self::new(INVOKE_FAILURE_MESSAGE)
    }
}
