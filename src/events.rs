//! Raw events yielded by an agent runtime, and their typed decoding.
//!
//! A runtime hands out [`RawChunk`]s: a stream-mode label plus an untyped
//! JSON value. [`decode`] turns one chunk into the closed set of
//! [`RawEvent`]s the normalizer matches on.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::NormalizeError;

/// Stream-mode label attached to every raw chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Node-level state updates: interrupts, agent decisions, tool results.
    Updates,
    /// Incremental `(token, metadata)` pairs.
    Messages,
}

/// Untyped runtime output, exactly as the runtime produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChunk {
    pub mode: StreamMode,
    pub value: Value,
}

impl RawChunk {
    pub fn updates(value: Value) -> Self {
        Self {
            mode: StreamMode::Updates,
            value,
        }
    }

    pub fn messages(value: Value) -> Self {
        Self {
            mode: StreamMode::Messages,
            value,
        }
    }

    /// `updates` chunk announcing an interrupt.
    pub fn interrupt(value: Value) -> Self {
        Self::updates(json!({ "__interrupt__": [{ "value": value }] }))
    }

    /// `updates` chunk carrying the agent node's single message.
    pub fn agent(message: &AgentMessage) -> Result<Self, serde_json::Error> {
        let message = serde_json::to_value(RuntimeMessage::Ai(message.clone()))?;
        Ok(Self::updates(json!({ "agent": { "messages": [message] } })))
    }

    /// `updates` chunk carrying completed tool messages.
    pub fn tools(messages: &[ToolMessage]) -> Result<Self, serde_json::Error> {
        let messages = messages
            .iter()
            .map(|m| serde_json::to_value(RuntimeMessage::Tool(m.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::updates(json!({ "tools": { "messages": messages } })))
    }

    /// `messages` chunk carrying one assistant token fragment.
    pub fn token(chunk: &MessageChunk, metadata: Value) -> Result<Self, serde_json::Error> {
        let chunk = serde_json::to_value(RuntimeMessage::AiChunk(chunk.clone()))?;
        Ok(Self::messages(json!([chunk, metadata])))
    }
}

/// A tool invocation requested by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A complete assistant message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub response_metadata: ResponseMetadata,
}

impl AgentMessage {
    pub const TOOL_CALLS: &'static str = "tool_calls";

    pub fn requests_tool(&self) -> bool {
        self.response_metadata.finish_reason.as_deref() == Some(Self::TOOL_CALLS)
    }

    /// Textual content; list-shaped content is flattened to its text parts.
    pub fn text(&self) -> Option<String> {
        content_text(&self.content)
    }
}

/// The result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub name: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub artifact: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// An incremental assistant token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageChunk {
    pub id: String,
    #[serde(default)]
    pub content: Value,
}

/// Runtime request for human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Conversation message as serialized by the runtime, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeMessage {
    #[serde(rename = "human")]
    Human { content: Value },
    #[serde(rename = "ai")]
    Ai(AgentMessage),
    #[serde(rename = "tool")]
    Tool(ToolMessage),
    #[serde(rename = "AIMessageChunk")]
    AiChunk(MessageChunk),
    #[serde(other)]
    Other,
}

/// One typed event. An `updates` chunk may decode into several of these,
/// always in the order interrupt, agent, tools.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// `updates` / `__interrupt__`
    Interrupt(Interrupt),
    /// `updates` / `agent`, when the single message is an assistant message.
    AgentDecision(AgentMessage),
    /// `updates` / `tools`: tool messages only, possibly empty.
    ToolsCompleted(Vec<ToolMessage>),
    /// `messages`, when the token is an assistant chunk.
    Token { chunk: MessageChunk, metadata: Value },
}

/// Decode one raw chunk. Each `updates` entry is decoded on its own so a
/// malformed entry does not take its well-formed siblings down with it.
pub fn decode(chunk: RawChunk) -> Vec<Result<RawEvent, NormalizeError>> {
    match chunk.mode {
        StreamMode::Updates => decode_updates(chunk.value),
        StreamMode::Messages => decode_token(chunk.value).transpose().into_iter().collect(),
    }
}

fn decode_updates(value: Value) -> Vec<Result<RawEvent, NormalizeError>> {
    let Value::Object(mut map) = value else {
        return vec![Err(NormalizeError::malformed(
            "updates",
            "expected a mapping",
        ))];
    };

    let mut events = Vec::new();
    if let Some(entry) = take_present(&mut map, "__interrupt__") {
        events.push(decode_interrupt(entry));
    }
    if let Some(entry) = take_present(&mut map, "agent") {
        if let Some(event) = decode_agent(entry).transpose() {
            events.push(event);
        }
    }
    if let Some(entry) = take_present(&mut map, "tools") {
        events.push(decode_tools(entry));
    }
    events
}

fn decode_interrupt(entry: Value) -> Result<RawEvent, NormalizeError> {
    let Value::Array(mut items) = entry else {
        return Err(NormalizeError::malformed("__interrupt__", "expected a list"));
    };
    if items.len() != 1 {
        return Err(NormalizeError::malformed(
            "__interrupt__",
            format!("expected exactly one interrupt, got {}", items.len()),
        ));
    }
    let interrupt: Interrupt = serde_json::from_value(items.remove(0))
        .map_err(|e| NormalizeError::malformed("__interrupt__", e.to_string()))?;
    Ok(RawEvent::Interrupt(interrupt))
}

fn decode_agent(entry: Value) -> Result<Option<RawEvent>, NormalizeError> {
    let mut messages = node_messages("agent", entry)?;
    if messages.len() != 1 {
        return Err(NormalizeError::malformed(
            "agent",
            format!("expected exactly one message, got {}", messages.len()),
        ));
    }
    let message: RuntimeMessage = serde_json::from_value(messages.remove(0))
        .map_err(|e| NormalizeError::malformed("agent", e.to_string()))?;
    Ok(match message {
        RuntimeMessage::Ai(message) => Some(RawEvent::AgentDecision(message)),
        _ => None,
    })
}

fn decode_tools(entry: Value) -> Result<RawEvent, NormalizeError> {
    let messages = node_messages("tools", entry)?
        .into_iter()
        .map(|m| {
            serde_json::from_value::<RuntimeMessage>(m)
                .map_err(|e| NormalizeError::malformed("tools", e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter_map(|m| match m {
            RuntimeMessage::Tool(tool) => Some(tool),
            _ => None,
        })
        .collect();
    Ok(RawEvent::ToolsCompleted(messages))
}

fn decode_token(value: Value) -> Result<Option<RawEvent>, NormalizeError> {
    let Value::Array(pair) = value else {
        return Err(NormalizeError::malformed(
            "messages",
            "expected a (token, metadata) pair",
        ));
    };
    let [token, metadata]: [Value; 2] = pair.try_into().map_err(|v: Vec<Value>| {
        NormalizeError::malformed(
            "messages",
            format!("expected a (token, metadata) pair, got {} items", v.len()),
        )
    })?;
    let token: RuntimeMessage = serde_json::from_value(token)
        .map_err(|e| NormalizeError::malformed("messages", e.to_string()))?;
    Ok(match token {
        RuntimeMessage::AiChunk(chunk) => Some(RawEvent::Token { chunk, metadata }),
        _ => None,
    })
}

fn node_messages(entry: &'static str, value: Value) -> Result<Vec<Value>, NormalizeError> {
    match value {
        Value::Object(mut node) => match node.remove("messages") {
            Some(Value::Array(messages)) => Ok(messages),
            Some(other) => Err(NormalizeError::malformed(
                entry,
                format!("messages is not a list: {other}"),
            )),
            None => Err(NormalizeError::malformed(entry, "missing messages")),
        },
        _ => Err(NormalizeError::malformed(entry, "expected a mapping")),
    }
}

/// Remove `key` unless it is absent or empty, mirroring truthiness checks
/// on the runtime's mapping.
fn take_present(map: &mut Map<String, Value>, key: &str) -> Option<Value> {
    let value = map.remove(key)?;
    let present = match &value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    };
    present.then_some(value)
}

/// Flatten message content to text: strings pass through, lists keep their
/// string items and `text` blocks.
pub fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => Some(
            blocks
                .iter()
                .filter_map(|b| b.as_str().or_else(|| b["text"].as_str()))
                .collect::<Vec<_>>()
                .join(""),
        ),
        _ => None,
    }
}
