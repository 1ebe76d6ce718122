//! Per-call transducer from raw runtime events to [`Payload`]s.
//!
//! Tool lifecycle per round: `idle -> pending` when the agent asks for a
//! tool, `pending -> idle` when tool results arrive. While pending, assistant
//! tokens are attributed to the tool in flight instead of the top-level reply.
//! One normalizer serves exactly one streaming call and is never shared.

use tracing::{debug, warn};

use crate::error::NormalizeError;
use crate::events::{decode, AgentMessage, MessageChunk, RawChunk, RawEvent, ToolMessage};
use crate::payload::{Payload, ResponseType};

/// Name of the internal clarification tool. Its announcements and results
/// never reach the wire; the interrupt it triggers does.
pub const CLARIFICATION_TOOL: &str = "user-assistance";

/// What to do when one agent message asks for several tools at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MultiToolPolicy {
    /// Treat it as a malformed event: logged and skipped.
    #[default]
    Reject,
    /// Honor the first call and ignore the rest.
    FirstOnly,
}

/// Compatibility switches for the normalizer.
#[derive(Debug, Clone)]
pub struct NormalizerOptions {
    /// Tag tool-attributed fragments with `response.end`, as existing
    /// clients expect. When false they carry `response`.
    pub legacy_chunk_phase: bool,
    pub multi_tool_policy: MultiToolPolicy,
    pub clarification_tool: String,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            legacy_chunk_phase: true,
            multi_tool_policy: MultiToolPolicy::default(),
            clarification_tool: CLARIFICATION_TOOL.into(),
        }
    }
}

/// Identity of the tool invocation in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveTool {
    id: String,
    name: String,
}

#[derive(Debug, Default)]
pub struct ChunkNormalizer {
    options: NormalizerOptions,
    active: Option<ActiveTool>,
}

impl ChunkNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: NormalizerOptions) -> Self {
        Self {
            options,
            active: None,
        }
    }

    /// True between a tool announcement and its result.
    pub fn is_tool_pending(&self) -> bool {
        self.active.is_some()
    }

    /// `(id, name)` of the tool in flight.
    pub fn active_tool(&self) -> Option<(&str, &str)> {
        self.active
            .as_ref()
            .map(|t| (t.id.as_str(), t.name.as_str()))
    }

    /// Decode and normalize one raw chunk. Entries that fail to decode or
    /// normalize are logged and skipped; the rest still produce payloads.
    pub fn process_chunk(&mut self, chunk: RawChunk) -> Vec<Payload> {
        let mode = chunk.mode;
        let mut out = Vec::new();
        for event in decode(chunk) {
            match event.and_then(|event| self.process(event)) {
                Ok(payloads) => out.extend(payloads),
                Err(e) => warn!(?mode, error = %e, "skipping runtime event"),
            }
        }
        out
    }

    /// Normalize one typed event.
    pub fn process(&mut self, event: RawEvent) -> Result<Vec<Payload>, NormalizeError> {
        match event {
            RawEvent::Interrupt(interrupt) => {
                debug!(interrupt_id = ?interrupt.id, "interrupt surfaced");
                Ok(vec![Payload::interrupt(interrupt.value)])
            }
            RawEvent::AgentDecision(message) => self.on_agent(message),
            RawEvent::ToolsCompleted(messages) => Ok(self.on_tools(messages)),
            RawEvent::Token { chunk, .. } => self.on_token(chunk).map(|p| vec![p]),
        }
    }

    fn on_agent(&mut self, message: AgentMessage) -> Result<Vec<Payload>, NormalizeError> {
        if !message.requests_tool() {
            return Ok(Vec::new());
        }

        let count = message.tool_calls.len();
        if count > 1 && self.options.multi_tool_policy == MultiToolPolicy::Reject {
            return Err(NormalizeError::MultipleToolCalls { count });
        }
        let tool = message
            .tool_calls
            .into_iter()
            .next()
            .ok_or(NormalizeError::MissingToolCall)?;
        if count > 1 {
            warn!(count, honored = %tool.name, "agent requested several tools, keeping the first");
        }

        if tool.name == self.options.clarification_tool {
            debug!(id = %tool.id, "clarification tool requested");
            return Ok(Vec::new());
        }

        let payload = Payload::tool_start(&tool.id, &tool.name, tool.args)?;
        self.active = Some(ActiveTool {
            id: tool.id,
            name: tool.name,
        });
        Ok(vec![payload])
    }

    fn on_tools(&mut self, messages: Vec<ToolMessage>) -> Vec<Payload> {
        let mut recorded = self.active.take().map(|t| t.id);
        let mut out = Vec::new();

        for message in messages {
            if message.name == self.options.clarification_tool {
                continue;
            }
            let Some(id) = recorded.take().or(message.tool_call_id) else {
                warn!(tool = %message.name, "tool result without a tool id, skipping");
                continue;
            };
            match Payload::tool_end(&id, &message.name, message.content, message.artifact) {
                Ok(payload) => out.push(payload),
                Err(e) => warn!(tool = %message.name, error = %e, "skipping tool result"),
            }
        }
        out
    }

    fn on_token(&self, chunk: MessageChunk) -> Result<Payload, NormalizeError> {
        let payload = match &self.active {
            Some(tool) => {
                let phase = if self.options.legacy_chunk_phase {
                    ResponseType::End
                } else {
                    ResponseType::Response
                };
                Payload::tool_chunk(&tool.id, &tool.name, chunk.content, phase)?
            }
            None => Payload::text_chunk(&chunk.id, chunk.content)?,
        };
        Ok(payload)
    }
}
