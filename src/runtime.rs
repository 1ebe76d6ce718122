//! The agent runtime seam and a ReAct-style implementation of it.
//!
//! [`AgentRuntime`] is the black box the stream driver talks to: it opens a
//! stream of [`RawChunk`]s for a thread, or runs a prompt to completion.
//! [`ReactRuntime`] is the concrete loop: call the model, run the one tool it
//! asks for, repeat, pausing on the clarification tool until answers arrive.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{RuntimeConfig, Settings};
use crate::error::AgentError;
use crate::events::{
    decode, AgentMessage, MessageChunk, RawChunk, RawEvent, ResponseMetadata, RuntimeMessage,
    ToolCall, ToolMessage,
};
use crate::inference::{InferenceProvider, OpenAiProvider};
use crate::normalizer::CLARIFICATION_TOOL;
use crate::session::{
    FileSessionManager, MemorySessionManager, PendingToolCall, SessionManager, SessionState,
};
use crate::tools::ToolRegistry;
use crate::types::{ContentBlock, InferenceRequest, InferenceResponse, Usage};

pub use crate::session::SessionKey;

/// Raw runtime output for one call, in arrival order.
pub type RawEventStream = Pin<Box<dyn Stream<Item = Result<RawChunk, AgentError>> + Send>>;

/// What starts a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInput {
    /// A fresh user message.
    Prompt(String),
    /// Answers to the pending clarification questions, keyed by question.
    Resume(BTreeMap<String, String>),
}

impl RunInput {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Prompt(_) => "stream",
            Self::Resume(_) => "resume",
        }
    }
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Open the raw event stream for one run on `session`.
    async fn stream(&self, input: RunInput, session: &SessionKey)
        -> Result<RawEventStream, AgentError>;

    /// Run `prompt` to completion and return the final assistant message.
    async fn invoke(&self, prompt: &str, session: &SessionKey)
        -> Result<AgentMessage, AgentError>;
}

/// Metadata attached to every streamed token.
fn token_metadata(turn: usize) -> Value {
    json!({ "langgraph_node": "agent", "langgraph_step": turn + 1 })
}

/// Tool-calling loop over an [`InferenceProvider`], with threads
/// checkpointed through a [`SessionManager`]. Cloning is cheap and shares
/// the provider, tools and checkpoints.
#[derive(Clone)]
pub struct ReactRuntime {
    provider: Arc<dyn InferenceProvider>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<dyn SessionManager>,
    config: Arc<RuntimeConfig>,
}

impl ReactRuntime {
    pub fn new(
        provider: impl InferenceProvider + 'static,
        tools: ToolRegistry,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            tools: Arc::new(tools),
            sessions: Arc::new(MemorySessionManager::new()),
            config: Arc::new(config),
        }
    }

    /// Replace the checkpoint store (in-memory by default).
    pub fn with_sessions(mut self, sessions: impl SessionManager + 'static) -> Self {
        self.sessions = Arc::new(sessions);
        self
    }

    /// Build the OpenAI-backed runtime described by `settings`.
    pub fn from_settings(settings: &Settings, tools: ToolRegistry) -> Result<Self, AgentError> {
        let api_key = settings
            .openai_api_key
            .clone()
            .ok_or_else(|| AgentError::Config("OPENAI_API_KEY is not set".into()))?;
        let provider =
            OpenAiProvider::new(settings.openai_base_url.clone()).with_api_key(api_key);
        let config = RuntimeConfig::default().with_model(settings.openai_model.clone());
        let runtime = Self::new(provider, tools, config);

        let runtime = match &settings.checkpoint_dir {
            Some(dir) => runtime.with_sessions(FileSessionManager::new(dir)),
            None => runtime,
        };
        info!(model = %settings.openai_model, "agent runtime initialized");
        Ok(runtime)
    }
}

#[async_trait]
impl AgentRuntime for ReactRuntime {
    async fn stream(
        &self,
        input: RunInput,
        session: &SessionKey,
    ) -> Result<RawEventStream, AgentError> {
        let (state, resumed) = self.prepare(input, session).await?;
        Ok(Box::pin(run(self.clone(), state, resumed)))
    }

    async fn invoke(&self, prompt: &str, session: &SessionKey) -> Result<AgentMessage, AgentError> {
        let (state, _) = self
            .prepare(RunInput::Prompt(prompt.to_string()), session)
            .await?;
        let mut chunks = Box::pin(run(self.clone(), state, None));

        let mut last = None;
        while let Some(chunk) = chunks.next().await {
            for event in decode(chunk?) {
                if let Ok(RawEvent::AgentDecision(message)) = event {
                    last = Some(message);
                }
            }
        }
        last.ok_or_else(|| AgentError::Runtime("run produced no assistant message".into()))
    }
}

impl ReactRuntime {
    /// Load the thread and apply the run input. Answers to a pending
    /// clarification come back as the tool message to announce first.
    async fn prepare(
        &self,
        input: RunInput,
        key: &SessionKey,
    ) -> Result<(SessionState, Option<ToolMessage>), AgentError> {
        let mut state = self
            .sessions
            .load(&key.thread_id)
            .await?
            .unwrap_or_else(|| SessionState::new(key.clone()));
        state.key = key.clone();

        match input {
            RunInput::Prompt(prompt) => {
                if let Some(pending) = state.pending_interrupt.take() {
                    info!(thread = %key.thread_id, "new prompt while waiting for answers, dropping questions");
                    state.messages.push(RuntimeMessage::Tool(ToolMessage {
                        name: pending.name,
                        content: json!("The user did not answer and sent a new message instead."),
                        artifact: Value::Null,
                        tool_call_id: Some(pending.id),
                    }));
                }
                state.messages.push(RuntimeMessage::Human {
                    content: Value::String(prompt),
                });
                Ok((state, None))
            }
            RunInput::Resume(answers) => {
                let pending = state.pending_interrupt.take().ok_or_else(|| {
                    AgentError::Runtime(format!(
                        "thread {} has no pending question to resume",
                        key.thread_id
                    ))
                })?;
                let artifact = serde_json::to_value(&answers)?;
                let message = ToolMessage {
                    name: pending.name,
                    content: Value::String(serde_json::to_string(&answers)?),
                    artifact,
                    tool_call_id: Some(pending.id),
                };
                state.messages.push(RuntimeMessage::Tool(message.clone()));
                Ok((state, Some(message)))
            }
        }
    }

    async fn infer(&self, state: &SessionState) -> Result<InferenceResponse, AgentError> {
        let request = InferenceRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            system: Some(self.config.system_prompt.clone()),
            tools: self.tool_schemas(),
            messages: state.messages.clone(),
            parallel_tool_calls: false,
        };
        Ok(self.provider.infer(request).await?)
    }

    fn tool_schemas(&self) -> Vec<Value> {
        let mut schemas = self.tools.schemas();
        if !self.tools.contains(CLARIFICATION_TOOL) {
            schemas.push(ToolRegistry::clarification_schema());
        }
        schemas
    }

    async fn call_tool(&self, call: &ToolCall) -> ToolMessage {
        let (content, artifact) = match self.tools.execute(&call.name, &call.args).await {
            Ok(output) => (Value::String(output.content), output.artifact),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool failed");
                (Value::String(format!("Error: {e}")), Value::Null)
            }
        };
        ToolMessage {
            name: call.name.clone(),
            content,
            artifact,
            tool_call_id: Some(call.id.clone()),
        }
    }

    async fn checkpoint(&self, state: &mut SessionState) -> Result<(), AgentError> {
        state.updated_at = chrono::Utc::now();
        self.sessions.checkpoint(&state.key.thread_id, state).await
    }
}

/// Turn a model response into the assistant message the runtime reports.
fn agent_message(response: &InferenceResponse) -> AgentMessage {
    let tool_calls = response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                args: input.clone(),
            }),
            ContentBlock::Text(_) => None,
        })
        .collect();

    AgentMessage {
        id: Some(
            response
                .id
                .clone()
                .unwrap_or_else(|| format!("run-{}", uuid::Uuid::new_v4())),
        ),
        content: Value::String(response.text().unwrap_or_default()),
        tool_calls,
        response_metadata: ResponseMetadata {
            finish_reason: Some(response.stop_reason.as_finish_reason().to_string()),
        },
    }
}

/// Result recorded for a call that was not run because the run paused on
/// a clarification earlier in the same message.
fn skipped_result(call: &ToolCall) -> ToolMessage {
    ToolMessage {
        name: call.name.clone(),
        content: json!("Not run: waiting for the user's answers. Call again if still needed."),
        artifact: Value::Null,
        tool_call_id: Some(call.id.clone()),
    }
}

fn run(
    runtime: ReactRuntime,
    mut state: SessionState,
    resumed: Option<ToolMessage>,
) -> impl Stream<Item = Result<RawChunk, AgentError>> + Send {
    async_stream::try_stream! {
        if let Some(answered) = resumed {
            yield RawChunk::tools(&[answered])?;
        }

        let mut usage = Usage::default();
        for turn in 0..runtime.config.max_turns {
            debug!(thread = %state.key.thread_id, turn, "agent turn");
            let response = runtime.infer(&state).await?;
            usage.accumulate(&response.usage);
            let message = agent_message(&response);

            if let Some(text) = response.text() {
                let chunk = MessageChunk {
                    id: message.id.clone().unwrap_or_default(),
                    content: Value::String(text),
                };
                yield RawChunk::token(&chunk, token_metadata(turn))?;
            }

            state.messages.push(RuntimeMessage::Ai(message.clone()));
            yield RawChunk::agent(&message)?;

            if message.tool_calls.is_empty() {
                runtime.checkpoint(&mut state).await?;
                info!(
                    thread = %state.key.thread_id,
                    turns = turn + 1,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "agent finished"
                );
                return;
            }

            for (i, call) in message.tool_calls.iter().enumerate() {
                if call.name == CLARIFICATION_TOOL {
                    // every call id in the message needs a result before the next inference
                    for skipped in &message.tool_calls[i + 1..] {
                        state.messages.push(RuntimeMessage::Tool(skipped_result(skipped)));
                    }
                    state.pending_interrupt = Some(PendingToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.args.clone(),
                    });
                    runtime.checkpoint(&mut state).await?;
                    info!(thread = %state.key.thread_id, "waiting for user answers");
                    yield RawChunk::interrupt(call.args.clone());
                    return;
                }

                let result = runtime.call_tool(call).await;
                state.messages.push(RuntimeMessage::Tool(result.clone()));
                yield RawChunk::tools(&[result])?;
            }

            runtime.checkpoint(&mut state).await?;
        }

        warn!(max_turns = runtime.config.max_turns, "agent hit max turns limit");
    }
}
