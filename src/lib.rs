pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod inference;
pub mod normalizer;
pub mod payload;
pub mod runtime;
pub mod search;
pub mod session;
pub mod tools;
pub mod types;

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::{RuntimeConfig, Settings};
pub use error::{AgentError, InferenceError, NormalizeError, PayloadError, SearchError};
pub use events::{RawChunk, RawEvent, StreamMode};
pub use frame::{Frame, FrameSequencer, RESUME_ERROR_MESSAGE, STREAM_ERROR_MESSAGE};
pub use inference::{InferenceProvider, OpenAiProvider};
pub use normalizer::{ChunkNormalizer, MultiToolPolicy, NormalizerOptions, CLARIFICATION_TOOL};
pub use payload::{Category, InvokeResponse, Payload, PayloadContent, ResponseType};
pub use runtime::{AgentRuntime, RawEventStream, ReactRuntime, RunInput};
pub use session::{
    FileSessionManager, MemorySessionManager, NoSessionManager, SessionKey, SessionManager,
    SessionState,
};
pub use tools::{ToolHandler, ToolOutput, ToolRegistry};
pub use types::{ContentBlock, InferenceRequest, InferenceResponse, StopReason, Usage};

/// Wire frames for one streaming call.
pub type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

/// The stream driver. Runs the agent runtime for one call at a time and
/// turns its raw output into numbered wire frames.
///
/// Every call gets its own normalizer and sequence counter, so one
/// `Assistant` can serve any number of concurrent sessions.
#[derive(Clone)]
pub struct Assistant {
    runtime: Arc<dyn AgentRuntime>,
    options: NormalizerOptions,
}

impl Assistant {
    pub fn new(runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            runtime,
            options: NormalizerOptions::default(),
        }
    }

    pub fn with_normalizer_options(mut self, options: NormalizerOptions) -> Self {
        self.options = options;
        self
    }

    /// Stream the reply to a fresh user message.
    pub fn stream(&self, prompt: impl Into<String>, session: SessionKey) -> FrameStream {
        self.stream_with_cancel(
            RunInput::Prompt(prompt.into()),
            session,
            CancellationToken::new(),
        )
    }

    /// Continue a thread paused on clarification questions.
    pub fn resume(&self, answers: BTreeMap<String, String>, session: SessionKey) -> FrameStream {
        self.resume_with_cancel(answers, session, CancellationToken::new())
    }

    pub fn resume_with_cancel(
        &self,
        answers: BTreeMap<String, String>,
        session: SessionKey,
        cancel: CancellationToken,
    ) -> FrameStream {
        self.stream_with_cancel(RunInput::Resume(answers), session, cancel)
    }

    /// Stream a run, stopping once `cancel` fires. Dropping the returned
    /// stream also stops the run.
    pub fn stream_with_cancel(
        &self,
        input: RunInput,
        session: SessionKey,
        cancel: CancellationToken,
    ) -> FrameStream {
        Box::pin(drive(
            Arc::clone(&self.runtime),
            ChunkNormalizer::with_options(self.options.clone()),
            input,
            session,
            cancel,
        ))
    }

    /// Run `prompt` to completion and return only the final reply text.
    /// Failures are logged and answered with a fixed apology.
    pub async fn invoke(&self, prompt: &str, session: &SessionKey) -> InvokeResponse {
        let started = Instant::now();
        info!(session = %session.thread_id, "invoke started");

        match self.runtime.invoke(prompt, session).await {
            Ok(message) => {
                info!(
                    session = %session.thread_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "invoke finished"
                );
                InvokeResponse::new(message.text().unwrap_or_default())
            }
            Err(e) => {
                warn!(session = %session.thread_id, error = %e, "invoke failed");
                InvokeResponse::failure()
            }
        }
    }
}

fn drive(
    runtime: Arc<dyn AgentRuntime>,
    mut normalizer: ChunkNormalizer,
    input: RunInput,
    session: SessionKey,
    cancel: CancellationToken,
) -> impl Stream<Item = Frame> + Send {
    async_stream::stream! {
        let mode = input.label();
        let error_message = match input {
            RunInput::Prompt(_) => STREAM_ERROR_MESSAGE,
            RunInput::Resume(_) => RESUME_ERROR_MESSAGE,
        };
        let mut frames = FrameSequencer::new();
        let started = Instant::now();
        info!(mode, session = %session.thread_id, user = %session.user_id, "stream started");

        let mut raw = match runtime.stream(input, &session).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(mode, session = %session.thread_id, error = %e, "failed to open runtime stream");
                yield frames.error_frame(error_message);
                return;
            }
        };

        let mut chunks = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(mode, session = %session.thread_id, "stream cancelled");
                    break;
                }
                next = raw.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!(mode, session = %session.thread_id, error = %e, "runtime stream failed");
                    yield frames.error_frame(error_message);
                    break;
                }
                None => break,
            };
            chunks += 1;

            for payload in normalizer.process_chunk(chunk) {
                match frames.frame(&payload) {
                    Ok(frame) => yield frame,
                    Err(e) => warn!(id = %payload.id(), error = %e, "skipping unserializable payload"),
                }
            }
        }

        info!(
            mode,
            session = %session.thread_id,
            chunks,
            frames = frames.emitted(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stream finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::sync::Mutex;

    use crate::events::AgentMessage;

    // --- Scripted runtime ---

    /// Replays a fixed script of chunks, optionally failing partway.
    #[derive(Default)]
    struct ScriptedRuntime {
        scripts: Mutex<VecDeque<Result<Vec<Result<RawChunk, AgentError>>, AgentError>>>,
        reply: Option<String>,
        inputs: Mutex<Vec<RunInput>>,
    }

    impl ScriptedRuntime {
        fn with_chunks(chunks: Vec<Result<RawChunk, AgentError>>) -> Self {
            Self {
                scripts: Mutex::new(VecDeque::from([Ok(chunks)])),
                ..Default::default()
            }
        }

        fn failing_to_open() -> Self {
            Self {
                scripts: Mutex::new(VecDeque::from([Err(AgentError::Runtime(
                    "connection refused".into(),
                ))])),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl AgentRuntime for ScriptedRuntime {
        async fn stream(
            &self,
            input: RunInput,
            _session: &SessionKey,
        ) -> Result<RawEventStream, AgentError> {
            self.inputs.lock().await.push(input);
            let script = self
                .scripts
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))?;
            Ok(Box::pin(futures::stream::iter(script)))
        }

        async fn invoke(
            &self,
            _prompt: &str,
            _session: &SessionKey,
        ) -> Result<AgentMessage, AgentError> {
            match &self.reply {
                Some(text) => Ok(AgentMessage {
                    content: json!(text),
                    ..Default::default()
                }),
                None => Err(AgentError::Runtime("checkpoint store unavailable".into())),
            }
        }
    }

    /// Endless token stream that counts polls and notes when it is dropped.
    struct Tracked<S> {
        inner: S,
        polls: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl<S: Stream + Unpin> Stream for Tracked<S> {
        type Item = S::Item;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
            let this = self.get_mut();
            this.polls.fetch_add(1, Ordering::SeqCst);
            Pin::new(&mut this.inner).poll_next(cx)
        }
    }

    impl<S> Drop for Tracked<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct EndlessRuntime {
        polls: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AgentRuntime for EndlessRuntime {
        async fn stream(
            &self,
            _input: RunInput,
            _session: &SessionKey,
        ) -> Result<RawEventStream, AgentError> {
            Ok(Box::pin(Tracked {
                inner: futures::stream::repeat_with(|| Ok(token("m1", "more"))),
                polls: Arc::clone(&self.polls),
                dropped: Arc::clone(&self.dropped),
            }))
        }

        async fn invoke(
            &self,
            _prompt: &str,
            _session: &SessionKey,
        ) -> Result<AgentMessage, AgentError> {
            Err(AgentError::Runtime("not scripted".into()))
        }
    }

    // --- Helpers ---

    fn key() -> SessionKey {
        SessionKey::new("thread-1", "user-1", "org-1")
    }

    fn token(id: &str, text: &str) -> RawChunk {
        RawChunk::messages(json!([
            {"type": "AIMessageChunk", "id": id, "content": text},
            {"langgraph_node": "agent"}
        ]))
    }

    fn search_decision() -> RawChunk {
        RawChunk::updates(json!({"agent": {"messages": [{
            "type": "ai",
            "content": "",
            "tool_calls": [{"id": "abc", "name": "search_venues", "args": {"query": "loft"}}],
            "response_metadata": {"finish_reason": "tool_calls"}
        }]}}))
    }

    fn search_result() -> RawChunk {
        RawChunk::updates(json!({"tools": {"messages": [{
            "type": "tool",
            "name": "search_venues",
            "content": "2 venues",
            "artifact": {"total_results": 2},
            "tool_call_id": "abc"
        }]}}))
    }

    fn assistant(runtime: ScriptedRuntime) -> Assistant {
        Assistant::new(Arc::new(runtime))
    }

    fn data(frame: &Frame) -> Value {
        serde_json::from_str(frame.data()).unwrap()
    }

    // --- Tests ---

    #[tokio::test]
    async fn frames_follow_payload_order_with_sequential_ids() {
        let runtime = ScriptedRuntime::with_chunks(vec![
            Ok(token("m1", "Looking")),
            Ok(search_decision()),
            Ok(token("m2", "Found two")),
            Ok(search_result()),
            Ok(token("m3", "Here they are")),
        ]);
        let frames: Vec<Frame> = assistant(runtime).stream("find a loft", key()).collect().await;

        let ids: Vec<u64> = frames.iter().map(Frame::id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        let categories: Vec<Value> = frames.iter().map(|f| data(f)["category"].clone()).collect();
        assert_eq!(
            categories,
            vec![
                json!("text.chunk"),
                json!("reasoning"),
                json!("reasoning.chunk"),
                json!("reasoning"),
                json!("text.chunk"),
            ]
        );
        assert_eq!(data(&frames[2])["id"], "abc");
        assert_eq!(data(&frames[3])["type"], "response.end");
    }

    #[tokio::test]
    async fn frames_render_as_sse_records() {
        let runtime = ScriptedRuntime::with_chunks(vec![Ok(token("m1", "Hi"))]);
        let frames: Vec<Frame> = assistant(runtime).stream("hi", key()).collect().await;
        assert_eq!(
            frames[0].to_string(),
            "id: 0\ndata: {\"id\":\"m1\",\"content\":\"Hi\",\"type\":\"response\",\"category\":\"text.chunk\"}\n\n"
        );
    }

    #[tokio::test]
    async fn open_failure_yields_single_error_frame() {
        let frames: Vec<Frame> = assistant(ScriptedRuntime::failing_to_open())
            .stream("hi", key())
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), 0);
        assert_eq!(frames[0].data(), "{\"error\": \"Streaming error occurred\"}");
        assert!(frames[0].is_error());
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_error_frame() {
        let runtime = ScriptedRuntime::with_chunks(vec![
            Ok(token("m1", "Hel")),
            Ok(token("m1", "lo")),
            Err(AgentError::Runtime("connection reset".into())),
            Ok(token("m1", "never seen")),
        ]);
        let frames: Vec<Frame> = assistant(runtime).stream("hi", key()).collect().await;

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].id(), 2);
        assert!(frames[2].is_error());
    }

    #[tokio::test]
    async fn resume_failure_uses_resume_message() {
        let answers = BTreeMap::from([("What date?".to_string(), "June 3".to_string())]);
        let frames: Vec<Frame> = assistant(ScriptedRuntime::failing_to_open())
            .resume(answers, key())
            .collect()
            .await;
        assert_eq!(
            frames[0].data(),
            "{\"error\": \"Resume streaming error occurred\"}"
        );
    }

    #[tokio::test]
    async fn resume_passes_answers_to_runtime() {
        let runtime = Arc::new(ScriptedRuntime::default());
        let assistant = Assistant::new(runtime.clone());
        let answers = BTreeMap::from([("Guests?".to_string(), "80".to_string())]);

        let frames: Vec<Frame> = assistant.resume(answers.clone(), key()).collect().await;
        assert!(frames.is_empty());
        assert_eq!(runtime.inputs.lock().await[0], RunInput::Resume(answers));
    }

    #[tokio::test]
    async fn malformed_chunk_is_skipped_without_gap() {
        let runtime = ScriptedRuntime::with_chunks(vec![
            Ok(RawChunk::updates(json!({"tools": {"messages": "broken"}}))),
            Ok(token("m1", "still here")),
        ]);
        let frames: Vec<Frame> = assistant(runtime).stream("hi", key()).collect().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), 0);
    }

    #[tokio::test]
    async fn interrupt_surfaces_as_frame() {
        let runtime = ScriptedRuntime::with_chunks(vec![Ok(RawChunk::interrupt(
            json!({"questions": ["What date?"]}),
        ))]);
        let frames: Vec<Frame> = assistant(runtime).stream("book", key()).collect().await;
        let payload = data(&frames[0]);
        assert_eq!(payload["category"], "interrupt");
        assert_eq!(payload["content"], json!({"questions": ["What date?"]}));
    }

    #[tokio::test]
    async fn cancelled_stream_stops_pulling() {
        let runtime = ScriptedRuntime::with_chunks(vec![Ok(token("m1", "a")), Ok(token("m1", "b"))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let frames: Vec<Frame> = assistant(runtime)
            .stream_with_cancel(RunInput::Prompt("hi".into()), key(), cancel)
            .collect()
            .await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn dropping_frames_releases_runtime_stream() {
        let runtime = Arc::new(EndlessRuntime::default());
        let polls = Arc::clone(&runtime.polls);
        let dropped = Arc::clone(&runtime.dropped);

        let mut frames = Assistant::new(runtime).stream("hi", key());
        let first = frames.next().await.unwrap();
        assert_eq!(data(&first)["content"], "more");
        assert_eq!(polls.load(Ordering::SeqCst), 1);
        assert!(!dropped.load(Ordering::SeqCst));

        drop(frames);
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn legacy_phase_can_be_disabled() {
        let runtime = ScriptedRuntime::with_chunks(vec![
            Ok(search_decision()),
            Ok(token("m2", "Searching")),
        ]);
        let options = NormalizerOptions {
            legacy_chunk_phase: false,
            ..Default::default()
        };
        let frames: Vec<Frame> = assistant(runtime)
            .with_normalizer_options(options)
            .stream("hi", key())
            .collect()
            .await;
        assert_eq!(data(&frames[1])["type"], "response");
    }

    #[tokio::test]
    async fn invoke_returns_final_text() {
        let runtime = ScriptedRuntime {
            reply: Some("Three venues match.".into()),
            ..Default::default()
        };
        let response = assistant(runtime).invoke("find venues", &key()).await;
        assert_eq!(response.message, "Three venues match.");
    }

    #[tokio::test]
    async fn invoke_failure_returns_apology() {
        let response = assistant(ScriptedRuntime::default())
            .invoke("find venues", &key())
            .await;
        assert_eq!(response, InvokeResponse::failure());
        assert!(!response.message.contains("checkpoint"));
    }
}
