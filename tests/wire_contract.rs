//! End-to-end: ReactRuntime with a scripted model and the in-memory venue
//! search, driven through the Assistant, checked at the wire.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use venue_agent::search::{
    EmbeddingProvider, InMemoryVenueIndex, InMemoryVenueStore, SearchVenuesTool,
    SEARCH_VENUES_TOOL,
};
use venue_agent::{
    Assistant, ContentBlock, Frame, InferenceError, InferenceProvider, InferenceRequest,
    InferenceResponse, InvokeResponse, ReactRuntime, RuntimeConfig, SearchError, SessionKey,
    StopReason, ToolRegistry, Usage, CLARIFICATION_TOOL,
};

struct ScriptedModel {
    responses: Mutex<VecDeque<InferenceResponse>>,
}

impl ScriptedModel {
    fn new(responses: Vec<InferenceResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl InferenceProvider for ScriptedModel {
    async fn infer(&self, _request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| InferenceError::ApiError {
                status: 503,
                body: "model overloaded".into(),
            })
    }
}

/// One axis per keyword, enough to rank the fixture venues.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        Ok(["loft", "barn", "garden"]
            .iter()
            .map(|k| if text.contains(k) { 1.0 } else { 0.0 })
            .collect())
    }

    fn dimensions(&self) -> usize {
        3
    }
}

fn reply(id: &str, text: &str) -> InferenceResponse {
    InferenceResponse {
        id: Some(id.into()),
        stop_reason: StopReason::EndTurn,
        content: vec![ContentBlock::Text(text.into())],
        usage: Usage::default(),
    }
}

fn call(id: &str, name: &str, input: Value) -> InferenceResponse {
    InferenceResponse {
        id: Some(format!("msg-{id}")),
        stop_reason: StopReason::ToolUse,
        content: vec![ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }],
        usage: Usage::default(),
    }
}

fn assistant(responses: Vec<InferenceResponse>) -> Assistant {
    let index = InMemoryVenueIndex::new()
        .with_venue("loft-1", vec![1.0, 0.0, 0.0], json!({"city": "Austin"}))
        .with_venue("barn-1", vec![0.0, 1.0, 0.0], json!({"city": "Austin"}))
        .with_venue("garden-1", vec![0.0, 0.0, 1.0], json!({"city": "Denver"}));
    let store = InMemoryVenueStore::new()
        .with_venue("loft-1", json!({"name": "Warehouse Loft"}))
        .with_venue("barn-1", json!({"name": "Red Oak Barn"}))
        .with_venue("garden-1", json!({"name": "Cherry Creek Garden"}));
    let search = SearchVenuesTool::new(Arc::new(KeywordEmbedder), Arc::new(index), Arc::new(store));
    let tools = ToolRegistry::new().add(SEARCH_VENUES_TOOL, SearchVenuesTool::schema(), search);

    let runtime = ReactRuntime::new(ScriptedModel::new(responses), tools, RuntimeConfig::default());
    Assistant::new(Arc::new(runtime))
}

fn session() -> SessionKey {
    SessionKey::new("thread-42", "user-7", "org-3")
}

fn parsed(frames: &[Frame]) -> Vec<Value> {
    frames
        .iter()
        .map(|f| serde_json::from_str(f.data()).unwrap())
        .collect()
}

fn assert_sequential(frames: &[Frame]) {
    let ids: Vec<u64> = frames.iter().map(Frame::id).collect();
    let expected: Vec<u64> = (0..frames.len() as u64).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn search_round_streams_reasoning_then_reply() {
    let assistant = assistant(vec![
        call("call_1", SEARCH_VENUES_TOOL, json!({"query": "loft", "filters": {"city": "Austin"}, "top_k": 2})),
        reply("msg-2", "Warehouse Loft is a great fit."),
    ]);

    let frames: Vec<Frame> = assistant.stream("a loft in Austin", session()).collect().await;
    assert_sequential(&frames);
    let data = parsed(&frames);
    assert_eq!(data.len(), 3);

    assert_eq!(data[0]["category"], "reasoning");
    assert_eq!(data[0]["type"], "response.start");
    assert_eq!(data[0]["id"], "call_1");
    assert_eq!(data[0]["content"]["name"], SEARCH_VENUES_TOOL);
    assert_eq!(data[0]["content"]["content"]["query"], "loft");

    assert_eq!(data[1]["category"], "reasoning");
    assert_eq!(data[1]["type"], "response.end");
    assert_eq!(data[1]["id"], "call_1");
    assert_eq!(data[1]["content"]["artifact"]["total_results"], 2);
    assert_eq!(
        data[1]["content"]["artifact"]["venues"][0]["name"],
        "Warehouse Loft"
    );

    assert_eq!(data[2]["category"], "text.chunk");
    assert_eq!(data[2]["id"], "msg-2");
    assert_eq!(data[2]["content"], "Warehouse Loft is a great fit.");
}

#[tokio::test]
async fn clarification_pauses_then_resumes() {
    let assistant = assistant(vec![
        call("ask_1", CLARIFICATION_TOOL, json!({"questions": ["What city?", "How many guests?"]})),
        call("call_2", SEARCH_VENUES_TOOL, json!({"query": "garden", "filters": {"city": "Denver"}})),
        reply("msg-3", "Cherry Creek Garden seats 150."),
    ]);

    let frames: Vec<Frame> = assistant.stream("help me find a venue", session()).collect().await;
    let data = parsed(&frames);
    assert_eq!(data.len(), 1, "clarification call itself stays off the wire");
    assert_eq!(data[0]["category"], "interrupt");
    assert_eq!(data[0]["type"], "response");
    assert_eq!(data[0]["content"]["questions"][1], "How many guests?");
    assert!(!data[0]["id"].as_str().unwrap().is_empty());

    let answers = BTreeMap::from([
        ("What city?".to_string(), "Denver".to_string()),
        ("How many guests?".to_string(), "120".to_string()),
    ]);
    let frames: Vec<Frame> = assistant.resume(answers, session()).collect().await;
    assert_sequential(&frames);
    let data = parsed(&frames);
    let categories: Vec<&str> = data.iter().map(|d| d["category"].as_str().unwrap()).collect();
    assert_eq!(categories, vec!["reasoning", "reasoning", "text.chunk"]);
    assert!(data
        .iter()
        .all(|d| d["content"]["name"] != CLARIFICATION_TOOL));
    assert_eq!(data[1]["content"]["artifact"]["venues"][0]["name"], "Cherry Creek Garden");
}

#[tokio::test]
async fn model_failure_mid_run_ends_with_error_frame() {
    let assistant = assistant(vec![call("call_1", SEARCH_VENUES_TOOL, json!({"query": "barn"}))]);

    let frames: Vec<Frame> = assistant.stream("a barn", session()).collect().await;
    assert_sequential(&frames);
    assert_eq!(frames.len(), 3);
    let last = frames.last().unwrap();
    assert!(last.is_error());
    assert_eq!(last.data(), "{\"error\": \"Streaming error occurred\"}");
    assert!(last.to_string().starts_with("id: 2\ndata: "));
}

#[tokio::test]
async fn resume_without_questions_reports_resume_error() {
    let frames: Vec<Frame> = assistant(vec![])
        .resume(BTreeMap::new(), session())
        .collect()
        .await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].id(), 0);
    assert_eq!(
        frames[0].data(),
        "{\"error\": \"Resume streaming error occurred\"}"
    );
}

#[tokio::test]
async fn invoke_returns_only_the_final_text() {
    let assistant = assistant(vec![
        call("call_1", SEARCH_VENUES_TOOL, json!({"query": "barn"})),
        reply("msg-2", "Red Oak Barn is available."),
    ]);
    let response = assistant.invoke("a barn", &session()).await;
    assert_eq!(response, InvokeResponse::new("Red Oak Barn is available."));
}

#[tokio::test]
async fn invoke_failure_is_an_apology() {
    let response = assistant(vec![]).invoke("anything", &session()).await;
    assert_eq!(
        response.message,
        "An error occurred while processing your request. Please try again."
    );
}
