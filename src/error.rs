#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("tool error: {0}")]
    Tool(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// Failure to interpret one raw runtime event. Always recoverable: the
/// offending event is logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed {entry} entry: {reason}")]
    Malformed { entry: &'static str, reason: String },
    #[error("agent requested {count} tool calls in one message, expected exactly one")]
    MultipleToolCalls { count: usize },
    #[error("agent finished with tool_calls but requested no tool")]
    MissingToolCall,
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl NormalizeError {
    pub(crate) fn malformed(entry: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            entry,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload id must not be empty")]
    EmptyId,
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("index error: {0}")]
    Index(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}
