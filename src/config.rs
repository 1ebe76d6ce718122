use std::path::PathBuf;

use crate::error::AgentError;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
pub const DEFAULT_COLLECTION: &str = "venue-embeddings";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are the Venue Booking Specialist. You help users find the right venue for their event \
through natural conversation.

1. Acknowledge the request and say what you will help with.
2. Gather the essentials together in one go (event type, date, guest count, location, budget, \
style) by calling `user-assistance`. Only follow up when something critical is missing.
3. Summarize the requirements and ask the user to confirm.
4. Once confirmed, call `search_venues` right away and ask for 15-20 venues.
5. Present the best matches with a short comparison, then offer to help plan a budget.

Keep tool-call reasons brief and never invent venues that the search did not return.";

/// Runtime settings, usually read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub qdrant_url: Option<String>,
    pub venue_collection: String,
    /// Where file checkpoints go. `None` keeps threads in memory.
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: crate::inference::openai::DEFAULT_BASE_URL.into(),
            openai_model: DEFAULT_MODEL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            qdrant_url: None,
            venue_collection: DEFAULT_COLLECTION.into(),
            checkpoint_dir: None,
        }
    }
}

impl Settings {
    /// Read settings from process environment variables.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AgentError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let embedding_dimensions = match get("EMBEDDING_DIMENSIONS") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                AgentError::Config(format!("EMBEDDING_DIMENSIONS is not a number: {raw}"))
            })?,
            None => defaults.embedding_dimensions,
        };

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            embedding_model: get("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dimensions,
            qdrant_url: get("QDRANT_URL"),
            venue_collection: get("VENUE_COLLECTION").unwrap_or(defaults.venue_collection),
            checkpoint_dir: get("CHECKPOINT_DIR").map(PathBuf::from),
        })
    }
}

/// How the tool-calling loop runs.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Model calls allowed per run before the loop gives up.
    pub max_turns: usize,
    pub system_prompt: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            temperature: 0.3,
            max_tokens: None,
            max_turns: 20,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }
}
