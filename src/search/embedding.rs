use std::time::Duration;

use async_trait::async_trait;

use crate::error::SearchError;

/// Longest text sent to the embedding model, in characters.
pub const MAX_EMBEDDING_CHARS: usize = 20_480;

/// Embedding provider trait. OpenAI, local model, whatever.
/// Implement this to plug in your embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    /// Embed a batch of texts. Default implementation calls `embed` in sequence.
    /// Override for providers that support native batching.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimensionality of the embedding vectors this provider produces.
    fn dimensions(&self) -> usize;
}

/// Exponential backoff for embedding requests that fail transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based): doubles each time,
    /// capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Collapse whitespace runs and cap the length so the text fits the
/// embedding model's token limit. Truncated text ends with `...`.
pub fn prepare_text(text: &str) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() <= MAX_EMBEDDING_CHARS {
        return cleaned;
    }
    tracing::warn!(
        chars = cleaned.chars().count(),
        max = MAX_EMBEDDING_CHARS,
        "text too long for embedding, truncating"
    );
    let mut truncated: String = cleaned.chars().take(MAX_EMBEDDING_CHARS).collect();
    truncated.push_str("...");
    truncated
}
