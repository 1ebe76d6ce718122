use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SearchError;

/// One nearest-neighbour hit: a venue id and its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
}

/// Semantic lookup over venue embeddings. Ranking is entirely the
/// backend's business; callers get ids back in the order it chose.
#[async_trait]
pub trait VenueIndex: Send + Sync {
    /// Top `top_k` venues nearest to `vector`, optionally restricted by
    /// equality `filters` on indexed metadata.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: Option<&Value>,
    ) -> Result<Vec<IndexMatch>, SearchError>;
}
