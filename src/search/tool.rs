use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::SearchError;
use crate::search::embedding::EmbeddingProvider;
use crate::search::index::VenueIndex;
use crate::search::store::VenueStore;
use crate::tools::{ToolHandler, ToolOutput};

pub const SEARCH_VENUES_TOOL: &str = "search_venues";

fn default_top_k() -> usize {
    15
}

/// Arguments the model passes to `search_venues`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SearchVenuesInput {
    pub query: String,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub reason: String,
}

/// Structured search result; also the tool's artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueSearchResult {
    pub query: String,
    pub filters: Option<Value>,
    pub total_results: usize,
    pub venues: Vec<Value>,
}

/// The venue search tool: embed, query the index, load documents.
pub struct SearchVenuesTool {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VenueIndex>,
    store: Arc<dyn VenueStore>,
}

impl SearchVenuesTool {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VenueIndex>,
        store: Arc<dyn VenueStore>,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
        }
    }

    pub fn schema() -> Value {
        json!({
            "name": SEARCH_VENUES_TOOL,
            "description": "Search for venues based on a query string, returning the top matching venues.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The query to search for venues"
                    },
                    "filters": {
                        "type": "object",
                        "description": "Optional filters to apply to the search (e.g., location, capacity)"
                    },
                    "top_k": {
                        "type": "integer",
                        "description": "The number of venues to return. 15-20 is recommended",
                        "default": default_top_k()
                    },
                    "reason": {
                        "type": "string",
                        "description": "The reason for the search"
                    }
                },
                "required": ["query"]
            }
        })
    }

    pub async fn search(&self, input: &SearchVenuesInput) -> Result<VenueSearchResult, SearchError> {
        let vector = self.embedder.embed(&input.query).await?;
        let matches = self
            .index
            .query(&vector, input.top_k, input.filters.as_ref())
            .await?;
        info!(query = %input.query, matches = matches.len(), "venue index queried");

        let mut venues = Vec::with_capacity(matches.len());
        for hit in &matches {
            match self.store.get(&hit.id).await {
                Ok(Some(mut venue)) => {
                    if let Value::Object(ref mut doc) = venue {
                        doc.entry("_id").or_insert_with(|| json!(hit.id));
                    }
                    venues.push(venue);
                }
                Ok(None) => warn!(id = %hit.id, "venue not found in store"),
                Err(e) => warn!(id = %hit.id, error = %e, "venue lookup failed, skipping"),
            }
        }

        info!(retrieved = venues.len(), "venue search complete");
        Ok(VenueSearchResult {
            query: input.query.clone(),
            filters: input.filters.clone(),
            total_results: venues.len(),
            venues,
        })
    }
}

#[async_trait]
impl ToolHandler for SearchVenuesTool {
    async fn call(&self, input: &Value) -> Result<ToolOutput, String> {
        let input: SearchVenuesInput = serde_json::from_value(input.clone())
            .map_err(|e| SearchError::InvalidArguments(e.to_string()).to_string())?;
        let result = self.search(&input).await.map_err(|e| e.to_string())?;
        let artifact = serde_json::to_value(&result).map_err(|e| e.to_string())?;
        let content = serde_json::to_string_pretty(&artifact).map_err(|e| e.to_string())?;
        Ok(ToolOutput::new(content, artifact))
    }
}
