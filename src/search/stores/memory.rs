use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SearchError;
use crate::search::index::{IndexMatch, VenueIndex};
use crate::search::store::VenueStore;

/// Brute-force cosine index held in memory. Fine for demos and tests.
#[derive(Default)]
pub struct InMemoryVenueIndex {
    entries: Vec<IndexedVenue>,
}

struct IndexedVenue {
    id: String,
    vector: Vec<f32>,
    metadata: Value,
}

impl InMemoryVenueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_venue(mut self, id: impl Into<String>, vector: Vec<f32>, metadata: Value) -> Self {
        self.entries.push(IndexedVenue {
            id: id.into(),
            vector,
            metadata,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Every filter key must be present in the metadata with an equal value.
fn matches_filters(metadata: &Value, filters: Option<&Value>) -> Result<bool, SearchError> {
    let Some(filters) = filters else {
        return Ok(true);
    };
    let Value::Object(conditions) = filters else {
        return Err(SearchError::InvalidArguments(
            "filters must be an object".into(),
        ));
    };
    Ok(conditions
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected)))
}

#[async_trait]
impl VenueIndex for InMemoryVenueIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: Option<&Value>,
    ) -> Result<Vec<IndexMatch>, SearchError> {
        let mut hits = Vec::new();
        for entry in &self.entries {
            if matches_filters(&entry.metadata, filters)? {
                hits.push(IndexMatch {
                    id: entry.id.clone(),
                    score: cosine(vector, &entry.vector),
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Venue documents keyed by id, held in memory.
#[derive(Default)]
pub struct InMemoryVenueStore {
    venues: HashMap<String, Value>,
}

impl InMemoryVenueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_venue(mut self, id: impl Into<String>, document: Value) -> Self {
        self.venues.insert(id.into(), document);
        self
    }
}

#[async_trait]
impl VenueStore for InMemoryVenueStore {
    async fn get(&self, id: &str) -> Result<Option<Value>, SearchError> {
        Ok(self.venues.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index() -> InMemoryVenueIndex {
        InMemoryVenueIndex::new()
            .with_venue("loft", vec![1.0, 0.0], json!({"city": "Austin"}))
            .with_venue("barn", vec![0.0, 1.0], json!({"city": "Dallas"}))
            .with_venue("gallery", vec![0.7, 0.7], json!({"city": "Austin"}))
    }

    #[tokio::test]
    async fn nearest_first() {
        let hits = index().query(&[1.0, 0.1], 2, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["loft", "gallery"]);
    }

    #[tokio::test]
    async fn filters_by_metadata() {
        let filters = json!({"city": "Dallas"});
        let hits = index().query(&[1.0, 0.0], 10, Some(&filters)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "barn");
    }

    #[tokio::test]
    async fn non_object_filters_are_rejected() {
        let filters = json!(["city"]);
        let err = index().query(&[1.0, 0.0], 10, Some(&filters)).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidArguments(_)));
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn store_lookup() {
        let store = InMemoryVenueStore::new().with_venue("loft", json!({"name": "The Loft"}));
        assert_eq!(store.get("loft").await.unwrap().unwrap()["name"], "The Loft");
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
