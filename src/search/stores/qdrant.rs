use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointId, ScrollPointsBuilder,
    SearchPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::Value;

use crate::error::SearchError;
use crate::search::index::{IndexMatch, VenueIndex};
use crate::search::store::VenueStore;

/// Payload key holding the venue's own id. Qdrant point ids must be UUIDs
/// or integers, venue ids need not be.
const VENUE_ID_KEY: &str = "venue_id";

/// Qdrant-backed venue index. Vectors live in the collection, the venue
/// document in each point's payload, so it doubles as the document store.
pub struct QdrantVenueIndex {
    client: Qdrant,
    collection: String,
    dimensions: usize,
}

impl QdrantVenueIndex {
    /// Connect to a Qdrant instance and ensure the collection exists.
    pub async fn new(url: &str, collection: &str, dimensions: usize) -> Result<Self, SearchError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| SearchError::Index(format!("failed to connect to qdrant: {e}")))?;

        let index = Self {
            client,
            collection: collection.to_string(),
            dimensions,
        };

        index.ensure_collection().await?;
        Ok(index)
    }

    async fn ensure_collection(&self) -> Result<(), SearchError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| SearchError::Index(format!("failed to check collection: {e}")))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| SearchError::Index(format!("failed to create collection: {e}")))?;
        }

        Ok(())
    }
}

#[async_trait]
impl VenueIndex for QdrantVenueIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: Option<&Value>,
    ) -> Result<Vec<IndexMatch>, SearchError> {
        let mut builder =
            SearchPointsBuilder::new(&self.collection, vector.to_vec(), top_k as u64)
                .with_payload(true);
        if let Some(filters) = filters {
            builder = builder.filter(build_filter(filters)?);
        }

        let results = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| SearchError::Index(format!("search failed: {e}")))?;

        Ok(results
            .result
            .into_iter()
            .map(|point| IndexMatch {
                id: venue_id(&point.payload).unwrap_or_else(|| point_id_to_string(&point.id)),
                score: point.score,
            })
            .collect())
    }
}

#[async_trait]
impl VenueStore for QdrantVenueIndex {
    async fn get(&self, id: &str) -> Result<Option<Value>, SearchError> {
        let result = self
            .client
            .scroll(
                ScrollPointsBuilder::new(&self.collection)
                    .filter(Filter::must([Condition::matches(
                        VENUE_ID_KEY,
                        id.to_string(),
                    )]))
                    .limit(1)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await
            .map_err(|e| SearchError::Store(format!("lookup failed: {e}")))?;

        Ok(result.result.into_iter().next().map(|point| {
            Value::Object(
                point
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            )
        }))
    }
}

/// Equality filters only: `{"city": "Austin", "indoor": true}`.
fn build_filter(filters: &Value) -> Result<Filter, SearchError> {
    let Value::Object(map) = filters else {
        return Err(SearchError::InvalidArguments(
            "filters must be an object".into(),
        ));
    };

    let mut conditions = Vec::with_capacity(map.len());
    for (key, value) in map {
        let condition = match value {
            Value::String(s) => Condition::matches(key.as_str(), s.clone()),
            Value::Bool(b) => Condition::matches(key.as_str(), *b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Condition::matches(key.as_str(), i),
                None => {
                    return Err(SearchError::InvalidArguments(format!(
                        "filter {key} must be an integer"
                    )))
                }
            },
            other => {
                return Err(SearchError::InvalidArguments(format!(
                    "unsupported filter value for {key}: {other}"
                )))
            }
        };
        conditions.push(condition);
    }
    Ok(Filter::must(conditions))
}

fn venue_id(payload: &HashMap<String, QdrantValue>) -> Option<String> {
    payload
        .get(VENUE_ID_KEY)
        .and_then(|v| v.as_str())
        .cloned()
        .filter(|s| !s.is_empty())
}

fn point_id_to_string(id: &Option<PointId>) -> String {
    match id {
        Some(pid) => match &pid.point_id_options {
            Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s)) => s.clone(),
            Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => n.to_string(),
            None => String::new(),
        },
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_equality_filter() {
        let filter = build_filter(&json!({"city": "Austin", "capacity": 120, "indoor": true})).unwrap();
        assert_eq!(filter.must.len(), 3);
    }

    #[test]
    fn rejects_nested_filters() {
        assert!(build_filter(&json!({"capacity": {"$gte": 100}})).is_err());
        assert!(build_filter(&json!("city")).is_err());
    }
}
