use async_trait::async_trait;
use serde_json::Value;

use crate::error::SearchError;

/// Document lookup for venue records by id.
#[async_trait]
pub trait VenueStore: Send + Sync {
    /// The full venue document, or `None` if no venue has this id.
    async fn get(&self, id: &str) -> Result<Option<Value>, SearchError>;
}
