//! Venue retrieval: embed the query, ask a vector index for the nearest
//! venue ids, then load each venue document by id.

pub mod embedders;
pub mod embedding;
pub mod index;
pub mod store;
pub mod stores;
pub mod tool;

pub use embedders::openai::OpenAiEmbedder;
pub use embedding::{prepare_text, EmbeddingProvider, RetryPolicy};
pub use index::{IndexMatch, VenueIndex};
pub use store::VenueStore;
pub use stores::memory::{InMemoryVenueIndex, InMemoryVenueStore};
#[cfg(feature = "qdrant")]
pub use stores::qdrant::QdrantVenueIndex;
pub use tool::{SearchVenuesInput, SearchVenuesTool, VenueSearchResult, SEARCH_VENUES_TOOL};
