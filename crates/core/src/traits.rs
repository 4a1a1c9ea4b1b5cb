use crate::error::{GenerationError, IndexError};
use crate::index::{IndexUpdate, ScoredRecord};
use crate::models::{BackendKind, Chunk, RetrievalResult};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn ensure_loaded(&self) -> bool;

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<IndexUpdate, IndexError>;

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError>;

    async fn contains_source(&self, source_id: &str) -> bool;
}

#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Never fails: an unavailable index is an empty result.
    async fn search(&self, query: &str) -> RetrievalResult;
}

/// Everything a backend needs for one completion.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn model_name(&self) -> &str;

    /// Prepares the backend. Called at most once per successful load.
    async fn load(&self) -> Result<(), GenerationError>;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Cheap availability check used for status listings.
    async fn is_available(&self) -> bool;
}
