use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A file's extracted text, identified by the sha256 of its bytes.
///
/// Re-ingesting a file with different bytes produces a new document rather
/// than mutating the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source_id: String,
    pub file_name: String,
    pub source_path: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub extracted_at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub file_name: String,
    pub source_id: String,
    pub source: String,
    pub char_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub sequence: u64,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Similarity,
    #[serde(alias = "mmr")]
    Diversity,
    #[serde(alias = "similarity_score_threshold")]
    Threshold,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SearchType::Similarity => "similarity",
            SearchType::Diversity => "diversity",
            SearchType::Threshold => "threshold",
        };
        f.write_str(label)
    }
}

/// One ranked retrieval hit, already detached from the index's record layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub file_name: String,
    pub source: String,
    pub source_id: String,
    /// Ranking score under the active search type.
    pub score: f32,
    /// Raw cosine similarity to the query.
    pub similarity: f32,
    pub metadata: ChunkMetadata,
}

pub type RetrievalResult = Vec<RetrievedChunk>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    #[serde(alias = "openai")]
    Remote,
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Remote => f.write_str("remote"),
            BackendKind::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ModelStatus::Unloaded => "unloaded",
            ModelStatus::Loading => "loading",
            ModelStatus::Loaded => "loaded",
            ModelStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

/// Snapshot of the generation backend's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelState {
    pub status: ModelStatus,
    pub backend_kind: BackendKind,
    pub model_name: String,
    pub params: GenerationParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub type ModelInfo = ModelState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerSource {
    pub file_name: String,
    pub source_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub retrieved_documents: usize,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<AnswerSource>,
    pub metadata: AnswerMetadata,
}

impl Answer {
    pub(crate) fn without_sources(question: &str, answer: impl Into<String>) -> Self {
        Self {
            question: question.to_string(),
            answer: answer.into(),
            sources: Vec::new(),
            metadata: AnswerMetadata {
                retrieved_documents: 0,
                processing_time_ms: 0,
                model_info: None,
                error: None,
            },
        }
    }
}
