pub mod backends;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod library;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod retriever;
pub mod smalltalk;
pub mod traits;

pub use backends::{build_backend, LocalModelBackend, RemoteChatBackend};
pub use chunking::{split_spans, ChunkOrigin, Chunker, ChunkingConfig};
pub use config::RaqaConfig;
pub use embeddings::{
    cosine_similarity, CharacterNgramEmbedder, Embedder, EmbeddingManager, OpenAiEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ConfigError, GenerationError, IndexError, IngestError};
pub use extractor::{Extractor, FileKind};
pub use generation::{GenerationManager, GenerationOptions, GenerationOutcome, ModelAvailability};
pub use index::{EmbeddingIndex, IndexStats, IndexUpdate};
pub use ingest::{FileError, FileReport, FileStatus, IngestReport, IngestionPipeline};
pub use library::{DocumentLibrary, StoredDocument};
pub use models::{
    Answer, AnswerMetadata, AnswerSource, BackendKind, Chunk, ChunkMetadata, ModelInfo,
    ModelState, ModelStatus, RetrievalResult, RetrievedChunk, SearchType, SourceDocument,
};
pub use orchestrator::QaEngine;
pub use prompt::PromptAssembler;
pub use retriever::Retriever;
pub use traits::{ContextRetriever, GenerationBackend, GenerationRequest, VectorIndex};
