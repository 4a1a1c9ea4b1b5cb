use crate::embeddings::{cosine_similarity, Embedder, EmbeddingManager};
use crate::error::IndexError;
use crate::models::Chunk;
use crate::traits::VectorIndex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const INDEX_FILE: &str = "index.json";
const INDEX_TMP_FILE: &str = "index.json.tmp";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedVector {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    embedding_model: String,
    dimensions: usize,
    records: Vec<IndexedVector>,
}

impl IndexFile {
    fn empty(embedder: &dyn Embedder) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            embedding_model: embedder.model_name().to_string(),
            dimensions: embedder.dimensions(),
            records: Vec::new(),
        }
    }

    fn stats(&self) -> IndexStats {
        let documents = self
            .records
            .iter()
            .map(|record| record.chunk.metadata.source_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        IndexStats {
            documents,
            chunks: self.records.len(),
            dimensions: self.dimensions,
            embedding_model: self.embedding_model.clone(),
        }
    }

    fn check_compatible(&self, embedder: &dyn Embedder) -> Result<(), IndexError> {
        if self.dimensions != embedder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedder.dimensions(),
            });
        }
        if self.embedding_model != embedder.model_name() {
            return Err(IndexError::ModelMismatch {
                expected: self.embedding_model.clone(),
                actual: embedder.model_name().to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub dimensions: usize,
    pub embedding_model: String,
}

/// What one `add` changed. Documents are identified by `source_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexUpdate {
    pub inserted_chunks: usize,
    pub skipped_documents: Vec<String>,
    pub replaced_documents: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub similarity: f32,
}

/// Chunk vectors persisted as a single JSON document under one root directory.
///
/// Writers must be serialised by the caller; the internal lock only keeps the
/// in-memory copy consistent.
pub struct EmbeddingIndex {
    root: PathBuf,
    embeddings: EmbeddingManager,
    state: RwLock<Option<IndexFile>>,
}

impl EmbeddingIndex {
    pub fn new(root: impl Into<PathBuf>, embeddings: EmbeddingManager) -> Self {
        Self {
            root: root.into(),
            embeddings,
            state: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn embed_model(&self) -> Arc<dyn Embedder> {
        self.embeddings.embed_model()
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// `Ok(None)` when nothing has been persisted yet.
    pub async fn load(&self) -> Result<Option<IndexStats>, IndexError> {
        let Some(file) = self.read_from_disk().await? else {
            warn!(path = %self.root.display(), "no persisted index found");
            return Ok(None);
        };

        let stats = file.stats();
        info!(
            path = %self.root.display(),
            documents = stats.documents,
            chunks = stats.chunks,
            "loaded index"
        );
        *self.state.write().await = Some(file);
        Ok(Some(stats))
    }

    async fn read_from_disk(&self) -> Result<Option<IndexFile>, IndexError> {
        let path = self.index_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let file: IndexFile = serde_json::from_slice(&bytes)?;
        if file.format_version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index format version {}",
                file.format_version
            )));
        }
        if let Some(record) = file
            .records
            .iter()
            .find(|record| record.vector.len() != file.dimensions)
        {
            return Err(IndexError::DimensionMismatch {
                expected: file.dimensions,
                actual: record.vector.len(),
            });
        }
        file.check_compatible(self.embed_model().as_ref())?;
        Ok(Some(file))
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.is_some()
    }

    pub async fn stats(&self) -> Option<IndexStats> {
        self.state.read().await.as_ref().map(IndexFile::stats)
    }

    /// Returns `false` instead of an error; the cause is logged.
    pub async fn add(&self, chunks: &[Chunk]) -> bool {
        match self.try_add(chunks).await {
            Ok(update) => {
                debug!(inserted = update.inserted_chunks, "index add finished");
                true
            }
            Err(cause) => {
                error!(reason = %cause, chunks = chunks.len(), "failed to add chunks to index");
                false
            }
        }
    }

    /// Inserts chunks grouped by document. A document already indexed under
    /// the same `source_id` is skipped; one indexed from the same source path
    /// with a different `source_id` has its old chunks replaced.
    pub async fn try_add(&self, chunks: &[Chunk]) -> Result<IndexUpdate, IndexError> {
        if chunks.is_empty() {
            return Ok(IndexUpdate::default());
        }

        let embedder = self.embed_model();
        let mut guard = self.state.write().await;

        let mut next = match guard.as_ref() {
            Some(current) => current.clone(),
            None => match self.read_from_disk().await? {
                Some(existing) => existing,
                None => {
                    info!(path = %self.root.display(), "creating new index");
                    IndexFile::empty(embedder.as_ref())
                }
            },
        };
        next.check_compatible(embedder.as_ref())?;

        let indexed_sources: HashSet<String> = next
            .records
            .iter()
            .map(|record| record.chunk.metadata.source_id.clone())
            .collect();
        let mut indexed_by_path: HashMap<String, HashSet<String>> = HashMap::new();
        for record in &next.records {
            indexed_by_path
                .entry(record.chunk.metadata.source.clone())
                .or_default()
                .insert(record.chunk.metadata.source_id.clone());
        }

        let mut update = IndexUpdate::default();
        let mut fresh: Vec<&Chunk> = Vec::new();
        let mut superseded: HashSet<String> = HashSet::new();
        let mut seen_in_batch: HashSet<&str> = HashSet::new();

        for chunk in chunks {
            let source_id = chunk.metadata.source_id.as_str();
            if indexed_sources.contains(source_id) {
                if seen_in_batch.insert(source_id) {
                    update.skipped_documents.push(source_id.to_string());
                }
                continue;
            }
            if seen_in_batch.insert(source_id) {
                if let Some(previous) = indexed_by_path.get(&chunk.metadata.source) {
                    superseded.insert(chunk.metadata.source.clone());
                    let mut previous: Vec<&String> = previous.iter().collect();
                    previous.sort();
                    update.replaced_documents.extend(previous.into_iter().cloned());
                }
            }
            fresh.push(chunk);
        }

        if fresh.is_empty() {
            info!(skipped = update.skipped_documents.len(), "all documents already indexed");
            return Ok(update);
        }

        let texts: Vec<String> = fresh.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != fresh.len() {
            return Err(IndexError::Embedding(format!(
                "embedding count {} doesn't match chunk count {}",
                vectors.len(),
                fresh.len()
            )));
        }

        if !superseded.is_empty() {
            next.records
                .retain(|record| !superseded.contains(&record.chunk.metadata.source));
        }
        for (chunk, vector) in fresh.into_iter().zip(vectors) {
            if vector.len() != next.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: next.dimensions,
                    actual: vector.len(),
                });
            }
            next.records.push(IndexedVector {
                chunk: chunk.clone(),
                vector,
            });
            update.inserted_chunks += 1;
        }

        self.persist(&next).await?;
        info!(
            inserted = update.inserted_chunks,
            replaced = update.replaced_documents.len(),
            skipped = update.skipped_documents.len(),
            total = next.records.len(),
            "index persisted"
        );
        *guard = Some(next);
        Ok(update)
    }

    async fn persist(&self, file: &IndexFile) -> Result<(), IndexError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let payload = serde_json::to_vec(file)?;
        let tmp = self.root.join(INDEX_TMP_FILE);
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, self.index_path()).await?;
        Ok(())
    }

    pub async fn contains_source(&self, source_id: &str) -> bool {
        self.state.read().await.as_ref().is_some_and(|file| {
            file.records
                .iter()
                .any(|record| record.chunk.metadata.source_id == source_id)
        })
    }

    /// Loads the persisted index if it is not in memory yet.
    pub async fn ensure_loaded(&self) -> bool {
        if self.is_loaded().await {
            return true;
        }
        match self.load().await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(cause) => {
                error!(reason = %cause, path = %self.root.display(), "index could not be loaded");
                false
            }
        }
    }

    /// Brute-force cosine ranking over every stored vector, best first.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        if k == 0 || !self.ensure_loaded().await {
            return Ok(Vec::new());
        }

        let embedder = self.embed_model();
        let query_vector = embedder.embed_query(query).await?;

        let guard = self.state.read().await;
        let Some(file) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        if query_vector.len() != file.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: file.dimensions,
                actual: query_vector.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexedVector)> = file
            .records
            .iter()
            .map(|record| (cosine_similarity(&query_vector, &record.vector), record))
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(similarity, record)| ScoredRecord {
                chunk: record.chunk.clone(),
                vector: record.vector.clone(),
                similarity,
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for EmbeddingIndex {
    async fn ensure_loaded(&self) -> bool {
        EmbeddingIndex::ensure_loaded(self).await
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<IndexUpdate, IndexError> {
        self.try_add(chunks).await
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        EmbeddingIndex::similarity_search(self, query, k).await
    }

    async fn contains_source(&self, source_id: &str) -> bool {
        if !EmbeddingIndex::ensure_loaded(self).await {
            return false;
        }
        EmbeddingIndex::contains_source(self, source_id).await
    }
}
