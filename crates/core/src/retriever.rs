//! Query-time ranking over the vector index.
//!
//! Three modes:
//! - similarity: top-K by cosine similarity
//! - threshold: similarity, minus hits below `score_threshold`
//! - diversity: maximal marginal relevance over `fetch_k` candidates,
//!   `MMR = λ × sim(query, doc) − (1 − λ) × max(sim(doc, selected))`

use crate::config::RetrieverConfig;
use crate::embeddings::cosine_similarity;
use crate::error::IndexError;
use crate::index::ScoredRecord;
use crate::models::{RetrievalResult, RetrievedChunk, SearchType};
use crate::traits::{ContextRetriever, VectorIndex};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, config: RetrieverConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> RetrieverConfig {
        self.config
    }

    pub async fn search(&self, query: &str) -> RetrievalResult {
        if !self.index.ensure_loaded().await {
            warn!("index not available, returning no documents");
            return Vec::new();
        }

        match self.try_search(query).await {
            Ok(results) => {
                info!(
                    mode = %self.config.search_type,
                    hits = results.len(),
                    "retrieved documents"
                );
                results
            }
            Err(cause) => {
                error!(reason = %cause, "document search failed");
                Vec::new()
            }
        }
    }

    async fn try_search(&self, query: &str) -> Result<RetrievalResult, IndexError> {
        let top_k = self.config.top_k.max(1);

        let ranked = match self.config.search_type {
            SearchType::Similarity => self
                .index
                .similarity_search(query, top_k)
                .await?
                .into_iter()
                .map(|record| {
                    let score = record.similarity;
                    (record, score)
                })
                .collect::<Vec<_>>(),
            SearchType::Threshold => self
                .index
                .similarity_search(query, top_k)
                .await?
                .into_iter()
                .filter(|record| record.similarity >= self.config.score_threshold)
                .map(|record| {
                    let score = record.similarity;
                    (record, score)
                })
                .collect(),
            SearchType::Diversity => {
                let candidates = self
                    .index
                    .similarity_search(query, self.config.fetch_k().max(top_k))
                    .await?;
                mmr_select(candidates, top_k, self.config.diversity_lambda)
            }
        };

        Ok(ranked
            .into_iter()
            .take(top_k)
            .map(|(record, score)| normalize(record, score))
            .collect())
    }
}

#[async_trait]
impl ContextRetriever for Retriever {
    async fn search(&self, query: &str) -> RetrievalResult {
        Retriever::search(self, query).await
    }
}

fn normalize(record: ScoredRecord, score: f32) -> RetrievedChunk {
    let metadata = record.chunk.metadata;
    RetrievedChunk {
        content: record.chunk.text,
        file_name: metadata.file_name.clone(),
        source: metadata.source.clone(),
        source_id: metadata.source_id.clone(),
        score,
        similarity: record.similarity,
        metadata,
    }
}

/// Greedy MMR. `candidates` carry their similarity to the query. Scores of
/// the returned sequence never increase, since each candidate's redundancy
/// can only grow as the selection grows.
pub fn mmr_select(
    candidates: Vec<ScoredRecord>,
    k: usize,
    lambda: f32,
) -> Vec<(ScoredRecord, f32)> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }

    let lambda = lambda.clamp(0.0, 1.0);
    let k = k.min(candidates.len());
    let mut remaining = candidates;
    let mut selected: Vec<(ScoredRecord, f32)> = Vec::with_capacity(k);

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (idx, candidate) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|(chosen, _)| cosine_similarity(&candidate.vector, &chosen.vector))
                .fold(0.0f32, f32::max);
            let score = lambda * candidate.similarity - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }

        let best = remaining.remove(best_idx);
        selected.push((best, best_score));
    }

    selected
}
