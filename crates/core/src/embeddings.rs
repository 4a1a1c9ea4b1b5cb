use crate::config::{EmbeddingConfig, EmbeddingProvider, DEFAULT_REMOTE_EMBEDDING_MODEL};
use crate::error::IndexError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const LOCAL_EMBEDDING_MODEL: &str = "local-char-ngram";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dimensions(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))
    }
}

/// Hashes character trigrams into a fixed number of buckets and
/// L2-normalises the result. Deterministic and fully offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        LOCAL_EMBEDDING_MODEL
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// OpenAI-compatible `POST {endpoint}/embeddings`.
pub struct OpenAiEmbedder {
    client: Client,
    url: Url,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, IndexError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| IndexError::Embedding("no API key configured".to_string()))?
            .to_string();

        let url = endpoint_url(&config.endpoint, "embeddings")?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;

        Ok(Self {
            client,
            url,
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_REMOTE_EMBEDDING_MODEL.to_string()),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn embed_one_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: batch,
                dimensions: self.dimensions,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::Embedding(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        vectors_in_input_order(parsed, batch.len(), self.dimensions)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_one_batch(batch).await?);
        }
        Ok(vectors)
    }
}

fn vectors_in_input_order(
    mut response: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, IndexError> {
    if response.data.len() != expected {
        return Err(IndexError::Embedding(format!(
            "expected {expected} embeddings, got {}",
            response.data.len()
        )));
    }
    response.data.sort_by_key(|datum| datum.index);

    response
        .data
        .into_iter()
        .map(|datum| {
            if datum.embedding.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    actual: datum.embedding.len(),
                });
            }
            Ok(datum.embedding)
        })
        .collect()
}

pub(crate) fn endpoint_url(base: &str, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)?.join(path)
}

/// Owns the active embedding function, created on first use.
pub struct EmbeddingManager {
    config: EmbeddingConfig,
    active: OnceLock<Arc<dyn Embedder>>,
}

impl EmbeddingManager {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            active: OnceLock::new(),
        }
    }

    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        let active = OnceLock::new();
        let _ = active.set(embedder);
        Self {
            config: EmbeddingConfig::default(),
            active,
        }
    }

    /// A remote provider that cannot be initialised is replaced by the
    /// default local embedder instead of failing the caller.
    pub fn embed_model(&self) -> Arc<dyn Embedder> {
        self.active
            .get_or_init(|| self.initialize())
            .clone()
    }

    fn initialize(&self) -> Arc<dyn Embedder> {
        match self.config.provider {
            EmbeddingProvider::Local => {
                let embedder = CharacterNgramEmbedder::new(self.config.dimensions);
                info!(
                    model = LOCAL_EMBEDDING_MODEL,
                    dimensions = embedder.dimensions(),
                    "using local embeddings"
                );
                Arc::new(embedder)
            }
            EmbeddingProvider::Remote => match OpenAiEmbedder::new(&self.config) {
                Ok(embedder) => {
                    info!(
                        model = %embedder.model,
                        dimensions = embedder.dimensions,
                        "using remote embeddings"
                    );
                    Arc::new(embedder)
                }
                Err(error) => {
                    warn!(
                        reason = %error,
                        "remote embeddings unavailable, falling back to local default"
                    );
                    Arc::new(CharacterNgramEmbedder::default())
                }
            },
        }
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let mut dot = 0f32;
    let mut left_norm = 0f32;
    let mut right_norm = 0f32;
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_text("Hydraulic pressure and flow");
        let second = embedder.embed_text("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed_text("abc");
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn similar_texts_score_higher_than_unrelated() {
        let embedder = CharacterNgramEmbedder::default();
        let query = embedder.embed_text("hydraulic pump pressure");
        let close = embedder.embed_text("the hydraulic pump loses pressure");
        let far = embedder.embed_text("quarterly marketing budget review");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn remote_without_key_falls_back_to_local_default() {
        let manager = EmbeddingManager::new(EmbeddingConfig {
            provider: EmbeddingProvider::Remote,
            api_key: None,
            dimensions: 1536,
            ..EmbeddingConfig::default()
        });
        let embedder = manager.embed_model();
        assert_eq!(embedder.model_name(), LOCAL_EMBEDDING_MODEL);
        assert_eq!(embedder.dimensions(), DEFAULT_EMBEDDING_DIMENSIONS);
    }

    #[test]
    fn embed_model_is_initialised_once() {
        let manager = EmbeddingManager::new(EmbeddingConfig::default());
        let first = manager.embed_model();
        let second = manager.embed_model();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn remote_vectors_are_reordered_and_dimension_checked() {
        let response = EmbeddingResponse {
            data: vec![
                EmbeddingDatum { index: 1, embedding: vec![0.0, 1.0] },
                EmbeddingDatum { index: 0, embedding: vec![1.0, 0.0] },
            ],
        };
        let vectors = vectors_in_input_order(response, 2, 2).expect("ordered vectors");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        let wrong = EmbeddingResponse {
            data: vec![EmbeddingDatum { index: 0, embedding: vec![1.0] }],
        };
        assert!(matches!(
            vectors_in_input_order(wrong, 1, 2),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn endpoint_join_tolerates_missing_trailing_slash() {
        let url = endpoint_url("https://api.openai.com/v1", "embeddings").expect("url");
        assert_eq!(url.as_str(), "https://api.openai.com/v1/embeddings");
    }
}
