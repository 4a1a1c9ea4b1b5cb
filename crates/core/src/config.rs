use crate::error::ConfigError;
use crate::models::{BackendKind, GenerationParams, SearchType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_REMOTE_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_LOCAL_CHAT_MODEL: &str = "tinyllama";
pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://api.openai.com/v1/";
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:11434/";
pub const DEFAULT_REMOTE_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const MEGABYTE: u64 = 1024 * 1024;

/// Immutable configuration for every component.
///
/// Components take the section they need at construction; changing settings
/// means building new components from a new value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RaqaConfig {
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingConfig,
    pub retriever: RetrieverConfig,
    pub prompt: PromptConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub document_root: PathBuf,
    pub index_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from("data/uploaded_docs"),
            index_dir: PathBuf::from("data/vectorstore"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_file_size_mb: u64,
    pub max_total_size_mb: u64,
    pub max_files: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 20,
            max_total_size_mb: 200,
            max_files: 10,
        }
    }
}

impl LimitsConfig {
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(MEGABYTE)
    }

    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_size_mb.saturating_mul(MEGABYTE)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Local,
    #[serde(alias = "openai")]
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: Option<String>,
    pub dimensions: usize,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            model: None,
            dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            endpoint: DEFAULT_REMOTE_ENDPOINT.to_string(),
            api_key: None,
            batch_size: 64,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrieverConfig {
    pub search_type: SearchType,
    pub top_k: usize,
    pub score_threshold: f32,
    pub diversity_lambda: f32,
    pub fetch_multiplier: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            search_type: SearchType::Similarity,
            top_k: 4,
            score_threshold: 0.5,
            diversity_lambda: 0.7,
            fetch_multiplier: 2,
        }
    }
}

impl RetrieverConfig {
    pub fn fetch_k(&self) -> usize {
        self.top_k.saturating_mul(self.fetch_multiplier.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub template: String,
    pub max_context_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template: "standard".to_string(),
            max_context_chars: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub backend: BackendKind,
    pub model_name: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Remote,
            model_name: None,
            temperature: 0.1,
            max_tokens: 512,
            timeout_seconds: 60,
            endpoint: None,
            api_key: None,
        }
    }
}

impl GenerationConfig {
    pub fn resolved_model_name(&self) -> String {
        match (&self.model_name, self.backend) {
            (Some(name), _) if !name.trim().is_empty() => name.trim().to_string(),
            (_, BackendKind::Remote) => DEFAULT_REMOTE_CHAT_MODEL.to_string(),
            (_, BackendKind::Local) => DEFAULT_LOCAL_CHAT_MODEL.to_string(),
        }
    }

    pub fn resolved_endpoint(&self) -> String {
        match (&self.endpoint, self.backend) {
            (Some(endpoint), _) if !endpoint.trim().is_empty() => endpoint.trim().to_string(),
            (_, BackendKind::Remote) => DEFAULT_REMOTE_ENDPOINT.to_string(),
            (_, BackendKind::Local) => DEFAULT_LOCAL_ENDPOINT.to_string(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout_seconds: self.timeout_seconds,
        }
    }
}

impl RaqaConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RaqaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Fills API keys left empty in the file from `OPENAI_API_KEY`.
    pub fn with_env_overrides(mut self) -> Self {
        let env_key = std::env::var(API_KEY_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        if let Some(key) = env_key {
            if blank(&self.generation.api_key) {
                self.generation.api_key = Some(key.clone());
            }
            if blank(&self.embedding.api_key) {
                self.embedding.api_key = Some(key);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunking.chunk_size must be > 0".to_string()));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }

        let retriever = &self.retriever;
        if retriever.top_k < 1 {
            return Err(ConfigError::Invalid("retriever.top_k must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&retriever.score_threshold) {
            return Err(ConfigError::Invalid(
                "retriever.score_threshold must be in [0.0, 1.0]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&retriever.diversity_lambda) {
            return Err(ConfigError::Invalid(
                "retriever.diversity_lambda must be in [0.0, 1.0]".to_string(),
            ));
        }

        let generation = &self.generation;
        if !(0.0..=1.0).contains(&generation.temperature) {
            return Err(ConfigError::Invalid(
                "generation.temperature must be in [0.0, 1.0]".to_string(),
            ));
        }
        if generation.max_tokens < 1 {
            return Err(ConfigError::Invalid("generation.max_tokens must be >= 1".to_string()));
        }
        if generation.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "generation.timeout_seconds must be > 0".to_string(),
            ));
        }
        Url::parse(&generation.resolved_endpoint())?;

        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid("embedding.dimensions must be > 0".to_string()));
        }
        if self.embedding.provider == EmbeddingProvider::Remote {
            Url::parse(&self.embedding.endpoint)?;
        }

        if self.limits.max_file_size_mb == 0 || self.limits.max_files == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_file_size_mb and limits.max_files must be > 0".to_string(),
            ));
        }
        if self.prompt.max_context_chars == 0 {
            return Err(ConfigError::Invalid(
                "prompt.max_context_chars must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Startup checks that never block ingestion; each warning is meant to be logged loudly.
    pub fn preflight(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.generation.backend == BackendKind::Remote && blank(&self.generation.api_key) {
            warnings.push(format!(
                "remote generation backend selected but no API key configured (set {API_KEY_ENV})"
            ));
        }
        if self.embedding.provider == EmbeddingProvider::Remote && blank(&self.embedding.api_key) {
            warnings.push(format!(
                "remote embeddings selected but no API key configured (set {API_KEY_ENV}); the local embedder will be used"
            ));
        }

        for dir in [&self.storage.document_root, &self.storage.index_dir] {
            if let Err(error) = std::fs::create_dir_all(dir) {
                warnings.push(format!("could not create directory {}: {error}", dir.display()));
            }
        }

        warnings
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}
