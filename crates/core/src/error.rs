use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("path is not a file: {0}")]
    NotAFile(String),

    #[error("file too large: {size} bytes (maximum {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    Docx(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("document storage is full: {used} of {max} bytes used, file needs {needed}")]
    CorpusFull { used: u64, max: u64, needed: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl IngestError {
    /// Validation failures are reported without ever reading the file contents.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IngestError::NotFound(_)
                | IngestError::NotAFile(_)
                | IngestError::TooLarge { .. }
                | IngestError::UnsupportedType(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding dimension mismatch: index uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding model mismatch: index built with {expected}, active model is {actual}")]
    ModelMismatch { expected: String, actual: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model is not loaded")]
    NotLoaded,

    #[error("model load failed: {0}")]
    Load(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation task aborted: {0}")]
    TaskAborted(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
