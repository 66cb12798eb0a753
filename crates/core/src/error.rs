use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension {found} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("index was built with embedder {expected}, refusing vectors from {found}")]
    EmbedderMismatch { expected: String, found: String },

    #[error("index has no entries")]
    EmptyIndex,

    #[error("no persisted index at {}", .0.display())]
    NotFound(PathBuf),

    #[error("no loadable indexes under {}", .0.display())]
    NoIndexesFound(PathBuf),

    #[error("persisted index at {} is corrupt: {details}", .path.display())]
    Corrupt { path: PathBuf, details: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("re-embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl IndexError {
    /// True for the conditions that only mean "nothing has been indexed yet".
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            IndexError::EmptyIndex | IndexError::NotFound(_) | IndexError::NoIndexesFound(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedder returned {found} dimensions, expected {expected}")]
    Dimension { expected: usize, found: usize },

    #[error("embedder returned {found} vectors for {expected} inputs")]
    BatchSize { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("generation returned no content")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
