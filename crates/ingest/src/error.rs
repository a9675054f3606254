use attack_vector_store::VectorStoreError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Malformed JSON / JSONL or a wrong top-level shape
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or unusable classification keys
    #[error("Classification error: {0}")]
    Classification(String),

    /// An external capability is missing or unreachable
    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    #[error("Vector store error: {0}")]
    Store(#[source] VectorStoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<VectorStoreError> for IngestError {
    fn from(err: VectorStoreError) -> Self {
        match err {
            VectorStoreError::Unavailable(detail) => Self::Dependency(detail),
            other => Self::Store(other),
        }
    }
}

impl IngestError {
    /// Submission-level failures: the input itself is at fault.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Classification(_))
    }

    /// Process exit status for the CLI. Usage errors (1) never reach here.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        2
    }
}
