use thiserror::Error;

/// Result type for record operations
pub type Result<T> = std::result::Result<T, RecordError>;

/// Errors raised while interpreting a canonical record
#[derive(Error, Debug)]
pub enum RecordError {
    /// The value is valid JSON but not an object
    #[error("Record is not a JSON object")]
    NotAnObject,

    /// Malformed JSON text
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// `important.category` or `important.sub_category` is missing or not a string
    #[error("Missing important.category or important.sub_category")]
    MissingClassification,
}
