//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Every fallible operation in the library returns [`Result`]. Variants map
//! one-to-one onto the failure classes callers dispatch on: validation
//! failures become HTTP 400s, a dimension mismatch is a configuration
//! conflict (409), provider failures are upstream errors (502), and so on.
//! Expected empty outcomes (no matching documents for a question) are values,
//! not errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied input was rejected before any work happened.
    #[error("validation error: {0}")]
    Validation(String),

    /// File format is not one of the supported document types.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Text extraction from a stored document failed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The embedding provider returned an error or malformed response.
    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// A vector's dimensionality does not match the active collection.
    #[error(
        "embedding dimension mismatch: index expects {expected}, got {actual}; \
         reset the index or revert the embedding configuration"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector index operation failed.
    #[error("index error: {0}")]
    Index(String),

    /// A referenced document or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The language model backend returned an error.
    #[error("language model error: {0}")]
    Llm(String),

    /// Configuration is missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Stable machine-readable code for the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::Extraction(_) => "extraction_error",
            Error::Embedding(_) => "embedding_error",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::Index(_) => "index_error",
            Error::NotFound(_) => "not_found",
            Error::Llm(_) => "llm_error",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
            Error::Database(_) => "database_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_names_both_sizes() {
        let err = Error::DimensionMismatch {
            expected: 768,
            actual: 1536,
        };
        let msg = err.to_string();
        assert!(msg.contains("768"));
        assert!(msg.contains("1536"));
        assert!(msg.contains("reset the index"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), "io_error");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Validation("x".into()).code(), "validation_error");
        assert_eq!(Error::NotFound("x".into()).code(), "not_found");
        assert_eq!(
            Error::DimensionMismatch {
                expected: 1,
                actual: 2
            }
            .code(),
            "dimension_mismatch"
        );
    }
}
