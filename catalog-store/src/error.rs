//! Error types for catalog storage operations
//!
//! Every failure raised while reading or writing derived search records
//! surfaces as a [`StoreError`]. Callers treat all of them as infrastructure
//! problems: a failed write is rolled back and propagated.

use thiserror::Error;

/// Main error type for catalog storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// LanceDB driver error (wrapper)
    #[error("LanceDB error: {0}")]
    Lance(#[from] lancedb::Error),

    /// Arrow batch construction or decoding error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// Tantivy lexical index error
    #[error("Lexical index error: {0}")]
    Lexical(#[from] tantivy::TantivyError),

    /// Filesystem error while opening the on-disk stores
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored rows do not match the expected table layout
    #[error("Schema error: {0}")]
    Schema(String),

    /// Embedding length differs from the table's vector column
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Write attempted while the lexical index is switched to read-only
    #[error("Lexical index is read-only")]
    ReadOnly,

    /// Transaction used after it was committed or rolled back
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for catalog storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StoreError::DimensionMismatch {
            expected: 768,
            actual: 384,
        };
        assert_eq!(
            error.to_string(),
            "Embedding dimension mismatch: expected 768, got 384"
        );

        let error = StoreError::Schema("missing column 'content'".to_string());
        assert!(error.to_string().contains("missing column"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: StoreError = io.into();
        assert!(matches!(error, StoreError::Io(_)));
    }
}
