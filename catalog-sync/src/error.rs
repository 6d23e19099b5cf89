//! Error taxonomy for catalog synchronization
//!
//! - [`ProviderError`]: embedding provider failures, split into a retryable
//!   transient class (rate limiting / quota exhaustion) and everything else.
//! - [`InvalidEvent`]: well-formed payloads that lack required fields. These
//!   are data problems, reported as a skip and never dead-lettered.
//! - [`SyncError`]: infrastructure failures that propagate to the ingestion
//!   pipeline, which dead-letters the message.

use catalog_store::{ProductId, StoreError};
use thiserror::Error;

/// Failure reported by an embedding provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Resource exhaustion (rate limit, quota); safe to retry after a delay
    #[error("transient embedding provider error: {0}")]
    Transient(String),

    /// Authentication, validation or decoding failure; retrying cannot help
    #[error("embedding provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Retry predicate used by the embedding retry policy
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Change event missing a field the upsert cannot do without
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidEvent {
    #[error("event has no product id")]
    MissingProductId,

    #[error("event for product {0} has no name")]
    MissingName(ProductId),
}

/// Errors that abort processing of a change event
#[derive(Error, Debug)]
pub enum SyncError {
    /// Body is not UTF-8 JSON of the expected shape
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Embedding failed (after retries, for transient failures)
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Catalog store failure; the transaction was rolled back
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Broker connection or channel failure
    #[error("transport error: {0}")]
    Transport(#[from] lapin::Error),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::MalformedPayload(e.to_string())
    }
}

impl From<std::str::Utf8Error> for SyncError {
    fn from(e: std::str::Utf8Error) -> Self {
        SyncError::MalformedPayload(format!("body is not UTF-8: {}", e))
    }
}

/// Result type alias for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;
