//! Product retrieval for the conversational layer
//!
//! Runs a semantic (cosine distance) and a lexical (stemmed full-text)
//! ranking concurrently and fuses them with Reciprocal Rank Fusion.

pub mod fusion;
pub mod hybrid;

pub use fusion::{FusedItem, Fusion, DEFAULT_RRF_K};
pub use hybrid::{HybridSearch, RetrievalRequest, RetrievedProduct, DEFAULT_K};
