pub mod config;
pub mod embedding;
pub mod error;
pub mod events;
pub mod ingestion;
pub mod retrieval;
pub mod upsert;

pub use config::{BrokerSettings, EmbeddingSettings, ProviderKind, Settings, StorageSettings};
pub use embedding::{
    EmbeddingProvider, FastEmbedProvider, GeminiConfig, GeminiEmbedder, RetryPolicy,
    RetryingEmbedder,
};
pub use error::{InvalidEvent, ProviderError, Result, SyncError};
pub use events::{build_content, ChangeEvent, EventType, ProductPayload};
pub use ingestion::{
    Disposition, IngestionHandle, IngestionService, IngestionStatus, MessageHandler, Topology,
};
pub use retrieval::{Fusion, HybridSearch, RetrievalRequest, RetrievedProduct};
pub use upsert::{BackfillReport, UpsertEngine, UpsertOutcome};
