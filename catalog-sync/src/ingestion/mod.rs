//! Durable ingestion of product change events from the message broker

pub mod consumer;
pub mod handler;
pub mod topology;

pub use consumer::{IngestionHandle, IngestionService, IngestionStatus};
pub use handler::{Disposition, MessageHandler};
pub use topology::Topology;
