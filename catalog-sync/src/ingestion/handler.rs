//! Per-message processing: decode, upsert, decide ack or dead-letter

use tracing::{error, info, warn};

use crate::events::{EventType, ProductPayload};
use crate::upsert::UpsertEngine;

/// How a delivery is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed or deliberately skipped
    Ack,
    /// Negative acknowledgement without requeue; the broker routes it to the DLQ
    DeadLetter,
}

/// Turns a raw delivery into a [`Disposition`]
#[derive(Clone)]
pub struct MessageHandler {
    engine: UpsertEngine,
}

impl MessageHandler {
    pub fn new(engine: UpsertEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &UpsertEngine {
        &self.engine
    }

    pub async fn handle(&self, routing_key: &str, body: &[u8]) -> Disposition {
        let payload = match ProductPayload::decode(body) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Invalid message on '{}', dead-lettering: {}", routing_key, e);
                return Disposition::DeadLetter;
            }
        };

        let event_type = EventType::from_routing_key(routing_key).unwrap_or_else(|| {
            warn!("Unrecognized routing key '{}', treating as update", routing_key);
            EventType::Updated
        });
        info!(
            "Received product {} | event: {}",
            payload.id.map_or_else(|| "?".to_string(), |id| id.to_string()),
            routing_key
        );

        match self.engine.apply(payload, event_type).await {
            // Skips are acknowledged too; invalid events never reach the DLQ
            Ok(_) => Disposition::Ack,
            Err(e) => {
                error!("Failed to sync message on '{}', dead-lettering: {}", routing_key, e);
                Disposition::DeadLetter
            }
        }
    }
}
