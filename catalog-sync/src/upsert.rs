//! Create-or-update of catalog records from change events
//!
//! The engine is where data problems and infrastructure problems part ways:
//! an event without a product id or name is reported as
//! [`UpsertOutcome::Skipped`], while embedding and storage failures are
//! returned as errors after the store transaction has been rolled back.

use std::fmt;
use std::sync::Arc;

use catalog_store::{CatalogRecord, CatalogStore, ProductId};
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::{InvalidEvent, Result};
use crate::events::{ChangeEvent, EventType, ProductPayload};

/// What an upsert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(ProductId),
    Updated(ProductId),
    Skipped(InvalidEvent),
}

impl UpsertOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, UpsertOutcome::Skipped(_))
    }
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertOutcome::Inserted(id) => write!(f, "inserted product {}", id),
            UpsertOutcome::Updated(id) => write!(f, "updated product {}", id),
            UpsertOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

/// Counts reported by [`UpsertEngine::backfill`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub inserted: usize,
    pub already_present: usize,
    pub invalid: usize,
    pub failed: usize,
}

/// Applies change events to the catalog store
#[derive(Clone)]
pub struct UpsertEngine {
    store: Arc<dyn CatalogStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn CatalogStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Validate a decoded payload and upsert it
    pub async fn apply(&self, payload: ProductPayload, event_type: EventType) -> Result<UpsertOutcome> {
        match ChangeEvent::from_payload(payload, event_type) {
            Ok(event) => self.upsert(&event).await,
            Err(reason) => {
                info!("Skipping {} event: {}", event_type, reason);
                Ok(UpsertOutcome::Skipped(reason))
            }
        }
    }

    /// Embed the event content and write its record in one transaction
    pub async fn upsert(&self, event: &ChangeEvent) -> Result<UpsertOutcome> {
        let content = event.content();
        // Embedding may sit in backoff for a while; no row lock is held yet
        let embedding = self.embedder.embed(&content).await?;

        let mut tx = self.store.begin(event.product_id).await?;
        let (record, outcome) = match tx.existing().cloned() {
            Some(mut record) => {
                record.overwrite(content, embedding, event.metadata());
                (record, UpsertOutcome::Updated(event.product_id))
            }
            None => (
                CatalogRecord::new(event.product_id, content, embedding, event.metadata()),
                UpsertOutcome::Inserted(event.product_id),
            ),
        };
        tx.stage(record);

        if let Err(e) = tx.commit().await {
            tx.rollback().await;
            warn!("Rolled back product {}: {}", event.product_id, e);
            return Err(e.into());
        }

        info!("Product {} ({} event): {}", event.product_id, event.event_type, outcome);
        Ok(outcome)
    }

    /// Bulk sync that only creates records for products not yet present
    ///
    /// Individual failures are logged and counted; the rest of the batch
    /// still runs.
    pub async fn backfill(&self, payloads: Vec<ProductPayload>) -> BackfillReport {
        let mut report = BackfillReport::default();
        for payload in payloads {
            let event = match ChangeEvent::from_payload(payload, EventType::Created) {
                Ok(event) => event,
                Err(reason) => {
                    debug!("Backfill skipping payload: {}", reason);
                    report.invalid += 1;
                    continue;
                }
            };

            match self.store.get_by_product_id(event.product_id).await {
                Ok(Some(_)) => {
                    report.already_present += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Backfill lookup of product {} failed: {}", event.product_id, e);
                    report.failed += 1;
                    continue;
                }
            }

            match self.upsert(&event).await {
                Ok(UpsertOutcome::Inserted(_)) => report.inserted += 1,
                // Another writer created it after the lookup
                Ok(_) => report.already_present += 1,
                Err(e) => {
                    warn!("Backfill of product {} failed: {}", event.product_id, e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "Backfill finished: {} inserted, {} already present, {} invalid, {} failed",
            report.inserted, report.already_present, report.invalid, report.failed
        );
        report
    }
}
