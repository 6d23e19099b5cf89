//! In-memory catalog store (development/testing)
//!
//! Records live in a `HashMap`; lexical matching uses a RAM-backed
//! [`LexicalIndex`], so search behaves exactly like the persistent backend.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::lexical::{LexicalIndex, LexicalLanguage};
use crate::record::{category_matches, cosine_distance, CatalogRecord, ProductId, RecordId};
use crate::store::{CatalogStore, CatalogTransaction, RowGuard, RowLocks, StorageBackend};

/// Internal storage
#[derive(Default)]
struct Records {
    by_id: HashMap<RecordId, CatalogRecord>,
    by_product: HashMap<ProductId, RecordId>,
}

impl Records {
    fn filtered<'a>(&'a self, category: Option<&'a str>) -> impl Iterator<Item = &'a CatalogRecord> {
        self.by_id.values().filter(move |record| match category {
            Some(filter) => category_matches(&record.metadata.category, filter),
            None => true,
        })
    }
}

/// Catalog store kept entirely in process memory
pub struct MemoryCatalogStore {
    records: Arc<RwLock<Records>>,
    lexical: LexicalIndex,
    locks: RowLocks,
}

impl MemoryCatalogStore {
    pub fn new() -> Result<Self> {
        Self::with_language(LexicalLanguage::default())
    }

    pub fn with_language(language: LexicalLanguage) -> Result<Self> {
        Ok(Self {
            records: Arc::new(RwLock::new(Records::default())),
            lexical: LexicalIndex::in_memory(language)?,
            locks: RowLocks::new(),
        })
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::InMemory
    }

    async fn begin<'a>(
        &'a self,
        product_id: ProductId,
    ) -> Result<Box<dyn CatalogTransaction + 'a>> {
        let guard = self.locks.acquire(product_id).await;
        let existing = self.get_by_product_id(product_id).await?;
        Ok(Box::new(MemoryTransaction {
            store: self,
            product_id,
            existing,
            staged: None,
            finished: false,
            _guard: guard,
        }))
    }

    async fn get_by_product_id(&self, product_id: ProductId) -> Result<Option<CatalogRecord>> {
        let records = self.records.read().await;
        Ok(records
            .by_product
            .get(&product_id)
            .and_then(|id| records.by_id.get(id))
            .cloned())
    }

    async fn fetch(&self, ids: &[RecordId]) -> Result<Vec<CatalogRecord>> {
        let records = self.records.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| records.by_id.get(id).cloned())
            .collect())
    }

    async fn semantic_search(
        &self,
        vector: &[f32],
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<CatalogRecord>> {
        let records = self.records.read().await;
        let mut scored: Vec<(f32, &CatalogRecord)> = records
            .filtered(category)
            .map(|record| (cosine_distance(vector, &record.embedding), record))
            .collect();

        // Ties fall back to product id so repeated queries return the same order
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.product_id.cmp(&b.1.product_id))
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<CatalogRecord>> {
        let ids = match category {
            Some(_) => self.lexical.search(query, None)?,
            None => self.lexical.search(query, Some(limit))?,
        };
        let mut hits = self.fetch(&ids).await?;
        if let Some(filter) = category {
            hits.retain(|record| category_matches(&record.metadata.category, filter));
        }
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, category: Option<&str>) -> Result<usize> {
        Ok(self.records.read().await.filtered(category).count())
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<CatalogRecord>> {
        let records = self.records.read().await;
        let mut listed: Vec<CatalogRecord> = records.filtered(category).cloned().collect();
        listed.sort_by_key(|record| record.product_id);
        Ok(listed)
    }
}

/// Transaction over [`MemoryCatalogStore`]
struct MemoryTransaction<'a> {
    store: &'a MemoryCatalogStore,
    product_id: ProductId,
    existing: Option<CatalogRecord>,
    staged: Option<CatalogRecord>,
    finished: bool,
    _guard: RowGuard,
}

#[async_trait]
impl CatalogTransaction for MemoryTransaction<'_> {
    fn product_id(&self) -> ProductId {
        self.product_id
    }

    fn existing(&self) -> Option<&CatalogRecord> {
        self.existing.as_ref()
    }

    fn stage(&mut self, record: CatalogRecord) {
        self.staged = Some(record);
    }

    async fn commit(&mut self) -> Result<()> {
        if self.finished {
            return Err(StoreError::Transaction(format!(
                "transaction for product {} already finished",
                self.product_id
            )));
        }
        self.finished = true;

        let Some(record) = self.staged.take() else {
            return Ok(());
        };
        if record.product_id != self.product_id {
            return Err(StoreError::Transaction(format!(
                "record for product {} staged in transaction for product {}",
                record.product_id, self.product_id
            )));
        }

        // Lexical first: if it fails nothing else has been touched
        self.store.lexical.upsert(&record).await?;

        let mut records = self.store.records.write().await;
        if let Some(previous) = records.by_product.insert(record.product_id, record.id) {
            if previous != record.id {
                records.by_id.remove(&previous);
            }
        }
        records.by_id.insert(record.id, record);

        debug!("Committed product {} to memory store", self.product_id);
        Ok(())
    }

    async fn rollback(&mut self) {
        self.staged = None;
        self.finished = true;
    }
}
