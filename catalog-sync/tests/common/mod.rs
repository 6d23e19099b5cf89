//! Test doubles shared by the integration tests
#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use catalog_store::{
    CatalogRecord, CatalogStore, CatalogTransaction, MemoryCatalogStore, ProductId,
    ProductMetadata, RecordId, Result as StoreResult, StorageBackend, StoreError,
};
use catalog_sync::{EmbeddingProvider, ProviderError};

/// Embedding provider that replays scripted failures, then embeds
/// deterministically (bag of hashed words, or a pinned vector per text)
pub struct ScriptedProvider {
    dimension: usize,
    failures: Mutex<VecDeque<ProviderError>>,
    pinned: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            failures: Mutex::new(VecDeque::new()),
            pinned: HashMap::new(),
            calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` calls with a transient error
    pub fn failing_transiently(self, n: usize) -> Self {
        self.failing_with((0..n).map(|i| ProviderError::Transient(format!("429 #{}", i + 1))))
    }

    pub fn failing_with(self, errors: impl IntoIterator<Item = ProviderError>) -> Self {
        self.failures.lock().unwrap().extend(errors);
        self
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimension);
        self.pinned.insert(text.to_string(), vector);
        self
    }

    /// Every call, queries included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            vector[(hasher.finish() as usize) % self.dimension] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self
            .pinned
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.hashed(text)))
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ProviderError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.embed(query).await
    }
}

/// Memory store whose commits can be made to fail
pub struct FailingCommitStore {
    inner: MemoryCatalogStore,
    fail_commits: AtomicBool,
    rollbacks: AtomicUsize,
}

impl FailingCommitStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryCatalogStore::new().unwrap(),
            fail_commits: AtomicBool::new(false),
            rollbacks: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_commits.store(failing, Ordering::SeqCst);
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryCatalogStore {
        &self.inner
    }
}

struct FailingTransaction<'a> {
    inner: Box<dyn CatalogTransaction + 'a>,
    fail: bool,
    rollbacks: &'a AtomicUsize,
}

#[async_trait]
impl CatalogTransaction for FailingTransaction<'_> {
    fn product_id(&self) -> ProductId {
        self.inner.product_id()
    }

    fn existing(&self) -> Option<&CatalogRecord> {
        self.inner.existing()
    }

    fn stage(&mut self, record: CatalogRecord) {
        self.inner.stage(record);
    }

    async fn commit(&mut self) -> StoreResult<()> {
        if self.fail {
            return Err(StoreError::Transaction("injected commit failure".to_string()));
        }
        self.inner.commit().await
    }

    async fn rollback(&mut self) {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await;
    }
}

#[async_trait]
impl CatalogStore for FailingCommitStore {
    fn backend(&self) -> StorageBackend {
        self.inner.backend()
    }

    async fn begin<'a>(
        &'a self,
        product_id: ProductId,
    ) -> StoreResult<Box<dyn CatalogTransaction + 'a>> {
        let inner = self.inner.begin(product_id).await?;
        Ok(Box::new(FailingTransaction {
            inner,
            fail: self.fail_commits.load(Ordering::SeqCst),
            rollbacks: &self.rollbacks,
        }))
    }

    async fn get_by_product_id(&self, product_id: ProductId) -> StoreResult<Option<CatalogRecord>> {
        self.inner.get_by_product_id(product_id).await
    }

    async fn fetch(&self, ids: &[RecordId]) -> StoreResult<Vec<CatalogRecord>> {
        self.inner.fetch(ids).await
    }

    async fn semantic_search(
        &self,
        vector: &[f32],
        limit: usize,
        category: Option<&str>,
    ) -> StoreResult<Vec<CatalogRecord>> {
        self.inner.semantic_search(vector, limit, category).await
    }

    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> StoreResult<Vec<CatalogRecord>> {
        self.inner.lexical_search(query, limit, category).await
    }

    async fn count(&self, category: Option<&str>) -> StoreResult<usize> {
        self.inner.count(category).await
    }

    async fn list(&self, category: Option<&str>) -> StoreResult<Vec<CatalogRecord>> {
        self.inner.list(category).await
    }
}

/// Write a record straight into a store, bypassing embedding
pub async fn put_record(
    store: &dyn CatalogStore,
    product_id: ProductId,
    content: &str,
    embedding: Vec<f32>,
    metadata: ProductMetadata,
) -> CatalogRecord {
    let record = CatalogRecord::new(product_id, content.to_string(), embedding, metadata);
    let mut tx = store.begin(product_id).await.unwrap();
    tx.stage(record.clone());
    tx.commit().await.unwrap();
    record
}

pub fn metadata(category: &str, price: f64, stock: i64) -> ProductMetadata {
    ProductMetadata {
        price,
        category: category.to_string(),
        stock,
    }
}
