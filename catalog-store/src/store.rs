//! Storage abstraction shared by the LanceDB and in-memory backends
//!
//! Writes go through a [`CatalogTransaction`] scoped to one product id.
//! Opening a transaction takes that product's row lock, so two upserts of
//! the same product are serialized while different products proceed
//! independently.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;
use crate::record::{CatalogRecord, ProductId, RecordId};

/// Storage backend type indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-memory storage (development/testing only)
    InMemory,
    /// LanceDB table plus on-disk Tantivy index
    Lance,
}

/// Read and write access to the derived catalog records
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Which backend this store runs on
    fn backend(&self) -> StorageBackend;

    /// Lock `product_id` and load its current record, if any
    async fn begin<'a>(&'a self, product_id: ProductId)
        -> Result<Box<dyn CatalogTransaction + 'a>>;

    /// Look up the record for one external product
    async fn get_by_product_id(&self, product_id: ProductId) -> Result<Option<CatalogRecord>>;

    /// Load records by id, preserving the order of `ids` and skipping unknown ids
    async fn fetch(&self, ids: &[RecordId]) -> Result<Vec<CatalogRecord>>;

    /// Records ordered by ascending cosine distance to `vector`
    async fn semantic_search(
        &self,
        vector: &[f32],
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<CatalogRecord>>;

    /// Records whose lexical index matches every analysed term of `query`
    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<CatalogRecord>>;

    /// Number of records, optionally restricted to a category
    async fn count(&self, category: Option<&str>) -> Result<usize>;

    /// All records, optionally restricted to a category
    async fn list(&self, category: Option<&str>) -> Result<Vec<CatalogRecord>>;
}

/// A unit of work on a single product's record
///
/// Nothing is visible to readers until [`commit`](Self::commit) succeeds.
/// Dropping the transaction without committing discards the staged record.
#[async_trait]
pub trait CatalogTransaction: Send {
    /// Product this transaction is scoped to
    fn product_id(&self) -> ProductId;

    /// Record as it was when the transaction began
    fn existing(&self) -> Option<&CatalogRecord>;

    /// Stage the record to write on commit, replacing anything staged earlier
    fn stage(&mut self, record: CatalogRecord);

    /// Persist the staged record atomically; on error nothing is persisted
    async fn commit(&mut self) -> Result<()>;

    /// Discard the staged record
    async fn rollback(&mut self);
}

/// Per-product async locks
///
/// Only transactions touching the same product id contend. An entry lives
/// while some task holds or waits for it and is dropped with the last guard.
#[derive(Debug, Default, Clone)]
pub struct RowLocks {
    locks: Arc<DashMap<ProductId, Arc<Mutex<()>>>>,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `product_id`
    pub async fn acquire(&self, product_id: ProductId) -> RowGuard {
        let lock = self
            .locks
            .entry(product_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        RowGuard {
            guard: Some(guard),
            product_id,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of products currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one product id, released on drop
#[derive(Debug)]
pub struct RowGuard {
    guard: Option<OwnedMutexGuard<()>>,
    product_id: ProductId,
    locks: Arc<DashMap<ProductId, Arc<Mutex<()>>>>,
}

impl RowGuard {
    pub fn product_id(&self) -> ProductId {
        self.product_id
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        // Release first so the map's clone is the only one left when idle
        self.guard.take();
        self.locks
            .remove_if(&self.product_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_product_is_serialized() {
        let locks = RowLocks::new();
        let guard = locks.acquire(1).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(1).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_products_do_not_contend() {
        let locks = RowLocks::new();
        let _first = locks.acquire(1).await;

        let second = tokio::time::timeout(Duration::from_millis(100), locks.acquire(2)).await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_released_locks_are_forgotten() {
        let locks = RowLocks::new();
        for product_id in 0..100 {
            let guard = locks.acquire(product_id).await;
            assert_eq!(guard.product_id(), product_id);
        }
        assert!(locks.is_empty());

        let held = locks.acquire(7).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(7).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter still shares the entry, so releasing must keep it
        drop(held);
        assert!(locks.len() <= 1);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
