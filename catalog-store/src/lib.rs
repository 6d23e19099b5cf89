//! # Catalog Store (catalog-store)
//!
//! Durable storage for the derived product search records that back hybrid
//! retrieval: one record per external product, holding denormalized content,
//! its embedding, typed metadata and a lexical index over the content.
//!
//! ## Backends
//!
//! - [`LanceCatalogStore`]: LanceDB table with a cosine-distance vector
//!   column, plus an on-disk Tantivy index.
//! - [`MemoryCatalogStore`]: process-local store for development and tests.
//!
//! ## Writes
//!
//! All writes go through a [`CatalogTransaction`] scoped to one product id:
//!
//! ```no_run
//! use catalog_store::{
//!     CatalogRecord, CatalogStore, CatalogTransaction, MemoryCatalogStore, ProductMetadata,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = MemoryCatalogStore::new()?;
//!
//!     let mut tx = store.begin(42).await?;
//!     let record = match tx.existing().cloned() {
//!         Some(mut record) => {
//!             record.overwrite("Produto: Baixo.".into(), vec![0.1; 4], ProductMetadata::default());
//!             record
//!         }
//!         None => CatalogRecord::new(42, "Produto: Baixo.".into(), vec![0.1; 4], ProductMetadata::default()),
//!     };
//!     tx.stage(record);
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Analytics
//!
//! [`Analytics`] answers filtered counts, filtered average price and
//! price/stock rankings over any store.

pub mod analytics;
pub mod error;
pub mod lance;
pub mod lexical;
pub mod memory;
pub mod record;
pub mod store;

// Re-export main types for convenience
pub use analytics::{Analytics, RankingQuery, SortDirection, SortKey, SortSpec};
pub use error::{Result, StoreError};
pub use lance::LanceCatalogStore;
pub use lexical::{LexicalIndex, LexicalLanguage};
pub use memory::MemoryCatalogStore;
pub use record::{
    category_matches, cosine_distance, CatalogRecord, ProductId, ProductMetadata, RecordId,
    DEFAULT_CATEGORY,
};
pub use store::{CatalogStore, CatalogTransaction, RowGuard, RowLocks, StorageBackend};
