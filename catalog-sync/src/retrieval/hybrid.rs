//! Hybrid product retrieval: semantic + lexical rankings fused with RRF

use std::collections::HashMap;
use std::sync::Arc;

use catalog_store::{CatalogRecord, CatalogStore, ProductMetadata, RecordId, SortSpec};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::fusion::Fusion;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, SyncError};

/// Default number of products returned
pub const DEFAULT_K: usize = 5;

/// Candidates pulled from each ranking per requested result
const CANDIDATE_FACTOR: usize = 2;

/// A retrieval query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    /// Case-insensitive substring match on the product category
    pub category: Option<String>,
    /// Re-order the fused results by price or stock
    pub sort: Option<SortSpec>,
    pub k: Option<usize>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn k(&self) -> usize {
        self.k.unwrap_or(DEFAULT_K)
    }
}

/// What retrieval hands to its consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedProduct {
    pub content: String,
    pub metadata: ProductMetadata,
}

impl From<CatalogRecord> for RetrievedProduct {
    fn from(record: CatalogRecord) -> Self {
        Self {
            content: record.content,
            metadata: record.metadata,
        }
    }
}

/// Hybrid search over a catalog store
pub struct HybridSearch {
    store: Arc<dyn CatalogStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    fusion: Fusion,
}

impl HybridSearch {
    pub fn new(store: Arc<dyn CatalogStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            fusion: Fusion::default(),
        }
    }

    pub fn with_fusion(mut self, fusion: Fusion) -> Self {
        self.fusion = fusion;
        self
    }

    /// Top K products for the request
    pub async fn search(&self, request: &RetrievalRequest) -> Result<Vec<RetrievedProduct>> {
        Ok(self
            .search_records(request)
            .await?
            .into_iter()
            .map(RetrievedProduct::from)
            .collect())
    }

    /// Top K full records for the request
    pub async fn search_records(&self, request: &RetrievalRequest) -> Result<Vec<CatalogRecord>> {
        let k = request.k();
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = k.saturating_mul(CANDIDATE_FACTOR);
        let category = request.category.as_deref();

        let semantic = async {
            let vector = self.embedder.embed_query(&request.query).await?;
            let hits = self.store.semantic_search(&vector, candidates, category).await?;
            Ok::<_, SyncError>(hits)
        };
        let lexical = async {
            let hits = self
                .store
                .lexical_search(&request.query, candidates, category)
                .await?;
            Ok::<_, SyncError>(hits)
        };
        let (semantic, lexical): (Vec<CatalogRecord>, Vec<CatalogRecord>) =
            tokio::try_join!(semantic, lexical)?;

        debug!(
            "Query {:?}: {} semantic, {} lexical candidates",
            request.query,
            semantic.len(),
            lexical.len()
        );

        let semantic_ids: Vec<RecordId> = semantic.iter().map(|r| r.id).collect();
        let lexical_ids: Vec<RecordId> = lexical.iter().map(|r| r.id).collect();
        let ranked = self
            .fusion
            .top(&[semantic_ids.as_slice(), lexical_ids.as_slice()], k);

        let mut by_id: HashMap<RecordId, CatalogRecord> = lexical
            .into_iter()
            .chain(semantic)
            .map(|record| (record.id, record))
            .collect();
        let mut records: Vec<CatalogRecord> =
            ranked.iter().filter_map(|id| by_id.remove(id)).collect();

        if let Some(sort) = request.sort {
            sort.sort(&mut records);
        }
        Ok(records)
    }
}
