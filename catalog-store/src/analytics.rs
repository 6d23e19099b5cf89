//! Quantitative queries over the catalog metadata
//!
//! Filtered count, filtered average price and a parametrized ranking by
//! price or stock. Category filters are case-insensitive substring matches.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::record::CatalogRecord;
use crate::store::CatalogStore;

/// Default number of ranked records
pub const DEFAULT_RANKING_LIMIT: usize = 5;

/// Metadata field a ranking sorts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Price,
    Stock,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort key plus direction, written `price_desc`, `stock_asc`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    /// Compare two records by key, then apply the direction
    pub fn compare(&self, a: &CatalogRecord, b: &CatalogRecord) -> Ordering {
        let ordering = match self.key {
            SortKey::Price => a
                .metadata
                .price
                .partial_cmp(&b.metadata.price)
                .unwrap_or(Ordering::Equal),
            SortKey::Stock => a.metadata.stock.cmp(&b.metadata.stock),
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }

    /// Stable sort of `records`
    pub fn sort(&self, records: &mut [CatalogRecord]) {
        records.sort_by(|a, b| self.compare(a, b));
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(SortKey::Price, SortDirection::Desc)
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self.key {
            SortKey::Price => "price",
            SortKey::Stock => "stock",
        };
        let direction = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        write!(f, "{}_{}", key, direction)
    }
}

impl FromStr for SortSpec {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        let (key, direction) = match normalized.split_once('_') {
            Some((key, direction)) => (key, direction),
            None => (normalized.as_str(), "desc"),
        };
        let key = match key {
            "price" => SortKey::Price,
            "stock" => SortKey::Stock,
            other => {
                return Err(StoreError::Config(format!("unknown sort key '{}'", other)))
            }
        };
        let direction = match direction {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            other => {
                return Err(StoreError::Config(format!(
                    "unknown sort direction '{}'",
                    other
                )))
            }
        };
        Ok(Self { key, direction })
    }
}

/// Parameters of a ranking query
#[derive(Debug, Clone, PartialEq)]
pub struct RankingQuery {
    pub sort: SortSpec,
    pub category: Option<String>,
    pub limit: usize,
}

impl Default for RankingQuery {
    fn default() -> Self {
        Self {
            sort: SortSpec::default(),
            category: None,
            limit: DEFAULT_RANKING_LIMIT,
        }
    }
}

impl RankingQuery {
    pub fn new(sort: SortSpec) -> Self {
        Self {
            sort,
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Analytics layered over any [`CatalogStore`]
pub struct Analytics {
    store: Arc<dyn CatalogStore>,
}

impl Analytics {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Number of records, optionally within a category
    pub async fn count(&self, category: Option<&str>) -> Result<usize> {
        self.store.count(category).await
    }

    /// Mean price, or `None` when no record matches
    pub async fn average_price(&self, category: Option<&str>) -> Result<Option<f64>> {
        let records = self.store.list(category).await?;
        if records.is_empty() {
            return Ok(None);
        }
        let total: f64 = records.iter().map(|r| r.metadata.price).sum();
        Ok(Some(total / records.len() as f64))
    }

    /// Top records by price or stock
    pub async fn ranking(&self, query: &RankingQuery) -> Result<Vec<CatalogRecord>> {
        let mut records = self.store.list(query.category.as_deref()).await?;
        query.sort.sort(&mut records);
        records.truncate(query.limit);
        debug!(
            "Ranking {} (category: {:?}) returned {} records",
            query.sort,
            query.category,
            records.len()
        );
        Ok(records)
    }
}
