//! Persistent catalog store: LanceDB table plus on-disk lexical index
//!
//! The `product_embeddings` table is the source of truth. A commit first
//! merges the staged row into the table keyed by `product_id` (a single
//! atomic LanceDB operation), then updates the lexical index. When the
//! lexical update fails the table row is restored to its previous state
//! before the error is returned, so a failed commit leaves nothing behind.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Float64Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::lexical::{LexicalIndex, LexicalLanguage};
use crate::record::{category_matches, CatalogRecord, ProductId, ProductMetadata, RecordId};
use crate::store::{CatalogStore, CatalogTransaction, RowGuard, RowLocks, StorageBackend};

/// Table holding the derived records
pub const TABLE_NAME: &str = "product_embeddings";

/// Distance column appended by LanceDB to vector search results
const DISTANCE_COLUMN: &str = "_distance";

fn table_schema(dimension: i32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("product_id", DataType::Int64, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("price", DataType::Float64, false),
        Field::new("category", DataType::Utf8, false),
        Field::new("stock", DataType::Int64, false),
        Field::new("created_at", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension,
            ),
            false,
        ),
    ]))
}

/// Catalog store backed by LanceDB and Tantivy
pub struct LanceCatalogStore {
    table: Table,
    schema: SchemaRef,
    dimension: usize,
    lexical: LexicalIndex,
    locks: RowLocks,
}

impl LanceCatalogStore {
    /// Open (or create) the store under `data_dir`
    ///
    /// Layout: `data_dir/lance` for the LanceDB database and
    /// `data_dir/lexical` for the Tantivy index.
    pub async fn open(
        data_dir: impl AsRef<Path>,
        dimension: usize,
        language: LexicalLanguage,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if dimension == 0 {
            return Err(StoreError::Config(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }
        let dim = i32::try_from(dimension)
            .map_err(|_| StoreError::Config(format!("embedding dimension {} too large", dimension)))?;

        let lance_path = data_dir.join("lance");
        std::fs::create_dir_all(&lance_path)?;
        info!("Initializing LanceDB at {:?}", lance_path);

        let connection = lancedb::connect(lance_path.to_string_lossy().as_ref())
            .execute()
            .await?;

        let schema = table_schema(dim);
        let table = Self::get_or_create_table(&connection, schema.clone()).await?;
        Self::check_dimension(&table, dim).await?;

        let lexical = LexicalIndex::open(data_dir.join("lexical"), language)?;

        Ok(Self {
            table,
            schema,
            dimension,
            lexical,
            locks: RowLocks::new(),
        })
    }

    async fn get_or_create_table(connection: &Connection, schema: SchemaRef) -> Result<Table> {
        let table_names = connection.table_names().execute().await?;

        if table_names.iter().any(|name| name == TABLE_NAME) {
            debug!("Opening existing table: {}", TABLE_NAME);
            Ok(connection.open_table(TABLE_NAME).execute().await?)
        } else {
            info!("Creating new table: {}", TABLE_NAME);
            let batch = RecordBatch::new_empty(schema.clone());
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            Ok(connection
                .create_table(TABLE_NAME, Box::new(batches))
                .execute()
                .await?)
        }
    }

    async fn check_dimension(table: &Table, expected: i32) -> Result<()> {
        let schema = table.schema().await?;
        let field = schema
            .field_with_name("vector")
            .map_err(|_| StoreError::Schema("table has no 'vector' column".to_string()))?;
        match field.data_type() {
            DataType::FixedSizeList(_, actual) if *actual == expected => Ok(()),
            DataType::FixedSizeList(_, actual) => Err(StoreError::DimensionMismatch {
                expected: expected as usize,
                actual: *actual as usize,
            }),
            other => Err(StoreError::Schema(format!(
                "unexpected 'vector' column type {:?}",
                other
            ))),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    fn batch_from_records(&self, records: &[CatalogRecord]) -> Result<RecordBatch> {
        for record in records {
            if record.embedding.len() != self.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.embedding.len(),
                });
            }
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.to_string()).collect();
        let created: Vec<String> = records.iter().map(|r| r.created_at.to_rfc3339()).collect();
        let values: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let item = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            item,
            self.dimension as i32,
            Arc::new(Float32Array::from(values)),
            None,
        )?;

        Ok(RecordBatch::try_new(
            self.schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.product_id))),
                Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.content.as_str()))),
                Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.metadata.price))),
                Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.metadata.category.as_str()),
                )),
                Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.metadata.stock))),
                Arc::new(StringArray::from(created)),
                Arc::new(vectors),
            ],
        )?)
    }

    /// Insert or replace the row of `record.product_id`
    async fn merge_row(&self, record: &CatalogRecord) -> Result<()> {
        let batch = self.batch_from_records(std::slice::from_ref(record))?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], self.schema.clone());

        let mut merge = self.table.merge_insert(&["product_id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge.execute(Box::new(batches)).await?;
        Ok(())
    }

    async fn query_records(&self, filter: Option<String>) -> Result<Vec<CatalogRecord>> {
        let total = self.table.count_rows(None).await?;
        if total == 0 {
            return Ok(Vec::new());
        }
        // Plain queries are capped by a default limit unless one is given
        let mut query = self.table.query().limit(total);
        if let Some(filter) = filter {
            query = query.only_if(filter);
        }
        let batches: Vec<RecordBatch> = query.execute().await?.try_collect().await?;

        let mut records = Vec::new();
        for batch in &batches {
            for (_, record) in decode_batch(batch)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Schema(format!("missing utf8 column '{}'", name)))
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| StoreError::Schema(format!("missing int64 column '{}'", name)))
}

/// Decode rows into records, paired with `_distance` when the batch has it
fn decode_batch(batch: &RecordBatch) -> Result<Vec<(f32, CatalogRecord)>> {
    let ids = string_column(batch, "id")?;
    let product_ids = int_column(batch, "product_id")?;
    let contents = string_column(batch, "content")?;
    let categories = string_column(batch, "category")?;
    let stocks = int_column(batch, "stock")?;
    let created = string_column(batch, "created_at")?;
    let prices = batch
        .column_by_name("price")
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| StoreError::Schema("missing float64 column 'price'".to_string()))?;
    let vectors = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| StoreError::Schema("missing vector column 'vector'".to_string()))?;
    let distances = batch
        .column_by_name(DISTANCE_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let raw_id = ids.value(i);
        let id = RecordId::parse_str(raw_id)
            .map_err(|e| StoreError::Schema(format!("invalid record id '{}': {}", raw_id, e)))?;
        let created_at = DateTime::parse_from_rfc3339(created.value(i))
            .map_err(|e| StoreError::Schema(format!("invalid created_at: {}", e)))?
            .with_timezone(&Utc);

        let vector = vectors.value(i);
        let embedding = vector
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| StoreError::Schema("vector items are not float32".to_string()))?
            .values()
            .to_vec();

        let distance = distances.map(|d| d.value(i)).unwrap_or(0.0);
        rows.push((
            distance,
            CatalogRecord {
                id,
                product_id: product_ids.value(i),
                embedding,
                content: contents.value(i).to_string(),
                metadata: ProductMetadata {
                    price: prices.value(i),
                    category: categories.value(i).to_string(),
                    stock: stocks.value(i),
                },
                created_at,
            },
        ));
    }
    Ok(rows)
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[async_trait]
impl CatalogStore for LanceCatalogStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Lance
    }

    async fn begin<'a>(
        &'a self,
        product_id: ProductId,
    ) -> Result<Box<dyn CatalogTransaction + 'a>> {
        let guard = self.locks.acquire(product_id).await;
        let existing = self.get_by_product_id(product_id).await?;
        Ok(Box::new(LanceTransaction {
            store: self,
            product_id,
            existing,
            staged: None,
            finished: false,
            _guard: guard,
        }))
    }

    async fn get_by_product_id(&self, product_id: ProductId) -> Result<Option<CatalogRecord>> {
        let mut records = self
            .query_records(Some(format!("product_id = {}", product_id)))
            .await?;
        if records.len() > 1 {
            warn!(
                "Found {} rows for product {}, expected at most one",
                records.len(),
                product_id
            );
        }
        Ok(records.pop())
    }

    async fn fetch(&self, ids: &[RecordId]) -> Result<Vec<CatalogRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list: Vec<String> = ids.iter().map(|id| quote(&id.to_string())).collect();
        let found = self
            .query_records(Some(format!("id IN ({})", list.join(", "))))
            .await?;

        let mut by_id: HashMap<RecordId, CatalogRecord> =
            found.into_iter().map(|record| (record.id, record)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn semantic_search(
        &self,
        vector: &[f32],
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<CatalogRecord>> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let total = self.table.count_rows(None).await?;
        if limit == 0 || total == 0 {
            return Ok(Vec::new());
        }

        // Category filters are substring matches, applied after ranking the whole table
        let fetch_limit = if category.is_some() { total } else { limit.min(total) };
        let batches: Vec<RecordBatch> = self
            .table
            .vector_search(vector.to_vec())?
            .distance_type(DistanceType::Cosine)
            .limit(fetch_limit)
            .execute()
            .await?
            .try_collect()
            .await?;

        let mut rows = Vec::new();
        for batch in &batches {
            rows.extend(decode_batch(batch)?);
        }
        if let Some(filter) = category {
            rows.retain(|(_, record)| category_matches(&record.metadata.category, filter));
        }
        rows.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.product_id.cmp(&b.1.product_id))
        });

        Ok(rows.into_iter().take(limit).map(|(_, record)| record).collect())
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
        match category {
            None => Ok(self.table.count_rows(None).await?),
            Some(_) => Ok(self.list(category).await?.len()),
        }
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<CatalogRecord>> {
        let mut records = self.query_records(None).await?;
        if let Some(filter) = category {
            records.retain(|record| category_matches(&record.metadata.category, filter));
        }
        records.sort_by_key(|record| record.product_id);
        Ok(records)
    }
}

/// Transaction over [`LanceCatalogStore`]
struct LanceTransaction<'a> {
    store: &'a LanceCatalogStore,
    product_id: ProductId,
    existing: Option<CatalogRecord>,
    staged: Option<CatalogRecord>,
    finished: bool,
    _guard: RowGuard,
}

impl LanceTransaction<'_> {
    /// Put the table row back the way it was before this commit
    async fn restore_row(&self) -> Result<()> {
        match &self.existing {
            Some(previous) => self.store.merge_row(previous).await,
            None => {
                self.store
                    .table
                    .delete(&format!("product_id = {}", self.product_id))
                    .await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl CatalogTransaction for LanceTransaction<'_> {
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

        self.store.merge_row(&record).await?;

        if let Err(e) = self.store.lexical.upsert(&record).await {
            warn!(
                "Lexical update failed for product {}, restoring table row: {}",
                self.product_id, e
            );
            if let Err(restore_err) = self.restore_row().await {
                warn!(
                    "Failed to restore row of product {}: {}",
                    self.product_id, restore_err
                );
            }
            return Err(e);
        }

        debug!("Committed product {} to LanceDB", self.product_id);
        Ok(())
    }

    async fn rollback(&mut self) {
        self.staged = None;
        self.finished = true;
    }
}
