//! Lexical index over record content using Tantivy (BM25)
//!
//! Content is analysed with a language-aware pipeline (lower-casing,
//! stopword removal, ASCII folding, stemming). Queries go through the same
//! analyzer and are matched as plain text: every remaining term must be
//! present, and query syntax characters have no special meaning.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, INDEXED, STORED,
    STRING,
};
use tantivy::tokenizer::{
    AsciiFoldingFilter, Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer,
    StopWordFilter, TextAnalyzer,
};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::record::{CatalogRecord, ProductId, RecordId};

/// Name under which the catalog analyzer is registered
const ANALYZER_NAME: &str = "catalog_text";

/// Writer heap budget (single indexing thread)
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Stemming language of the lexical index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexicalLanguage(Language);

impl LexicalLanguage {
    pub fn portuguese() -> Self {
        Self(Language::Portuguese)
    }

    pub fn language(&self) -> Language {
        self.0
    }
}

impl Default for LexicalLanguage {
    fn default() -> Self {
        Self::portuguese()
    }
}

impl FromStr for LexicalLanguage {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let language = match s.trim().to_lowercase().as_str() {
            "portuguese" | "pt" => Language::Portuguese,
            "english" | "en" => Language::English,
            "spanish" | "es" => Language::Spanish,
            "french" | "fr" => Language::French,
            "german" | "de" => Language::German,
            "italian" | "it" => Language::Italian,
            "dutch" | "nl" => Language::Dutch,
            other => {
                return Err(StoreError::Config(format!(
                    "unsupported lexical language '{}'",
                    other
                )))
            }
        };
        Ok(Self(language))
    }
}

fn build_analyzer(language: LexicalLanguage) -> TextAnalyzer {
    // Stopword lists are written with accents, so they run before folding
    let stop_words = StopWordFilter::new(language.language())
        .unwrap_or_else(|| StopWordFilter::remove(Vec::<String>::new()));

    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(stop_words)
        .filter(AsciiFoldingFilter)
        .filter(Stemmer::new(language.language()))
        .build()
}

/// Tantivy index holding one document per catalog record
pub struct LexicalIndex {
    reader: IndexReader,
    writer: Arc<Mutex<IndexWriter>>,
    read_only: AtomicBool,
    language: LexicalLanguage,
    id_field: Field,
    product_id_field: Field,
    content_field: Field,
}

impl LexicalIndex {
    /// Open (or create) an on-disk index
    pub fn open(index_path: impl AsRef<Path>, language: LexicalLanguage) -> Result<Self> {
        let index_path = index_path.as_ref();
        info!("Initializing lexical index at {:?}", index_path);

        std::fs::create_dir_all(index_path)?;
        let index = Index::open_or_create(
            tantivy::directory::MmapDirectory::open(index_path).map_err(tantivy::TantivyError::from)?,
            Self::schema(),
        )?;
        Self::from_index(index, language)
    }

    /// Create a throwaway index held entirely in RAM
    pub fn in_memory(language: LexicalLanguage) -> Result<Self> {
        debug!("Initializing in-memory lexical index");
        Self::from_index(Index::create_in_ram(Self::schema()), language)
    }

    fn schema() -> Schema {
        let mut schema_builder = Schema::builder();
        schema_builder.add_text_field("id", STRING | STORED);
        schema_builder.add_i64_field("product_id", INDEXED | STORED);

        let content_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(ANALYZER_NAME)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        schema_builder.add_text_field("content", content_options);
        schema_builder.build()
    }

    fn from_index(index: Index, language: LexicalLanguage) -> Result<Self> {
        index
            .tokenizers()
            .register(ANALYZER_NAME, build_analyzer(language));

        let schema = index.schema();
        let id_field = schema.get_field("id")?;
        let product_id_field = schema.get_field("product_id")?;
        let content_field = schema.get_field("content")?;

        let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            reader,
            writer: Arc::new(Mutex::new(writer)),
            read_only: AtomicBool::new(false),
            language,
            id_field,
            product_id_field,
            content_field,
        })
    }

    pub fn language(&self) -> LexicalLanguage {
        self.language
    }

    /// Reject (or accept again) document writes; searches keep working
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Replace the document of `record.product_id` and commit
    ///
    /// The commit flushes segments to disk, so it runs on the blocking pool.
    /// On failure the pending writer operations are rolled back, leaving the
    /// previously committed document in place.
    pub async fn upsert(&self, record: &CatalogRecord) -> Result<()> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly);
        }
        let mut writer = Arc::clone(&self.writer).lock_owned().await;

        let id_field = self.id_field;
        let product_id_field = self.product_id_field;
        let content_field = self.content_field;
        let id = record.id.to_string();
        let product_id = record.product_id;
        let content = record.content.clone();

        tokio::task::spawn_blocking(move || {
            let outcome = (|| -> Result<()> {
                writer.delete_term(Term::from_field_i64(product_id_field, product_id));
                writer.add_document(doc!(
                    id_field => id,
                    product_id_field => product_id,
                    content_field => content,
                ))?;
                writer.commit()?;
                Ok(())
            })();

            if let Err(e) = &outcome {
                warn!(
                    "Lexical index update failed for product {}, rolling back: {}",
                    product_id, e
                );
                if let Err(rollback_err) = writer.rollback() {
                    warn!("Lexical index rollback failed: {}", rollback_err);
                }
            }
            outcome
        })
        .await
        .map_err(|e| StoreError::Transaction(format!("lexical index task failed: {}", e)))??;

        self.reader.reload()?;
        debug!("Indexed content of product {}", record.product_id);
        Ok(())
    }

    /// Analysed, de-duplicated terms of `text`
    fn analyse(&self, text: &str) -> Vec<String> {
        let mut analyzer = build_analyzer(self.language);
        let mut stream = analyzer.token_stream(text);
        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        while stream.advance() {
            let term = stream.token().text.clone();
            if seen.insert(term.clone()) {
                terms.push(term);
            }
        }
        terms
    }

    /// Record ids of the best matches, highest BM25 score first
    ///
    /// `limit == None` returns every match.
    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<RecordId>> {
        let terms = self.analyse(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let num_docs = searcher.num_docs() as usize;
        let limit = limit.map_or(num_docs, |limit| limit.min(num_docs));
        if limit == 0 {
            return Ok(Vec::new());
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .map(|term| {
                let term = Term::from_field_text(self.content_field, term);
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Must, query)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut ids = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(address)?;
            let raw_id = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| StoreError::Schema("lexical document without id".to_string()))?;
            let id = RecordId::parse_str(raw_id)
                .map_err(|e| StoreError::Schema(format!("invalid record id '{}': {}", raw_id, e)))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Number of indexed documents
    pub fn count(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    /// Whether a live document exists for `product_id`
    pub fn contains_product(&self, product_id: ProductId) -> Result<bool> {
        let searcher = self.reader.searcher();
        let term = Term::from_field_i64(self.product_id_field, product_id);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        Ok(searcher.search(&query, &Count)? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ProductMetadata;
    use tempfile::tempdir;

    fn record(product_id: ProductId, content: &str) -> CatalogRecord {
        CatalogRecord::new(
            product_id,
            content.to_string(),
            vec![0.0; 4],
            ProductMetadata::default(),
        )
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!(
            "portuguese".parse::<LexicalLanguage>().unwrap(),
            LexicalLanguage::portuguese()
        );
        assert_eq!(
            "EN".parse::<LexicalLanguage>().unwrap().language(),
            Language::English
        );
        assert!("klingon".parse::<LexicalLanguage>().is_err());
    }

    #[tokio::test]
    async fn test_stemmed_match() {
        let index = LexicalIndex::in_memory(LexicalLanguage::portuguese()).unwrap();
        let guitar = record(1, "Produto: Guitarra Stratocaster. Categoria: Guitarras.");
        let drum = record(2, "Produto: Bateria Acústica. Categoria: Baterias.");
        index.upsert(&guitar).await.unwrap();
        index.upsert(&drum).await.unwrap();

        let hits = index.search("guitarras", Some(10)).unwrap();
        assert_eq!(hits, vec![guitar.id]);

        let hits = index.search("acustica", Some(10)).unwrap();
        assert_eq!(hits, vec![drum.id]);
    }

    #[tokio::test]
    async fn test_all_terms_must_match() {
        let index = LexicalIndex::in_memory(LexicalLanguage::portuguese()).unwrap();
        index
            .upsert(&record(1, "Guitarra elétrica vermelha"))
            .await
            .unwrap();
        index
            .upsert(&record(2, "Guitarra acústica azul"))
            .await
            .unwrap();

        assert_eq!(index.search("guitarra", None).unwrap().len(), 2);
        assert_eq!(index.search("guitarra azul", None).unwrap().len(), 1);
        assert!(index.search("guitarra verde", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_syntax_is_plain_text() {
        let index = LexicalIndex::in_memory(LexicalLanguage::portuguese()).unwrap();
        index.upsert(&record(1, "Cabo P10 (3 metros)")).await.unwrap();

        let hits = index.search("cabo \"p10\" (metros", Some(5)).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.search("   ", Some(5)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_product_document() {
        let dir = tempdir().unwrap();
        let index = LexicalIndex::open(dir.path(), LexicalLanguage::portuguese()).unwrap();

        let mut first = record(9, "Teclado arranjador");
        index.upsert(&first).await.unwrap();
        first.content = "Piano digital".to_string();
        index.upsert(&first).await.unwrap();

        assert_eq!(index.count(), 1);
        assert!(index.contains_product(9).unwrap());
        assert!(index.search("teclado", None).unwrap().is_empty());
        assert_eq!(index.search("piano", None).unwrap(), vec![first.id]);
    }

    #[tokio::test]
    async fn test_stopwords_are_ignored() {
        let index = LexicalIndex::in_memory(LexicalLanguage::portuguese()).unwrap();
        let guitar = record(1, "Produto: Guitarra Stratocaster. Categoria: Guitarras.");
        let pedal = record(2, "Produto: Pedal de Fuzz. Categoria: Pedais.");
        index.upsert(&guitar).await.unwrap();
        index.upsert(&pedal).await.unwrap();

        let hits = index.search("uma guitarra para a categoria de guitarras", Some(5)).unwrap();
        assert_eq!(hits, vec![guitar.id]);

        let hits = index.search("pedal com fuzz", Some(5)).unwrap();
        assert_eq!(hits, vec![pedal.id]);

        // Nothing left to match
        assert!(index.search("de uma para", Some(5)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_limit_is_capped() {
        let index = LexicalIndex::in_memory(LexicalLanguage::portuguese()).unwrap();
        index.upsert(&record(1, "Cabo de guitarra")).await.unwrap();

        assert_eq!(index.search("cabo", Some(usize::MAX)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let index = LexicalIndex::in_memory(LexicalLanguage::portuguese()).unwrap();
        let mut cable = record(3, "Cabo P10");
        index.upsert(&cable).await.unwrap();

        index.set_read_only(true);
        cable.content = "Cabo XLR".to_string();
        assert!(matches!(index.upsert(&cable).await, Err(StoreError::ReadOnly)));
        assert_eq!(index.search("p10", None).unwrap(), vec![cable.id]);

        index.set_read_only(false);
        index.upsert(&cable).await.unwrap();
        assert_eq!(index.search("xlr", None).unwrap(), vec![cable.id]);
    }
}
