//! Derived search record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque primary key of a catalog record
pub type RecordId = Uuid;

/// External product reference (unique per record)
pub type ProductId = i64;

/// Category assigned when a producer sends none
pub const DEFAULT_CATEGORY: &str = "Sem Categoria";

/// Typed product metadata stored next to every record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    pub price: f64,
    pub category: String,
    pub stock: i64,
}

impl Default for ProductMetadata {
    fn default() -> Self {
        Self {
            price: 0.0,
            category: DEFAULT_CATEGORY.to_string(),
            stock: 0,
        }
    }
}

/// One searchable product, derived from the external catalog
///
/// - `id`: opaque key, stable across updates
/// - `product_id`: external reference, exactly one record per value
/// - `embedding`: fixed-dimension vector computed from `content`
/// - `content`: denormalized text feeding both the vector and the lexical index
/// - `created_at`: first sync time, kept across updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: RecordId,
    pub product_id: ProductId,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: ProductMetadata,
    pub created_at: DateTime<Utc>,
}

impl CatalogRecord {
    /// Create a fresh record with a new id and the current timestamp
    pub fn new(
        product_id: ProductId,
        content: String,
        embedding: Vec<f32>,
        metadata: ProductMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            embedding,
            content,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Overwrite the derived fields in place, keeping identity and creation time
    pub fn overwrite(&mut self, content: String, embedding: Vec<f32>, metadata: ProductMetadata) {
        self.content = content;
        self.embedding = embedding;
        self.metadata = metadata;
    }
}

/// Case-insensitive substring match used by every category filter
pub fn category_matches(category: &str, filter: &str) -> bool {
    category.to_lowercase().contains(&filter.to_lowercase())
}

/// Cosine distance in `[0, 2]`; a zero vector is treated as orthogonal
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_keeps_identity() {
        let mut record = CatalogRecord::new(
            7,
            "Produto: Violão.".to_string(),
            vec![1.0, 0.0],
            ProductMetadata::default(),
        );
        let id = record.id;
        let created_at = record.created_at;

        record.overwrite(
            "Produto: Violão Folk.".to_string(),
            vec![0.0, 1.0],
            ProductMetadata {
                price: 899.9,
                category: "Violões".to_string(),
                stock: 3,
            },
        );

        assert_eq!(record.id, id);
        assert_eq!(record.created_at, created_at);
        assert_eq!(record.content, "Produto: Violão Folk.");
        assert_eq!(record.metadata.stock, 3);
    }

    #[test]
    fn test_category_matches_substring_ignoring_case() {
        assert!(category_matches("Guitarras Elétricas", "guitarra"));
        assert!(category_matches("Guitarras Elétricas", "ELÉTRICAS"));
        assert!(!category_matches("Baixos", "guitarra"));
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
