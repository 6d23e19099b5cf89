//! Local ONNX embeddings through fastembed

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use super::{check_dimension, EmbeddingProvider};
use crate::error::ProviderError;

/// E5 models are trained with these input markers
const QUERY_PREFIX: &str = "query: ";
const PASSAGE_PREFIX: &str = "passage: ";

/// Embedding model running in-process
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    dimension: usize,
    e5: bool,
}

impl FastEmbedProvider {
    /// Multilingual E5 base (768 dimensions)
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_model(EmbeddingModel::MultilingualE5Base)
    }

    pub fn with_model(model_name: EmbeddingModel) -> Result<Self, ProviderError> {
        info!("Initializing embedding model: {:?}", model_name);

        let dimension = match model_name {
            EmbeddingModel::MultilingualE5Small => 384,
            EmbeddingModel::MultilingualE5Base => 768,
            EmbeddingModel::MultilingualE5Large => 1024,
            EmbeddingModel::AllMiniLML6V2 => 384,
            EmbeddingModel::BGESmallENV15 => 384,
            EmbeddingModel::BGEBaseENV15 => 768,
            other => {
                return Err(ProviderError::Permanent(format!(
                    "unsupported local embedding model {:?}",
                    other
                )))
            }
        };

        let e5 = matches!(
            model_name,
            EmbeddingModel::MultilingualE5Small
                | EmbeddingModel::MultilingualE5Base
                | EmbeddingModel::MultilingualE5Large
        );

        let mut options = InitOptions::default();
        options.model_name = model_name;
        options.show_download_progress = true;

        let model = TextEmbedding::try_new(options)
            .map_err(|e| ProviderError::Permanent(format!("failed to load model: {}", e)))?;

        Ok(Self {
            model: Arc::new(model),
            dimension,
            e5,
        })
    }

    /// Pick the model whose output matches `dimension`
    pub fn for_dimension(dimension: usize) -> Result<Self, ProviderError> {
        match dimension {
            384 => Self::with_model(EmbeddingModel::MultilingualE5Small),
            768 => Self::with_model(EmbeddingModel::MultilingualE5Base),
            1024 => Self::with_model(EmbeddingModel::MultilingualE5Large),
            other => Err(ProviderError::Permanent(format!(
                "no local embedding model produces {} dimensions",
                other
            ))),
        }
    }

    async fn embed_text(&self, text: String) -> Result<Vec<f32>, ProviderError> {
        let model = Arc::clone(&self.model);

        let embeddings = tokio::task::spawn_blocking(move || model.embed(vec![text], None))
            .await
            .map_err(|e| ProviderError::Permanent(format!("embedding task failed: {}", e)))?
            .map_err(|e| ProviderError::Permanent(format!("failed to generate embedding: {}", e)))?;

        let vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Permanent("no embedding generated".to_string()))?;
        check_dimension(vector, self.dimension)
    }
}

fn model_input(e5: bool, prefix: &str, text: &str) -> String {
    if e5 {
        format!("{}{}", prefix, text)
    } else {
        text.to_string()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_text(model_input(self.e5, PASSAGE_PREFIX, text)).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed_text(model_input(self.e5, QUERY_PREFIX, query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e5_inputs_are_marked() {
        assert_eq!(
            model_input(true, QUERY_PREFIX, "violão folk"),
            "query: violão folk"
        );
        assert_eq!(
            model_input(true, PASSAGE_PREFIX, "Produto: Violão Folk."),
            "passage: Produto: Violão Folk."
        );
        assert_eq!(model_input(false, QUERY_PREFIX, "violão folk"), "violão folk");
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        assert!(FastEmbedProvider::for_dimension(123).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires model download
    async fn test_local_embedding() {
        let provider = FastEmbedProvider::for_dimension(384).unwrap();
        let vector = provider.embed("Produto: Violão Folk.").await.unwrap();
        assert_eq!(vector.len(), 384);
        let query = provider.embed_query("violão").await.unwrap();
        assert_eq!(query.len(), 384);
    }
}
