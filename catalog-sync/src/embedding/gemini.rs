//! Google Generative Language embeddings (`models/{model}:embedContent`)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_dimension, EmbeddingProvider};
use crate::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Status string Google attaches to quota and rate-limit rejections
const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

/// Configuration for [`GeminiEmbedder`]
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Model name without the `models/` prefix
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            dimension,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Embedding,
}

#[derive(Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

/// HTTP client for the Gemini embedding endpoint
pub struct GeminiEmbedder {
    client: Client,
    config: GeminiConfig,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::Permanent("missing Google API key".to_string()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Permanent(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:embedContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

/// Map a non-success response to the provider error taxonomy
pub fn classify_failure(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains(RESOURCE_EXHAUSTED) {
        ProviderError::Transient(message)
    } else {
        ProviderError::Permanent(message)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbedRequest {
            model: format!("models/{}", self.config.model),
            content: Content {
                parts: [Part { text }],
            },
            output_dimensionality: self.config.dimension,
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Permanent(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("invalid response: {}", e)))?;

        debug!(
            "Embedded {} chars with {} ({} dims)",
            text.len(),
            self.config.model,
            parsed.embedding.values.len()
        );
        check_dimension(parsed.embedding.values, self.config.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_transient() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_transient());
    }

    #[test]
    fn test_resource_exhausted_body_is_transient() {
        let body = r#"{"error":{"code":503,"status":"RESOURCE_EXHAUSTED"}}"#;
        let err = classify_failure(StatusCode::SERVICE_UNAVAILABLE, body);
        assert!(err.is_transient());
    }

    #[test]
    fn test_other_failures_are_permanent() {
        let err = classify_failure(StatusCode::UNAUTHORIZED, r#"{"error":{"status":"UNAUTHENTICATED"}}"#);
        assert!(!err.is_transient());
        let err = classify_failure(StatusCode::BAD_REQUEST, "invalid argument");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let result = GeminiEmbedder::new(GeminiConfig::new("  ", "text-embedding-004", 768));
        assert!(matches!(result, Err(ProviderError::Permanent(_))));
    }

    #[test]
    fn test_endpoint_and_request_shape() {
        let embedder = GeminiEmbedder::new(
            GeminiConfig::new("key", "text-embedding-004", 768).with_base_url("http://localhost/v1beta/"),
        )
        .unwrap();
        assert_eq!(
            embedder.endpoint(),
            "http://localhost/v1beta/models/text-embedding-004:embedContent"
        );

        let request = EmbedRequest {
            model: "models/text-embedding-004".to_string(),
            content: Content {
                parts: [Part { text: "Produto: Baixo." }],
            },
            output_dimensionality: 768,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["content"]["parts"][0]["text"], "Produto: Baixo.");
        assert_eq!(json["outputDimensionality"], 768);
    }
}
