//! OpenAI-compatible embedding driver for the vector store.
//!
//! Works with any provider exposing `/embeddings` (OpenAI, Together,
//! Ollama, vLLM, LM Studio, etc.).

use crate::semantic::EmbeddingDriver;
use async_trait::async_trait;
use memsync_types::config::EmbeddingConfig;
use memsync_types::error::{MemSyncError, MemSyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Upper bound on one HTTP round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Embeddings client.
pub struct OpenAiCompatEmbedder {
    api_key: Zeroizing<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl OpenAiCompatEmbedder {
    /// Create a driver with an explicit key. An empty key sends no auth header.
    pub fn new(base_url: &str, model: &str, api_key: String) -> Self {
        Self {
            api_key: Zeroizing::new(api_key),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Create a driver from configuration, reading the key from `api_key_env`.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let api_key = if config.api_key_env.is_empty() {
            String::new()
        } else {
            std::env::var(&config.api_key_env).unwrap_or_default()
        };
        if api_key.is_empty() && !config.api_key_env.is_empty() {
            warn!(
                env = %config.api_key_env,
                "Embedding API key variable is unset, sending unauthenticated requests"
            );
        }
        Self::new(&config.base_url, &config.model, api_key)
    }

    /// Full embeddings endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

#[async_trait]
impl EmbeddingDriver for OpenAiCompatEmbedder {
    async fn embed_one(&self, text: &str) -> MemSyncResult<Vec<f32>> {
        let body = EmbedRequest {
            model: &self.model,
            input: [text],
        };

        let mut req = self.client.post(self.endpoint()).json(&body);
        if !self.api_key.as_str().is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key.as_str()));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| MemSyncError::Vector(format!("Embedding HTTP error: {e}")))?;
        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(MemSyncError::Vector(format!(
                "Embedding API error (status {status}): {body_text}"
            )));
        }

        let data: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| MemSyncError::Vector(format!("Embedding parse error: {e}")))?;
        let embedding = first_embedding(data)?;

        debug!(model = %self.model, dims = embedding.len(), "Embedded text");
        Ok(embedding)
    }
}

fn first_embedding(data: EmbedResponse) -> MemSyncResult<Vec<f32>> {
    data.data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| MemSyncError::Vector("Empty embedding response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        std::env::set_var("MEMSYNC_TEST_EMBEDDING_KEY", "sk-embed");
        let config = EmbeddingConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key_env: "MEMSYNC_TEST_EMBEDDING_KEY".to_string(),
        };
        let driver = OpenAiCompatEmbedder::from_config(&config);
        assert_eq!(driver.api_key.as_str(), "sk-embed");
        assert_eq!(driver.endpoint(), "http://localhost:11434/v1/embeddings");
    }

    #[test]
    fn test_request_shape() {
        let body = EmbedRequest {
            model: "nomic-embed-text",
            input: ["Jane works at Acme"],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "nomic-embed-text");
        assert_eq!(value["input"][0], "Jane works at Acme");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.25]}]}"#;
        let parsed: EmbedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(first_embedding(parsed).unwrap(), vec![0.5, -0.25]);

        let empty: EmbedResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(matches!(first_embedding(empty), Err(MemSyncError::Vector(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_vector_error() {
        let driver = OpenAiCompatEmbedder::new("http://127.0.0.1:9", "m", String::new());
        let err = driver.embed_one("hello").await.unwrap_err();
        assert!(matches!(err, MemSyncError::Vector(_)));
    }
}
