//! OpenAI-compatible text generation driver for the structured extraction pass.
//!
//! Works with any provider exposing `/chat/completions` (OpenAI, Groq,
//! Together, Ollama, vLLM, LM Studio, etc.).

use async_trait::async_trait;
use memsync_types::config::GeneratorConfig;
use memsync_types::error::{MemSyncError, MemSyncResult};
use memsync_types::generation::TextGenerator;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Upper bound on one HTTP round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat-completions client.
pub struct OpenAiCompatGenerator {
    api_key: Zeroizing<String>,
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatGenerator {
    /// Create a driver with an explicit key. An empty key sends no auth header.
    pub fn new(base_url: &str, model: &str, api_key: String, temperature: f32) -> Self {
        Self {
            api_key: Zeroizing::new(api_key),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Create a driver from configuration, reading the key from `api_key_env`.
    pub fn from_config(config: &GeneratorConfig) -> Self {
        let api_key = if config.api_key_env.is_empty() {
            String::new()
        } else {
            std::env::var(&config.api_key_env).unwrap_or_default()
        };
        if api_key.is_empty() && !config.api_key_env.is_empty() {
            warn!(
                env = %config.api_key_env,
                "Generator API key variable is unset, sending unauthenticated requests"
            );
        }
        Self::new(&config.base_url, &config.model, api_key, config.temperature)
    }

    /// Model name requests are sent with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Full completions endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatGenerator {
    async fn generate(&self, system_prompt: &str, message: &str) -> MemSyncResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: message,
                },
            ],
            temperature: self.temperature,
        };

        let mut req = self.client.post(self.endpoint()).json(&body);
        if !self.api_key.as_str().is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key.as_str()));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| MemSyncError::Generation(format!("HTTP error: {e}")))?;
        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(MemSyncError::Generation(format!(
                "API error (status {status}): {body_text}"
            )));
        }

        let data: ChatResponse = resp
            .json()
            .await
            .map_err(|e| MemSyncError::Generation(format!("Parse error: {e}")))?;
        let text = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MemSyncError::Generation("Empty completion response".to_string()))?;

        debug!(model = %self.model, chars = text.len(), "Generation completed");
        Ok(text)
    }
}
