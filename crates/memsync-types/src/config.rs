//! Configuration types for the memsync core.
//!
//! Every section deserializes with defaults so a partial `config.toml`
//! (or none at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySyncConfig {
    /// Base directory for on-disk stores. Default: `~/.memsync`.
    pub data_dir: PathBuf,
    /// Graph store settings.
    pub graph: GraphConfig,
    /// Vector store settings.
    pub vector: VectorConfig,
    /// Background graph-sync queue settings.
    pub sync: SyncConfig,
    /// Extraction pipeline settings.
    pub extraction: ExtractionConfig,
    /// Search federator settings.
    pub search: SearchConfig,
    /// Structured-generation driver. `None` disables the generation pass.
    pub generator: Option<GeneratorConfig>,
}

impl Default for MemorySyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            graph: GraphConfig::default(),
            vector: VectorConfig::default(),
            sync: SyncConfig::default(),
            extraction: ExtractionConfig::default(),
            search: SearchConfig::default(),
            generator: None,
        }
    }
}

impl MemorySyncConfig {
    /// Resolved path of the graph database.
    pub fn graph_path(&self) -> PathBuf {
        self.graph
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("graph.db"))
    }

    /// Resolved path of the vector database.
    pub fn vector_path(&self) -> PathBuf {
        self.vector
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("vectors.db"))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".memsync")
}

/// Graph store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Attempt to open the graph store at all. Default: true.
    pub enabled: bool,
    /// Database path override (defaults to `<data_dir>/graph.db`).
    pub path: Option<PathBuf>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Database path override (defaults to `<data_dir>/vectors.db`).
    pub path: Option<PathBuf>,
    /// Embedding endpoint. `None` keeps lexical similarity.
    pub embedding: Option<EmbeddingConfig>,
}

/// Background sync queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of worker tasks. Default: 2.
    pub workers: usize,
    /// Maximum queued + running jobs before new ones are dropped. Default: 64.
    pub queue_capacity: usize,
    /// Per-job timeout in seconds, covering extraction and graph write. A job
    /// past it reports a timeout but stays pending until it returns. Default: 120.
    pub task_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
            task_timeout_secs: 120,
        }
    }
}

/// Extraction pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Run the structured-generation pass when a generator is configured. Default: true.
    pub structured: bool,
    /// Characters of content mirrored onto the graph Memory node. Default: 2000.
    pub mirror_content_chars: usize,
    /// Max distance in characters between a contact token and an entity
    /// mention for the token to be attached. Default: 80.
    pub proximity_window: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            structured: true,
            mirror_content_chars: 2000,
            proximity_window: 80,
        }
    }
}

/// Search federator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Similarity threshold for the vector fallback. Default: 0.5.
    pub fallback_threshold: f32,
    /// Characters kept per content snippet. Default: 200.
    pub snippet_chars: usize,
    /// Limit used when callers pass zero. Default: 10.
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fallback_threshold: 0.5,
            snippet_chars: 200,
            default_limit: 10,
        }
    }
}

/// OpenAI-compatible chat completion endpoint used for structured extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
        }
    }
}

/// OpenAI-compatible embeddings endpoint for vector similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Environment variable holding the API key. Empty sends no auth header.
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}
