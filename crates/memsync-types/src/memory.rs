//! Memory records, recall filters, consolidation links and the vector store trait.

use crate::error::MemSyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Logical namespace used when a caller does not name one.
pub const DEFAULT_AREA: &str = "main";

/// Metadata key holding the memory area.
pub const AREA_KEY: &str = "area";

/// Metadata key holding the RFC 3339 save timestamp.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Arbitrary metadata attached to a memory.
pub type Metadata = HashMap<String, serde_json::Value>;

/// A durable memory as held by the vector store (the source of truth).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Opaque id assigned by the vector store.
    pub id: String,
    /// The textual content.
    pub content: String,
    /// Logical namespace.
    pub area: String,
    /// When the memory was saved.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary metadata, including `area` and `timestamp`.
    pub metadata: Metadata,
}

/// A memory returned by similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    /// The matched memory.
    pub record: MemoryRecord,
    /// Similarity score in [0, 1].
    pub score: f32,
}

/// Filter criteria for similarity search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFilter {
    /// Restrict to one area.
    pub area: Option<String>,
    /// Metadata key-value equality filters.
    pub metadata: Metadata,
}

impl MemoryFilter {
    /// Create a filter for a specific area.
    pub fn area(area: impl Into<String>) -> Self {
        Self {
            area: Some(area.into()),
            ..Default::default()
        }
    }

    /// Whether a record satisfies this filter.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(ref area) = self.area {
            if &record.area != area {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(k, v)| record.metadata.get(k) == Some(v))
    }
}

/// Produced by an external consolidation process when one memory replaces another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationLink {
    /// The superseded memory.
    pub old_memory_id: String,
    /// Its replacement.
    pub new_memory_id: String,
}

/// Similarity-search index over memory text.
///
/// Implementations must be safe for concurrent reads and writes; the core
/// adds no locking of its own.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store content with metadata, returning the assigned id.
    async fn insert(&self, content: &str, metadata: Metadata) -> MemSyncResult<String>;

    /// Return at most `limit` memories scoring at or above `threshold`,
    /// best first.
    async fn search_similarity_threshold(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
        filter: Option<&MemoryFilter>,
    ) -> MemSyncResult<Vec<ScoredMemory>>;

    /// Fetch a memory by id.
    async fn get(&self, id: &str) -> MemSyncResult<Option<MemoryRecord>>;

    /// Delete a memory. Returns whether a record was removed.
    async fn delete(&self, id: &str) -> MemSyncResult<bool>;
}
