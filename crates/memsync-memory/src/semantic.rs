//! SQLite-backed vector store.
//!
//! Embeddings are stored as BLOBs in the `embedding` column of the memories
//! table. When an [`EmbeddingDriver`] is attached, similarity is cosine over
//! embeddings. Without one (or for rows stored before it was attached),
//! similarity is lexical query coverage: the fraction of distinct query
//! terms that appear in the content.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memsync_types::error::{MemSyncError, MemSyncResult};
use memsync_types::memory::{
    MemoryFilter, MemoryRecord, Metadata, ScoredMemory, VectorStore, AREA_KEY, DEFAULT_AREA,
    TIMESTAMP_KEY,
};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Upper bound on rows scored per search.
const MAX_CANDIDATES: usize = 10_000;

/// Computes text embeddings for the vector store.
#[async_trait]
pub trait EmbeddingDriver: Send + Sync {
    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> MemSyncResult<Vec<f32>>;
}

/// Vector store backed by SQLite.
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
    embedder: Option<Arc<dyn EmbeddingDriver>>,
}

impl SqliteVectorStore {
    /// Create a new vector store wrapping a migrated connection.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            embedder: None,
        }
    }

    /// Open (or create) a database file and run migrations.
    pub fn open(path: &Path) -> MemSyncResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| MemSyncError::Vector(e.to_string()))?;
        crate::migration::run_migrations(&conn).map_err(|e| MemSyncError::Vector(e.to_string()))?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> MemSyncResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| MemSyncError::Vector(e.to_string()))?;
        crate::migration::run_migrations(&conn).map_err(|e| MemSyncError::Vector(e.to_string()))?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// Attach an embedding driver used for new inserts and queries.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingDriver>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed_one(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Embedding failed, falling back to lexical similarity");
                None
            }
        }
    }

    fn load_candidates(
        &self,
        area: Option<&str>,
    ) -> MemSyncResult<Vec<(MemoryRecord, Option<Vec<f32>>)>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MemSyncError::Internal(e.to_string()))?;
        let mut sql = String::from(
            "SELECT id, content, area, metadata, created_at, embedding FROM memories",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(area) = area {
            sql.push_str(" WHERE area = ?1");
            params.push(Box::new(area.to_string()));
        }
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT {MAX_CANDIDATES}"));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| MemSyncError::Vector(e.to_string()))?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), read_row)
            .map_err(|e| MemSyncError::Vector(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| MemSyncError::Vector(e.to_string()))?;
            out.push(raw.into_record());
        }
        Ok(out)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, content: &str, metadata: Metadata) -> MemSyncResult<String> {
        let embedding = self.embed(content).await;

        let id = Uuid::new_v4().to_string();
        let area = metadata
            .get(AREA_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_AREA)
            .to_string();
        let created_at = metadata
            .get(TIMESTAMP_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let meta_str = serde_json::to_string(&metadata)
            .map_err(|e| MemSyncError::Serialization(e.to_string()))?;
        let embedding_bytes: Option<Vec<u8>> = embedding.as_deref().map(embedding_to_bytes);

        let conn = self
            .conn
            .lock()
            .map_err(|e| MemSyncError::Internal(e.to_string()))?;
        conn.execute(
            "INSERT INTO memories (id, content, area, metadata, created_at, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![id, content, area, meta_str, created_at, embedding_bytes],
        )
        .map_err(|e| MemSyncError::Vector(e.to_string()))?;
        debug!(memory_id = %id, area = %area, "Inserted memory");
        Ok(id)
    }

    async fn search_similarity_threshold(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
        filter: Option<&MemoryFilter>,
    ) -> MemSyncResult<Vec<ScoredMemory>> {
        let query_embedding = self.embed(query).await;
        let query_terms = terms(query);
        let candidates = self.load_candidates(filter.and_then(|f| f.area.as_deref()))?;
        let total = candidates.len();

        let mut scored: Vec<ScoredMemory> = candidates
            .into_iter()
            .filter(|(record, _)| filter.map_or(true, |f| f.matches(record)))
            .map(|(record, embedding)| {
                let score = match (query_embedding.as_deref(), embedding.as_deref()) {
                    (Some(q), Some(e)) => cosine_similarity(q, e).max(0.0),
                    _ => lexical_coverage(&query_terms, &record.content),
                };
                ScoredMemory { record, score }
            })
            .filter(|m| m.score >= threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        debug!(
            "Similarity search: {} results from {} candidates",
            scored.len(),
            total
        );
        Ok(scored)
    }

    async fn get(&self, id: &str) -> MemSyncResult<Option<MemoryRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MemSyncError::Internal(e.to_string()))?;
        let raw = conn
            .query_row(
                "SELECT id, content, area, metadata, created_at, embedding FROM memories WHERE id = ?1",
                rusqlite::params![id],
                read_row,
            )
            .optional()
            .map_err(|e| MemSyncError::Vector(e.to_string()))?;
        Ok(raw.map(|r| r.into_record().0))
    }

    async fn delete(&self, id: &str) -> MemSyncResult<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MemSyncError::Internal(e.to_string()))?;
        let removed = conn
            .execute("DELETE FROM memories WHERE id = ?1", rusqlite::params![id])
            .map_err(|e| MemSyncError::Vector(e.to_string()))?;
        Ok(removed > 0)
    }
}

/// Raw row from the memories table.
struct RawMemoryRow {
    id: String,
    content: String,
    area: String,
    metadata: String,
    created_at: String,
    embedding: Option<Vec<u8>>,
}

impl RawMemoryRow {
    fn into_record(self) -> (MemoryRecord, Option<Vec<f32>>) {
        let metadata: Metadata = serde_json::from_str(&self.metadata).unwrap_or_default();
        let timestamp = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let embedding = self.embedding.as_deref().map(embedding_from_bytes);
        (
            MemoryRecord {
                id: self.id,
                content: self.content,
                area: self.area,
                timestamp,
                metadata,
            },
            embedding,
        )
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMemoryRow> {
    Ok(RawMemoryRow {
        id: row.get(0)?,
        content: row.get(1)?,
        area: row.get(2)?,
        metadata: row.get(3)?,
        created_at: row.get(4)?,
        embedding: row.get(5)?,
    })
}

/// Distinct lowercase alphanumeric terms of at least two characters.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of query terms present in the content.
fn lexical_coverage(query_terms: &HashSet<String>, content: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms = terms(content);
    let hits = query_terms
        .iter()
        .filter(|t| content_terms.contains(*t))
        .count();
    hits as f32 / query_terms.len() as f32
}

/// Compute cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Serialize embedding to bytes for SQLite BLOB storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Deserialize embedding from bytes.
fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
