//! Write coordinator: the save entry point.
//!
//! The vector write is the only thing a caller waits on. Graph sync runs on
//! the background queue; if the graph store was unreachable when the
//! coordinator was built, it stays vector-only for its whole lifetime.

use crate::extraction::ExtractionPipeline;
use crate::sync_queue::{SyncHandler, SyncJob, SyncQueue, SyncTicket};
use crate::writer::{GraphSyncWriter, MemorySnapshot, WriteReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memsync_types::error::{MemSyncError, MemSyncResult};
use memsync_types::memory::{Metadata, VectorStore, AREA_KEY, DEFAULT_AREA, TIMESTAMP_KEY};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs extraction then the graph write for one memory.
pub struct GraphSyncHandler {
    pipeline: ExtractionPipeline,
    writer: GraphSyncWriter,
}

impl GraphSyncHandler {
    /// Combine a pipeline and a writer.
    pub fn new(pipeline: ExtractionPipeline, writer: GraphSyncWriter) -> Self {
        Self { pipeline, writer }
    }
}

#[async_trait]
impl SyncHandler for GraphSyncHandler {
    async fn handle(&self, job: SyncJob) -> MemSyncResult<WriteReport> {
        let extraction = self.pipeline.extract(&job.memory.content).await;
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || writer.write(&job.memory, &extraction))
            .await
            .map_err(|e| MemSyncError::Internal(format!("graph write task panicked: {e}")))?
    }
}

/// What happened to the graph side of a save.
#[derive(Debug)]
pub enum GraphSyncStatus {
    /// Queued; the ticket resolves when the graph write ends.
    Scheduled(SyncTicket),
    /// The queue was full and the job was dropped.
    Dropped,
    /// The coordinator runs without a graph store.
    VectorOnly,
}

/// Result of `save_tracked`.
#[derive(Debug)]
pub struct SaveReceipt {
    /// Id assigned by the vector store.
    pub memory_id: String,
    /// Area the memory was saved under.
    pub area: String,
    /// Save time, also stored in the metadata.
    pub timestamp: DateTime<Utc>,
    /// Graph-side status.
    pub graph_sync: GraphSyncStatus,
}

/// Save path over the vector store plus optional background graph sync.
#[derive(Clone)]
pub struct WriteCoordinator {
    vector: Arc<dyn VectorStore>,
    queue: Option<SyncQueue>,
}

impl WriteCoordinator {
    /// Build a coordinator. `queue` is `None` in vector-only mode.
    pub fn new(vector: Arc<dyn VectorStore>, queue: Option<SyncQueue>) -> Self {
        if queue.is_none() {
            info!("Write coordinator running in vector-only mode");
        }
        Self { vector, queue }
    }

    /// Whether graph sync is permanently off.
    pub fn is_vector_only(&self) -> bool {
        self.queue.is_none()
    }

    /// The background queue, when graph sync is on.
    pub fn queue(&self) -> Option<&SyncQueue> {
        self.queue.as_ref()
    }

    /// Save a memory and return its id.
    pub async fn save(
        &self,
        content: &str,
        area: Option<&str>,
        metadata: Metadata,
    ) -> MemSyncResult<String> {
        Ok(self.save_tracked(content, area, metadata).await?.memory_id)
    }

    /// Save a memory and report what happened on the graph side.
    ///
    /// Fails only when the content is blank or the vector write fails.
    pub async fn save_tracked(
        &self,
        content: &str,
        area: Option<&str>,
        mut metadata: Metadata,
    ) -> MemSyncResult<SaveReceipt> {
        if content.trim().is_empty() {
            return Err(MemSyncError::EmptyContent);
        }
        let area = area
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_AREA)
            .to_string();
        let timestamp = Utc::now();
        metadata.insert(AREA_KEY.to_string(), Value::String(area.clone()));
        metadata.insert(
            TIMESTAMP_KEY.to_string(),
            Value::String(timestamp.to_rfc3339()),
        );

        let memory_id = self.vector.insert(content, metadata).await?;
        debug!(memory_id = %memory_id, area = %area, "Memory stored in vector store");

        let graph_sync = match self.queue {
            None => GraphSyncStatus::VectorOnly,
            Some(ref queue) => {
                let job = SyncJob {
                    memory: MemorySnapshot {
                        memory_id: memory_id.clone(),
                        area: area.clone(),
                        timestamp,
                        content: content.to_string(),
                    },
                };
                match queue.schedule(job) {
                    Some(ticket) => GraphSyncStatus::Scheduled(ticket),
                    None => GraphSyncStatus::Dropped,
                }
            }
        };

        Ok(SaveReceipt {
            memory_id,
            area,
            timestamp,
            graph_sync,
        })
    }

    /// Resolve once every scheduled graph sync has ended.
    pub async fn wait_for_graph_sync(&self) {
        if let Some(ref queue) = self.queue {
            queue.wait_idle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SqliteGraphStore;
    use crate::semantic::SqliteVectorStore;
    use crate::sync_queue::SyncOutcome;
    use memsync_types::config::{ExtractionConfig, SyncConfig};
    use memsync_types::graph::{GraphStore, NodeKey};

    fn coordinator_with_graph() -> (WriteCoordinator, Arc<SqliteVectorStore>, Arc<SqliteGraphStore>) {
        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let graph = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let handler = GraphSyncHandler::new(
            ExtractionPipeline::new(None, &ExtractionConfig::default()),
            GraphSyncWriter::new(graph.clone(), 2000),
        );
        let queue = SyncQueue::start(Arc::new(handler), &SyncConfig::default());
        (
            WriteCoordinator::new(vector.clone(), Some(queue)),
            vector,
            graph,
        )
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let (coordinator, _, _) = coordinator_with_graph();
        let err = coordinator.save("   \n", None, Metadata::new()).await.unwrap_err();
        assert!(matches!(err, MemSyncError::EmptyContent));
    }

    #[tokio::test]
    async fn test_save_defaults_area_and_stamps_metadata() {
        let (coordinator, vector, _) = coordinator_with_graph();
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), Value::String("chat".into()));
        let id = coordinator
            .save("Remember the milk", None, metadata)
            .await
            .unwrap();

        let record = vector.get(&id).await.unwrap().unwrap();
        assert_eq!(record.area, "main");
        assert_eq!(record.metadata.get("source"), Some(&Value::String("chat".into())));
        assert!(record.metadata.contains_key(TIMESTAMP_KEY));
    }

    #[tokio::test]
    async fn test_identical_content_gets_distinct_ids() {
        let (coordinator, _, _) = coordinator_with_graph();
        let a = coordinator.save("same text", Some("main"), Metadata::new()).await.unwrap();
        let b = coordinator.save("same text", Some("main"), Metadata::new()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_graph_mirror_created_in_background() {
        let (coordinator, _, graph) = coordinator_with_graph();
        let receipt = coordinator
            .save_tracked("Reach ops at ops@acme.com", Some("fragments"), Metadata::new())
            .await
            .unwrap();
        let GraphSyncStatus::Scheduled(ticket) = receipt.graph_sync else {
            panic!("graph sync should be scheduled");
        };
        assert!(matches!(ticket.wait().await, SyncOutcome::Completed(_)));

        let node = graph
            .find_node(&NodeKey::memory(&receipt.memory_id))
            .unwrap()
            .unwrap();
        assert_eq!(node.str_prop("area"), Some("fragments"));
        assert_eq!(
            node.properties.get("emails"),
            Some(&serde_json::json!(["ops@acme.com"]))
        );
    }

    #[tokio::test]
    async fn test_vector_only_mode() {
        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let coordinator = WriteCoordinator::new(vector, None);
        assert!(coordinator.is_vector_only());
        let receipt = coordinator
            .save_tracked("still saved", None, Metadata::new())
            .await
            .unwrap();
        assert!(matches!(receipt.graph_sync, GraphSyncStatus::VectorOnly));
        coordinator.wait_for_graph_sync().await;
    }
}
