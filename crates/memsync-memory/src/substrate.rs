//! Implementation of the `MemorySubstrate` facade.
//!
//! One substrate per process: it owns the stores, the background sync queue
//! and the components built over them.

use crate::consolidation::ConsolidationReconciler;
use crate::coordinator::{GraphSyncHandler, SaveReceipt, WriteCoordinator};
use crate::embedding::OpenAiCompatEmbedder;
use crate::extraction::ExtractionPipeline;
use crate::generation::OpenAiCompatGenerator;
use crate::knowledge::SqliteGraphStore;
use crate::search::SearchFederator;
use crate::semantic::SqliteVectorStore;
use crate::sync_queue::SyncQueue;
use crate::writer::GraphSyncWriter;
use memsync_types::config::MemorySyncConfig;
use memsync_types::error::{MemSyncError, MemSyncResult};
use memsync_types::generation::TextGenerator;
use memsync_types::graph::{
    Direction, GraphStatistics, GraphStore, NodeId, NodeKey, NodeLabel, NodeQuery, RelationType,
};
use memsync_types::memory::{ConsolidationLink, Metadata, VectorStore};
use memsync_types::search::{EntityAnalysis, SearchOutcome};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Range indexes created when the graph store connects.
const RANGE_INDEXES: [(NodeLabel, &str); 8] = [
    (NodeLabel::Memory, "id"),
    (NodeLabel::Entity, "name"),
    (NodeLabel::Entity, "canonical_name"),
    (NodeLabel::Person, "name"),
    (NodeLabel::Company, "name"),
    (NodeLabel::Location, "name"),
    (NodeLabel::Product, "name"),
    (NodeLabel::Technology, "name"),
];

/// Cap on entity nodes removed per forgotten memory.
const FORGET_SCAN_LIMIT: usize = 10_000;

/// Vector and graph memory behind one save/search API.
pub struct MemorySubstrate {
    vector: Arc<dyn VectorStore>,
    graph: Option<Arc<dyn GraphStore>>,
    coordinator: WriteCoordinator,
    federator: SearchFederator,
    reconciler: Option<ConsolidationReconciler>,
}

impl MemorySubstrate {
    /// Assemble a substrate over existing stores.
    ///
    /// The graph store is pinged once; if that fails the substrate runs
    /// vector-only for its whole lifetime. Must be called inside a tokio
    /// runtime since the sync workers are spawned here.
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Option<Arc<dyn GraphStore>>,
        generator: Option<Arc<dyn TextGenerator>>,
        config: &MemorySyncConfig,
    ) -> Self {
        let graph = graph.and_then(|g| match g.ping() {
            Ok(()) => {
                for (label, property) in RANGE_INDEXES {
                    if let Err(e) = g.create_range_index(label, property) {
                        warn!(%label, property, error = %e, "Failed to create range index");
                    }
                }
                info!("Graph store connected");
                Some(g)
            }
            Err(e) => {
                warn!(error = %e, "Graph store unreachable, running in vector-only mode");
                None
            }
        });

        let queue = graph.as_ref().map(|g| {
            let pipeline = ExtractionPipeline::new(generator, &config.extraction);
            let writer = GraphSyncWriter::new(Arc::clone(g), config.extraction.mirror_content_chars);
            SyncQueue::start(
                Arc::new(GraphSyncHandler::new(pipeline, writer)),
                &config.sync,
            )
        });

        Self {
            coordinator: WriteCoordinator::new(Arc::clone(&vector), queue),
            federator: SearchFederator::new(graph.clone(), Arc::clone(&vector), config.search.clone()),
            reconciler: graph.clone().map(ConsolidationReconciler::new),
            vector,
            graph,
        }
    }

    /// Open the SQLite stores, optional embedder and optional generator named by `config`.
    ///
    /// Fails only if the vector store cannot be opened; a graph store that
    /// cannot be opened puts the substrate in vector-only mode.
    pub fn open(config: &MemorySyncConfig) -> MemSyncResult<Self> {
        let mut store = SqliteVectorStore::open(&config.vector_path())?;
        if let Some(ref embedding) = config.vector.embedding {
            info!(model = %embedding.model, "Embedding similarity enabled");
            store = store.with_embedder(Arc::new(OpenAiCompatEmbedder::from_config(embedding)));
        }
        let vector: Arc<dyn VectorStore> = Arc::new(store);

        let graph: Option<Arc<dyn GraphStore>> = if config.graph.enabled {
            match SqliteGraphStore::open(&config.graph_path()) {
                Ok(g) => Some(Arc::new(g) as Arc<dyn GraphStore>),
                Err(e) => {
                    warn!(
                        path = %config.graph_path().display(),
                        error = %e,
                        "Failed to open graph store"
                    );
                    None
                }
            }
        } else {
            info!("Graph store disabled by configuration");
            None
        };

        let generator = config
            .generator
            .as_ref()
            .filter(|_| config.extraction.structured)
            .map(|g| Arc::new(OpenAiCompatGenerator::from_config(g)) as Arc<dyn TextGenerator>);

        Ok(Self::new(vector, graph, generator, config))
    }

    /// Whether the graph store is out of use.
    pub fn is_degraded(&self) -> bool {
        self.graph.is_none()
    }

    /// The write coordinator.
    pub fn coordinator(&self) -> &WriteCoordinator {
        &self.coordinator
    }

    /// The search federator.
    pub fn federator(&self) -> &SearchFederator {
        &self.federator
    }

    /// The background sync queue, when the graph is in use.
    pub fn sync_queue(&self) -> Option<&SyncQueue> {
        self.coordinator.queue()
    }

    /// Save a memory and return its id. Graph sync runs in the background.
    pub async fn save(
        &self,
        content: &str,
        area: Option<&str>,
        metadata: Metadata,
    ) -> MemSyncResult<String> {
        self.coordinator.save(content, area, metadata).await
    }

    /// Save a memory and return a receipt with the graph-sync status.
    pub async fn save_tracked(
        &self,
        content: &str,
        area: Option<&str>,
        metadata: Metadata,
    ) -> MemSyncResult<SaveReceipt> {
        self.coordinator.save_tracked(content, area, metadata).await
    }

    /// Federated search.
    pub async fn search(&self, query: &str, limit: usize) -> MemSyncResult<SearchOutcome> {
        self.federator.search(query, limit).await
    }

    /// Contact details and relationships of an entity across memories.
    pub async fn analyze(&self, name: &str) -> MemSyncResult<EntityAnalysis> {
        self.federator.analyze(name).await
    }

    /// Graph node and edge counts.
    pub async fn statistics(&self) -> MemSyncResult<GraphStatistics> {
        self.federator.statistics().await
    }

    /// Resolve once every scheduled graph sync has ended.
    pub async fn wait_for_graph_sync(&self) {
        self.coordinator.wait_for_graph_sync().await;
    }

    /// Replace `link.old_memory_id` by `link.new_memory_id`.
    ///
    /// Graph relationships move first; the old vector record is deleted only
    /// after the transfer succeeded. Returns the number of relationships moved.
    pub async fn consolidate(&self, link: &ConsolidationLink) -> MemSyncResult<usize> {
        if link.old_memory_id == link.new_memory_id {
            return Ok(0);
        }
        self.settle(&link.old_memory_id).await;

        let transferred = match self.reconciler {
            Some(ref reconciler) => {
                let reconciler = reconciler.clone();
                let (old, new) = (link.old_memory_id.clone(), link.new_memory_id.clone());
                tokio::task::spawn_blocking(move || reconciler.transfer_relationships(&old, &new))
                    .await
                    .map_err(|e| MemSyncError::Internal(format!("consolidation task panicked: {e}")))??
            }
            None => 0,
        };

        self.vector.delete(&link.old_memory_id).await?;
        info!(
            old_memory_id = %link.old_memory_id,
            new_memory_id = %link.new_memory_id,
            transferred,
            "Consolidation applied"
        );
        Ok(transferred)
    }

    /// Delete a memory from both stores. Returns whether the vector record existed.
    ///
    /// Graph cleanup failures are logged; the vector deletion stands.
    pub async fn forget(&self, memory_id: &str) -> MemSyncResult<bool> {
        self.settle(memory_id).await;
        let existed = self.vector.delete(memory_id).await?;

        if let Some(ref graph) = self.graph {
            let graph = Arc::clone(graph);
            let id = memory_id.to_string();
            let result = tokio::task::spawn_blocking(move || purge_graph(graph.as_ref(), &id))
                .await
                .map_err(|e| MemSyncError::Internal(format!("forget task panicked: {e}")))
                .and_then(|r| r);
            match result {
                Ok(removed) => info!(memory_id = %memory_id, removed, "Memory forgotten"),
                Err(e) => warn!(memory_id = %memory_id, error = %e, "Graph cleanup failed"),
            }
        }
        Ok(existed)
    }

    /// Wait out an in-flight sync of `memory_id` so it cannot recreate the node.
    async fn settle(&self, memory_id: &str) {
        if let Some(queue) = self.coordinator.queue() {
            if queue.pending_memory_ids().iter().any(|id| id == memory_id) {
                queue.wait_idle().await;
            }
        }
    }
}

/// Detach-delete the Memory node, the entities it mentions and the entities
/// scoped to it. Returns nodes removed.
///
/// Consolidation moves MENTIONS edges onto the surviving memory while the
/// entity keeps its original `memory_id`, so both lookups are needed. An
/// entity another memory still mentions is left alone.
fn purge_graph(graph: &dyn GraphStore, memory_id: &str) -> MemSyncResult<usize> {
    let mentions = RelationType::mentions();
    let memory_node = graph.find_node(&NodeKey::memory(memory_id))?.map(|n| n.id);

    let mut candidates: Vec<NodeId> = Vec::new();
    if let Some(node) = memory_node {
        for edge in graph.edges(node, Direction::Outgoing, Some(&mentions))? {
            candidates.push(edge.target);
        }
    }
    let scoped = graph.find_nodes(
        &NodeQuery::label(NodeLabel::Entity, FORGET_SCAN_LIMIT).where_eq("memory_id", memory_id),
    )?;
    candidates.extend(scoped.into_iter().map(|n| n.id));

    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut doomed: Vec<NodeId> = Vec::new();
    for id in candidates {
        if !seen.insert(id) {
            continue;
        }
        let shared = graph
            .edges(id, Direction::Incoming, Some(&mentions))?
            .iter()
            .any(|e| Some(e.source) != memory_node);
        if shared {
            debug!(memory_id = %memory_id, node = %id, "Entity still mentioned elsewhere, kept");
        } else {
            doomed.push(id);
        }
    }

    let mut removed = 0;
    if let Some(node) = memory_node {
        graph.detach_delete(node)?;
        removed += 1;
    }
    for id in doomed {
        graph.detach_delete(id)?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memsync_types::graph::{GraphEdge, GraphNode, Properties};
    use memsync_types::search::SearchSource;

    fn substrate() -> (MemorySubstrate, Arc<SqliteVectorStore>, Arc<SqliteGraphStore>) {
        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let graph = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let substrate = MemorySubstrate::new(
            vector.clone(),
            Some(graph.clone()),
            None,
            &MemorySyncConfig::default(),
        );
        (substrate, vector, graph)
    }

    /// Graph store that refuses connections.
    struct Unreachable;

    impl GraphStore for Unreachable {
        fn ping(&self) -> MemSyncResult<()> {
            Err(MemSyncError::StoreUnavailable("connection refused".into()))
        }
        fn create_range_index(&self, _: NodeLabel, _: &str) -> MemSyncResult<()> {
            unreachable!()
        }
        fn merge_node(&self, _: &NodeKey, _: &[NodeLabel], _: &Properties) -> MemSyncResult<NodeId> {
            unreachable!()
        }
        fn find_node(&self, _: &NodeKey) -> MemSyncResult<Option<GraphNode>> {
            unreachable!()
        }
        fn get_node(&self, _: NodeId) -> MemSyncResult<Option<GraphNode>> {
            unreachable!()
        }
        fn find_nodes(&self, _: &NodeQuery) -> MemSyncResult<Vec<GraphNode>> {
            unreachable!()
        }
        fn merge_edge(&self, _: NodeId, _: &RelationType, _: NodeId, _: &Properties) -> MemSyncResult<()> {
            unreachable!()
        }
        fn edges(&self, _: NodeId, _: Direction, _: Option<&RelationType>) -> MemSyncResult<Vec<GraphEdge>> {
            unreachable!()
        }
        fn detach_delete(&self, _: NodeId) -> MemSyncResult<usize> {
            unreachable!()
        }
        fn statistics(&self) -> MemSyncResult<GraphStatistics> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_unreachable_graph_means_degraded() {
        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let substrate = MemorySubstrate::new(
            vector,
            Some(Arc::new(Unreachable)),
            None,
            &MemorySyncConfig::default(),
        );
        assert!(substrate.is_degraded());
        assert!(substrate.sync_queue().is_none());

        let id = substrate
            .save("Dentist appointment on 2024-03-15", None, Metadata::new())
            .await
            .unwrap();
        assert!(!id.is_empty());

        let outcome = substrate.search("dentist appointment", 5).await.unwrap();
        assert_eq!(outcome.source(), SearchSource::Vector);
        assert_eq!(outcome.hits().len(), 1);
        assert!(matches!(
            substrate.statistics().await,
            Err(MemSyncError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_range_indexes_created() {
        let (_substrate, _, graph) = substrate();
        // Creating again is idempotent.
        for (label, property) in RANGE_INDEXES {
            graph.create_range_index(label, property).unwrap();
        }
    }

    #[tokio::test]
    async fn test_consolidate_moves_graph_then_deletes_vector() {
        let (substrate, vector, graph) = substrate();
        let old = substrate
            .save("Call ops at ops@acme.com", None, Metadata::new())
            .await
            .unwrap();
        let new = substrate
            .save("Ops contact is ops@acme.com", None, Metadata::new())
            .await
            .unwrap();

        let link = ConsolidationLink {
            old_memory_id: old.clone(),
            new_memory_id: new.clone(),
        };
        // Regex-only extraction produces no entities, so nothing moves.
        assert_eq!(substrate.consolidate(&link).await.unwrap(), 0);
        assert!(vector.get(&old).await.unwrap().is_none());
        assert!(vector.get(&new).await.unwrap().is_some());
        assert!(graph.find_node(&NodeKey::memory(&old)).unwrap().is_none());
        let node = graph.find_node(&NodeKey::memory(&new)).unwrap().unwrap();
        assert_eq!(node.str_prop("consolidated_from"), Some(old.as_str()));
    }

    #[tokio::test]
    async fn test_self_consolidation_keeps_record() {
        let (substrate, vector, _) = substrate();
        let id = substrate.save("keep me", None, Metadata::new()).await.unwrap();
        let link = ConsolidationLink {
            old_memory_id: id.clone(),
            new_memory_id: id.clone(),
        };
        assert_eq!(substrate.consolidate(&link).await.unwrap(), 0);
        assert!(vector.get(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_forget_removes_both_sides() {
        let (substrate, vector, graph) = substrate();
        let id = substrate
            .save("Temporary note", Some("scratch"), Metadata::new())
            .await
            .unwrap();
        substrate.wait_for_graph_sync().await;
        assert!(graph.find_node(&NodeKey::memory(&id)).unwrap().is_some());

        assert!(substrate.forget(&id).await.unwrap());
        assert!(vector.get(&id).await.unwrap().is_none());
        assert!(graph.find_node(&NodeKey::memory(&id)).unwrap().is_none());
        assert!(!substrate.forget(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemorySyncConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let substrate = MemorySubstrate::open(&config).unwrap();
        assert!(!substrate.is_degraded());
        substrate.save("persisted", None, Metadata::new()).await.unwrap();
        substrate.wait_for_graph_sync().await;
        assert!(dir.path().join("vectors.db").exists());
        assert!(dir.path().join("graph.db").exists());
        let stats = substrate.statistics().await.unwrap();
        assert_eq!(stats.counts_by_label.get("Memory"), Some(&1));
    }

    #[tokio::test]
    async fn test_open_with_unreachable_embedder_keeps_lexical_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MemorySyncConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.graph.enabled = false;
        config.vector.embedding = Some(memsync_types::config::EmbeddingConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key_env: String::new(),
        });

        let substrate = MemorySubstrate::open(&config).unwrap();
        substrate
            .save("The boiler service is due in October", None, Metadata::new())
            .await
            .unwrap();
        let outcome = substrate.search("boiler service", 5).await.unwrap();
        assert_eq!(outcome.source(), SearchSource::Vector);
        assert_eq!(outcome.hits().len(), 1);
    }
}
