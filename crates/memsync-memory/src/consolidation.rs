//! Consolidation reconciler.
//!
//! When an external consolidation process replaces one memory with another,
//! the graph provenance (MENTIONS edges) moves from the old Memory node to
//! the new one and the old node is detach-deleted. This must run before the
//! old vector record is purged.

use memsync_types::error::{MemSyncError, MemSyncResult};
use memsync_types::graph::{Direction, GraphStore, NodeKey, Properties, RelationType};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Properties copied from the old node when the new node lacks them.
const INHERITED: [&str; 3] = ["content", "area", "timestamp"];

/// Re-points graph relationships from a superseded memory to its replacement.
#[derive(Clone)]
pub struct ConsolidationReconciler {
    graph: Arc<dyn GraphStore>,
}

impl ConsolidationReconciler {
    /// Create a reconciler over a graph store.
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Move every outgoing MENTIONS edge of `old_memory_id` to
    /// `new_memory_id`, delete the old node, and return the number moved.
    ///
    /// A missing old node means the pair was already reconciled: returns 0.
    pub fn transfer_relationships(
        &self,
        old_memory_id: &str,
        new_memory_id: &str,
    ) -> MemSyncResult<usize> {
        if old_memory_id == new_memory_id {
            debug!(memory_id = %old_memory_id, "Consolidation onto itself, nothing to transfer");
            return Ok(0);
        }

        let Some(old) = self.graph.find_node(&NodeKey::memory(old_memory_id))? else {
            let missing = MemSyncError::ReconciliationSourceMissing(old_memory_id.to_string());
            debug!(error = %missing, "Treating as already reconciled");
            return Ok(0);
        };

        let new_key = NodeKey::memory(new_memory_id);
        let existing = self.graph.find_node(&new_key)?;
        let mut props = Properties::new();
        props.insert("id".into(), Value::String(new_memory_id.to_string()));
        props.insert(
            "consolidated_from".into(),
            Value::String(old_memory_id.to_string()),
        );
        for key in INHERITED {
            let present = existing
                .as_ref()
                .is_some_and(|n| n.properties.contains_key(key));
            if !present {
                if let Some(value) = old.properties.get(key) {
                    props.insert(key.to_string(), value.clone());
                }
            }
        }
        let new_id = self.graph.merge_node(&new_key, &[], &props)?;

        let mentions = RelationType::mentions();
        let edges = self
            .graph
            .edges(old.id, Direction::Outgoing, Some(&mentions))?;
        for edge in &edges {
            self.graph
                .merge_edge(new_id, &mentions, edge.target, &edge.properties)?;
        }
        self.graph.detach_delete(old.id)?;

        info!(
            old_memory_id = %old_memory_id,
            new_memory_id = %new_memory_id,
            transferred = edges.len(),
            "Transferred graph relationships"
        );
        Ok(edges.len())
    }
}
