//! Property-graph model and the graph store trait.
//!
//! Nodes are upserted by a natural key and carry a label set plus a JSON
//! property map. Edges are unique per (source, type, target), matching
//! MERGE semantics of property-graph query languages.

use crate::error::MemSyncResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// JSON property map stored on nodes and edges.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Store-assigned node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of node labels this core reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    /// Graph mirror of a vector-store memory.
    Memory,
    /// Any extracted entity (always present on entity nodes).
    Entity,
    /// Entity of kind person.
    Person,
    /// Entity of kind company.
    Company,
    /// Entity of kind technology.
    Technology,
    /// Entity of kind product.
    Product,
    /// Entity of kind location.
    Location,
    /// Property owner tracked by validation workflows.
    Owner,
    /// Contact record linked to an owner.
    Contact,
    /// Numbered batch grouping memories.
    Batch,
}

impl NodeLabel {
    /// Every label, in declaration order.
    pub const ALL: [NodeLabel; 10] = [
        Self::Memory,
        Self::Entity,
        Self::Person,
        Self::Company,
        Self::Technology,
        Self::Product,
        Self::Location,
        Self::Owner,
        Self::Contact,
        Self::Batch,
    ];

    /// Label as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "Memory",
            Self::Entity => "Entity",
            Self::Person => "Person",
            Self::Company => "Company",
            Self::Technology => "Technology",
            Self::Product => "Product",
            Self::Location => "Location",
            Self::Owner => "Owner",
            Self::Contact => "Contact",
            Self::Batch => "Batch",
        }
    }

    /// Parse a stored label.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == raw)
    }
}

impl std::fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper-snake relationship type, e.g. `WORKS_AT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationType(String);

impl RelationType {
    /// Normalize a free-form type: uppercase, non-alphanumerics become `_`,
    /// repeats collapse. Blank input becomes `RELATED_TO`.
    pub fn parse(raw: &str) -> Self {
        let mut out = String::with_capacity(raw.len());
        for c in raw.trim().chars() {
            if c.is_ascii_alphanumeric() {
                out.push(c.to_ascii_uppercase());
            } else if !out.ends_with('_') {
                out.push('_');
            }
        }
        let trimmed = out.trim_matches('_');
        if trimmed.is_empty() {
            Self::related_to()
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Memory -> entity provenance edge.
    pub fn mentions() -> Self {
        Self("MENTIONS".to_string())
    }

    /// Fallback for untyped relationships.
    pub fn related_to() -> Self {
        Self("RELATED_TO".to_string())
    }

    /// Owner -> contact edge.
    pub fn has_contact() -> Self {
        Self("HAS_CONTACT".to_string())
    }

    /// Memory -> owner validation edge.
    pub fn validates() -> Self {
        Self("VALIDATES".to_string())
    }

    /// Batch -> memory membership edge.
    pub fn contains_memory() -> Self {
        Self("CONTAINS_MEMORY".to_string())
    }

    /// The normalized type string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Natural key a node is upserted by: its primary label plus identifying properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    /// Primary label.
    pub label: NodeLabel,
    /// Identifying property values, in a fixed order.
    pub parts: Vec<(String, String)>,
}

impl NodeKey {
    /// Build a key from a label and identifying properties.
    pub fn new(label: NodeLabel, parts: &[(&str, &str)]) -> Self {
        Self {
            label,
            parts: parts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Key of the graph mirror of a memory.
    pub fn memory(memory_id: &str) -> Self {
        Self::new(NodeLabel::Memory, &[("id", memory_id)])
    }

    /// Key of an entity, scoped to the memory that mentions it.
    /// `canonical_name` must already be canonicalized.
    pub fn entity(canonical_name: &str, memory_id: &str) -> Self {
        Self::new(
            NodeLabel::Entity,
            &[("name", canonical_name), ("memory_id", memory_id)],
        )
    }

    /// Stable string encoding used as the unique store key.
    pub fn encode(&self) -> String {
        let mut out = String::from(self.label.as_str());
        for (k, v) in &self.parts {
            out.push('|');
            out.push_str(k);
            out.push('=');
            out.push_str(&v.replace('\\', "\\\\").replace('|', "\\|"));
        }
        out
    }
}

/// A node read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Store id.
    pub id: NodeId,
    /// Encoded natural key.
    pub key: String,
    /// Labels, sorted.
    pub labels: Vec<NodeLabel>,
    /// Properties.
    pub properties: Properties,
}

impl GraphNode {
    /// String property, if present and a string.
    pub fn str_prop(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str())
    }

    /// Whether the node carries a label.
    pub fn has_label(&self, label: NodeLabel) -> bool {
        self.labels.contains(&label)
    }

    /// Most specific label: the first one other than `Entity`, else `Entity`.
    pub fn primary_label(&self) -> Option<NodeLabel> {
        self.labels
            .iter()
            .copied()
            .find(|l| *l != NodeLabel::Entity)
            .or_else(|| self.labels.first().copied())
    }
}

/// A directed edge read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node.
    pub source: NodeId,
    /// Relationship type.
    pub rel_type: RelationType,
    /// Target node.
    pub target: NodeId,
    /// Edge properties.
    pub properties: Properties,
}

/// Edge direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Edges leaving the node.
    Outgoing,
    /// Edges arriving at the node.
    Incoming,
}

/// Property predicate for node lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyFilter {
    /// Property equals a JSON scalar.
    Equals(String, serde_json::Value),
    /// String property contains the needle, case-insensitively. An empty
    /// needle matches every node.
    Contains(String, String),
}

/// Label-scoped node lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeQuery {
    /// Required label.
    pub label: NodeLabel,
    /// Optional property predicate.
    pub filter: Option<PropertyFilter>,
    /// Property to sort by, descending.
    pub order_desc: Option<String>,
    /// Row cap.
    pub limit: usize,
}

impl NodeQuery {
    /// All nodes with a label, capped at `limit`.
    pub fn label(label: NodeLabel, limit: usize) -> Self {
        Self {
            label,
            filter: None,
            order_desc: None,
            limit,
        }
    }

    /// Require a property to equal a value.
    pub fn where_eq(mut self, property: &str, value: impl Into<serde_json::Value>) -> Self {
        self.filter = Some(PropertyFilter::Equals(property.to_string(), value.into()));
        self
    }

    /// Require a string property to contain a needle.
    pub fn where_contains(mut self, property: &str, needle: &str) -> Self {
        self.filter = Some(PropertyFilter::Contains(
            property.to_string(),
            needle.to_string(),
        ));
        self
    }

    /// Sort descending by a property.
    pub fn order_desc(mut self, property: &str) -> Self {
        self.order_desc = Some(property.to_string());
        self
    }
}

/// Node and edge counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    /// Total nodes.
    pub node_count: u64,
    /// Total edges.
    pub edge_count: u64,
    /// Nodes per label (a node with two labels counts under both).
    pub counts_by_label: BTreeMap<String, u64>,
}

/// Property-graph database with upsert-style merge semantics.
///
/// Calls are blocking; async callers should run them on a blocking thread.
pub trait GraphStore: Send + Sync {
    /// Round-trip check used at construction.
    fn ping(&self) -> MemSyncResult<()>;

    /// Create a range index on (label, property) if it does not exist.
    fn create_range_index(&self, label: NodeLabel, property: &str) -> MemSyncResult<()>;

    /// Upsert a node by key: add `labels` (plus the key label) and merge
    /// `properties` over existing ones.
    fn merge_node(
        &self,
        key: &NodeKey,
        labels: &[NodeLabel],
        properties: &Properties,
    ) -> MemSyncResult<NodeId>;

    /// Look a node up by key.
    fn find_node(&self, key: &NodeKey) -> MemSyncResult<Option<GraphNode>>;

    /// Look a node up by id.
    fn get_node(&self, id: NodeId) -> MemSyncResult<Option<GraphNode>>;

    /// Label-scoped lookup.
    fn find_nodes(&self, query: &NodeQuery) -> MemSyncResult<Vec<GraphNode>>;

    /// Upsert the edge (source)-[rel]->(target), merging `properties`.
    fn merge_edge(
        &self,
        source: NodeId,
        rel: &RelationType,
        target: NodeId,
        properties: &Properties,
    ) -> MemSyncResult<()>;

    /// Edges touching a node, optionally of one type.
    fn edges(
        &self,
        node: NodeId,
        direction: Direction,
        rel: Option<&RelationType>,
    ) -> MemSyncResult<Vec<GraphEdge>>;

    /// Delete a node and every edge touching it. Returns the edges removed.
    fn detach_delete(&self, node: NodeId) -> MemSyncResult<usize>;

    /// Node and edge counts.
    fn statistics(&self) -> MemSyncResult<GraphStatistics>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_type_parse() {
        assert_eq!(RelationType::parse("works at").as_str(), "WORKS_AT");
        assert_eq!(RelationType::parse("CEO_OF").as_str(), "CEO_OF");
        assert_eq!(RelationType::parse(" co-founder of ").as_str(), "CO_FOUNDER_OF");
        assert_eq!(RelationType::parse("  ").as_str(), "RELATED_TO");
        assert_eq!(RelationType::parse("}) DETACH DELETE (n").as_str(), "DETACH_DELETE_N");
    }

    #[test]
    fn test_node_key_encoding() {
        let a = NodeKey::entity("jane doe", "m1");
        let b = NodeKey::entity("jane doe", "m2");
        assert_ne!(a.encode(), b.encode());
        assert_eq!(NodeKey::memory("m1").encode(), "Memory|id=m1");
        let tricky = NodeKey::entity("a|memory_id=m1", "m2");
        assert_ne!(tricky.encode(), NodeKey::entity("a", "m1").encode());
    }

    #[test]
    fn test_primary_label() {
        let node = GraphNode {
            id: NodeId(1),
            key: String::new(),
            labels: vec![NodeLabel::Entity, NodeLabel::Person],
            properties: Properties::new(),
        };
        assert_eq!(node.primary_label(), Some(NodeLabel::Person));
        assert_eq!(NodeLabel::parse("Company"), Some(NodeLabel::Company));
        assert_eq!(NodeLabel::parse("Bogus"), None);
    }
}
