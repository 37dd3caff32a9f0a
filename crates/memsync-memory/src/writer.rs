//! Graph sync writer.
//!
//! Mirrors one memory and its extraction into the graph store with
//! natural-key upserts, so replaying the same write leaves node and edge
//! counts unchanged. A failed entity or relationship is logged and counted;
//! the rest of the batch still goes through.

use chrono::{DateTime, Utc};
use memsync_types::error::{MemSyncError, MemSyncResult};
use memsync_types::extraction::{
    canonicalize, slugify, Entity, Extraction, Relationship, TokenKind,
};
use memsync_types::graph::{GraphStore, NodeId, NodeKey, NodeLabel, Properties, RelationType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The memory fields mirrored onto the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot {
    /// Vector-store id.
    pub memory_id: String,
    /// Logical namespace.
    pub area: String,
    /// Save time.
    pub timestamp: DateTime<Utc>,
    /// Full content (truncated on write).
    pub content: String,
}

/// Counts from one `write` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Entity nodes upserted.
    pub entities_written: usize,
    /// Relationship edges upserted.
    pub relationships_written: usize,
    /// Relationships whose endpoints were not in the batch.
    pub relationships_skipped: usize,
    /// Entity or relationship writes that failed.
    pub failures: usize,
}

/// Writes extraction results into a graph store.
#[derive(Clone)]
pub struct GraphSyncWriter {
    graph: Arc<dyn GraphStore>,
    content_limit: usize,
}

fn set(props: &mut Properties, key: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        props.insert(key.to_string(), Value::String(v.to_string()));
    }
}

impl GraphSyncWriter {
    /// Create a writer that keeps at most `content_limit` characters of content.
    pub fn new(graph: Arc<dyn GraphStore>, content_limit: usize) -> Self {
        Self {
            graph,
            content_limit,
        }
    }

    /// Upsert the Memory node, every entity, and every resolvable relationship.
    ///
    /// Only a failure on the Memory node itself is returned as an error.
    pub fn write(
        &self,
        memory: &MemorySnapshot,
        extraction: &Extraction,
    ) -> MemSyncResult<WriteReport> {
        let memory_node = self.write_memory(memory, extraction)?;
        let mut report = WriteReport::default();
        let mut nodes: HashMap<String, NodeId> = HashMap::new();

        for entity in &extraction.entities {
            match self.write_entity(memory, memory_node, entity) {
                Ok(id) => {
                    nodes.insert(canonicalize(&entity.name), id);
                    report.entities_written += 1;
                }
                Err(e) => {
                    warn!(
                        memory_id = %memory.memory_id,
                        entity = %entity.name,
                        error = %e,
                        "Entity write failed"
                    );
                    report.failures += 1;
                }
            }
        }

        let names = resolution_map(&extraction.entities);
        for rel in &extraction.relationships {
            let (Some(from), Some(to)) = (resolve(&names, &rel.from), resolve(&names, &rel.to))
            else {
                debug!(
                    memory_id = %memory.memory_id,
                    from = %rel.from,
                    to = %rel.to,
                    "Skipping relationship with an endpoint outside the batch"
                );
                report.relationships_skipped += 1;
                continue;
            };
            match self.write_relationship(memory, &nodes, from, to, rel) {
                Ok(()) => report.relationships_written += 1,
                Err(e) => {
                    warn!(
                        memory_id = %memory.memory_id,
                        rel_type = %rel.rel_type,
                        error = %e,
                        "Relationship write failed"
                    );
                    report.failures += 1;
                }
            }
        }

        info!(
            memory_id = %memory.memory_id,
            entities = report.entities_written,
            relationships = report.relationships_written,
            skipped = report.relationships_skipped,
            failures = report.failures,
            "Graph sync write finished"
        );
        Ok(report)
    }

    fn write_memory(&self, memory: &MemorySnapshot, extraction: &Extraction) -> MemSyncResult<NodeId> {
        let mut props = Properties::new();
        props.insert("id".into(), Value::String(memory.memory_id.clone()));
        props.insert(
            "content".into(),
            Value::String(memory.content.chars().take(self.content_limit).collect()),
        );
        props.insert("area".into(), Value::String(memory.area.clone()));
        props.insert("timestamp".into(), Value::String(memory.timestamp.to_rfc3339()));

        for (kind, key) in [
            (TokenKind::Email, "emails"),
            (TokenKind::Phone, "phones"),
            (TokenKind::Url, "urls"),
            (TokenKind::Date, "dates"),
        ] {
            let values: Vec<Value> = extraction
                .unattached()
                .filter(|t| t.kind == kind)
                .map(|t| Value::String(t.value.clone()))
                .collect();
            if !values.is_empty() {
                props.insert(key.into(), Value::Array(values));
            }
        }

        self.graph
            .merge_node(&NodeKey::memory(&memory.memory_id), &[], &props)
    }

    fn write_entity(
        &self,
        memory: &MemorySnapshot,
        memory_node: NodeId,
        entity: &Entity,
    ) -> MemSyncResult<NodeId> {
        let canonical = canonicalize(&entity.name);
        let mut props = Properties::new();
        props.insert("name".into(), Value::String(entity.name.trim().to_string()));
        props.insert("canonical_name".into(), Value::String(canonical.clone()));
        props.insert("memory_id".into(), Value::String(memory.memory_id.clone()));
        props.insert("type".into(), Value::String(entity.kind.as_str().into()));
        props.insert(
            "confidence".into(),
            Value::String(entity.confidence.as_str().into()),
        );
        props.insert("last_seen".into(), Value::String(memory.timestamp.to_rfc3339()));

        let contact = &entity.contact;
        set(&mut props, "phone", contact.phone.as_deref());
        if contact.phone.is_some() {
            set(&mut props, "phone_type", contact.phone_type.as_deref());
        }
        set(&mut props, "email", contact.email.as_deref());
        set(&mut props, "website", contact.website.as_deref());
        set(&mut props, "social", contact.social.as_deref());
        set(&mut props, "address", contact.address.as_deref());
        set(&mut props, "notes", entity.notes.as_deref());
        set(&mut props, "context", entity.context.as_deref());

        let label = entity.kind.label();
        let labels: &[NodeLabel] = if label == NodeLabel::Entity {
            &[]
        } else {
            std::slice::from_ref(&label)
        };
        let id = self.graph.merge_node(
            &NodeKey::entity(&canonical, &memory.memory_id),
            labels,
            &props,
        )?;
        self.graph
            .merge_edge(memory_node, &RelationType::mentions(), id, &Properties::new())?;
        Ok(id)
    }

    fn write_relationship(
        &self,
        memory: &MemorySnapshot,
        nodes: &HashMap<String, NodeId>,
        from: &str,
        to: &str,
        rel: &Relationship,
    ) -> MemSyncResult<()> {
        let source = self.entity_node(memory, nodes, from)?;
        let target = self.entity_node(memory, nodes, to)?;

        let mut props = Properties::new();
        set(&mut props, "since", rel.since.as_deref());
        set(&mut props, "until", rel.until.as_deref());
        if let Some(current) = rel.current {
            props.insert("current".into(), Value::Bool(current));
        }
        set(&mut props, "evidence", rel.evidence.as_deref());

        self.graph
            .merge_edge(source, &RelationType::parse(&rel.rel_type), target, &props)
    }

    fn entity_node(
        &self,
        memory: &MemorySnapshot,
        nodes: &HashMap<String, NodeId>,
        canonical: &str,
    ) -> MemSyncResult<NodeId> {
        if let Some(id) = nodes.get(canonical) {
            return Ok(*id);
        }
        self.graph
            .find_node(&NodeKey::entity(canonical, &memory.memory_id))?
            .map(|node| node.id)
            .ok_or_else(|| {
                MemSyncError::RecordWrite(format!("entity '{canonical}' was not written"))
            })
    }
}

/// Batch-local identifiers and names, mapped to canonical entity names.
fn resolution_map(entities: &[Entity]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entity in entities {
        let canonical = canonicalize(&entity.name);
        map.insert(entity.batch_id(), canonical.clone());
        map.insert(slugify(&entity.name), canonical.clone());
        map.insert(canonical.clone(), canonical);
    }
    map
}

fn resolve<'a>(names: &'a HashMap<String, String>, reference: &str) -> Option<&'a str> {
    names
        .get(reference.trim())
        .or_else(|| names.get(&canonicalize(reference)))
        .or_else(|| names.get(&slugify(reference)))
        .map(String::as_str)
}
