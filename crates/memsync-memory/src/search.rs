//! Search federator.
//!
//! Classifies a query, answers it from the graph store when one is
//! available, and falls back to vector similarity when the graph is absent
//! or fails at runtime. Also serves entity analysis and graph statistics.

use memsync_types::config::SearchConfig;
use memsync_types::error::{MemSyncError, MemSyncResult};
use memsync_types::extraction::{canonicalize, ContactInfo};
use memsync_types::graph::{
    Direction, GraphNode, GraphStatistics, GraphStore, NodeId, NodeLabel, NodeQuery,
    RelationType,
};
use memsync_types::memory::VectorStore;
use memsync_types::search::{
    EntityAnalysis, EntityProfile, RelationshipSummary, SearchHit, SearchIntent, SearchOutcome,
    SearchSource,
};
use regex_lite::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Cap on nodes scanned where a query has no row limit of its own.
const SCAN_LIMIT: usize = 10_000;

fn batch_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)batch\s+(\d+)").expect("batch regex is valid"))
}

fn owner_keywords() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)validated|owner").expect("owner regex is valid"))
}

/// Decide what a query is asking for.
pub fn classify(query: &str) -> SearchIntent {
    let lower = query.to_lowercase();
    if lower.contains("validated") || lower.contains("owner") {
        let stripped = owner_keywords().replace_all(query, " ");
        return SearchIntent::OwnerLookup {
            term: stripped.split_whitespace().collect::<Vec<_>>().join(" "),
        };
    }
    if lower.contains("batch") {
        let number = batch_regex()
            .captures(query)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        return SearchIntent::BatchLookup { number };
    }
    SearchIntent::FullText {
        term: query.trim().to_string(),
    }
}

fn snippet(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

/// Routes queries to the graph store or the vector store.
#[derive(Clone)]
pub struct SearchFederator {
    graph: Option<Arc<dyn GraphStore>>,
    vector: Arc<dyn VectorStore>,
    config: SearchConfig,
}

impl SearchFederator {
    /// Build a federator. `graph` is `None` in degraded mode.
    pub fn new(
        graph: Option<Arc<dyn GraphStore>>,
        vector: Arc<dyn VectorStore>,
        config: SearchConfig,
    ) -> Self {
        Self {
            graph,
            vector,
            config,
        }
    }

    /// Whether queries go to the vector store only.
    pub fn is_degraded(&self) -> bool {
        self.graph.is_none()
    }

    /// Search for `query`, returning at most `limit` rows (0 means the configured default).
    pub async fn search(&self, query: &str, limit: usize) -> MemSyncResult<SearchOutcome> {
        let limit = if limit == 0 {
            self.config.default_limit
        } else {
            limit
        };

        if let Some(ref graph) = self.graph {
            let intent = classify(query);
            debug!(?intent, limit, "Routing search to graph store");
            let chars = self.config.snippet_chars;
            let result = on_graph(Arc::clone(graph), move |g| {
                graph_search(g, &intent, limit, chars)
            })
            .await;
            match result {
                Ok(hits) => return Ok(SearchOutcome::from_hits(query, SearchSource::Graph, hits)),
                Err(e) => {
                    warn!(error = %e, "Graph search failed, falling back to vector search");
                }
            }
        }

        self.vector_search(query, limit).await
    }

    async fn vector_search(&self, query: &str, limit: usize) -> MemSyncResult<SearchOutcome> {
        let found = self
            .vector
            .search_similarity_threshold(query, limit, self.config.fallback_threshold, None)
            .await?;
        let hits = found
            .into_iter()
            .take(limit)
            .map(|m| SearchHit::Similar {
                id: m.record.id,
                content: snippet(&m.record.content, self.config.snippet_chars),
                score: m.score,
            })
            .collect();
        Ok(SearchOutcome::from_hits(query, SearchSource::Vector, hits))
    }

    /// Contact details and relationships of every entity named `name`.
    pub async fn analyze(&self, name: &str) -> MemSyncResult<EntityAnalysis> {
        let graph = self.require_graph()?;
        let name = name.trim().to_string();
        on_graph(graph, move |g| analyze_entity(g, &name)).await
    }

    /// Node and edge counts of the graph store.
    pub async fn statistics(&self) -> MemSyncResult<GraphStatistics> {
        let graph = self.require_graph()?;
        on_graph(graph, |g| g.statistics()).await
    }

    fn require_graph(&self) -> MemSyncResult<Arc<dyn GraphStore>> {
        self.graph.clone().ok_or_else(|| {
            MemSyncError::StoreUnavailable("graph store is not connected".to_string())
        })
    }
}

/// Run blocking graph work off the async executor.
async fn on_graph<T, F>(graph: Arc<dyn GraphStore>, work: F) -> MemSyncResult<T>
where
    F: FnOnce(&dyn GraphStore) -> MemSyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || work(graph.as_ref()))
        .await
        .map_err(|e| MemSyncError::Internal(format!("graph task panicked: {e}")))?
}

fn graph_search(
    graph: &dyn GraphStore,
    intent: &SearchIntent,
    limit: usize,
    chars: usize,
) -> MemSyncResult<Vec<SearchHit>> {
    match intent {
        SearchIntent::OwnerLookup { term } => owner_rows(graph, term, limit, chars),
        SearchIntent::BatchLookup { number: Some(n) } => batch_rows(graph, *n, limit, chars),
        SearchIntent::BatchLookup { number: None } => batch_summary(graph, limit),
        SearchIntent::FullText { term } => memory_rows(graph, term, limit, chars),
    }
}

/// Nodes at the other end of `node`'s edges of one type.
fn neighbors(
    graph: &dyn GraphStore,
    node: NodeId,
    direction: Direction,
    rel: &RelationType,
) -> MemSyncResult<Vec<GraphNode>> {
    let mut out = Vec::new();
    for edge in graph.edges(node, direction, Some(rel))? {
        let other = match direction {
            Direction::Outgoing => edge.target,
            Direction::Incoming => edge.source,
        };
        if let Some(n) = graph.get_node(other)? {
            out.push(n);
        }
    }
    Ok(out)
}

/// One optional slot per neighbor, or a single empty slot when there are none.
fn or_none(nodes: Vec<GraphNode>) -> Vec<Option<GraphNode>> {
    if nodes.is_empty() {
        vec![None]
    } else {
        nodes.into_iter().map(Some).collect()
    }
}

fn prop(node: &Option<GraphNode>, key: &str) -> Option<String> {
    node.as_ref()
        .and_then(|n| n.str_prop(key))
        .map(str::to_string)
}

fn validated(node: &GraphNode) -> bool {
    node.properties
        .get("validated")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn owner_rows(
    graph: &dyn GraphStore,
    term: &str,
    limit: usize,
    chars: usize,
) -> MemSyncResult<Vec<SearchHit>> {
    let owners = graph.find_nodes(
        &NodeQuery::label(NodeLabel::Owner, limit)
            .where_contains("name", term)
            .order_desc("last_updated"),
    )?;

    let mut hits = Vec::new();
    for owner in owners {
        let contacts = or_none(neighbors(
            graph,
            owner.id,
            Direction::Outgoing,
            &RelationType::has_contact(),
        )?);
        let memories = or_none(neighbors(
            graph,
            owner.id,
            Direction::Incoming,
            &RelationType::validates(),
        )?);
        for contact in &contacts {
            for memory in &memories {
                if hits.len() == limit {
                    return Ok(hits);
                }
                hits.push(SearchHit::Owner {
                    owner: owner.str_prop("name").unwrap_or_default().to_string(),
                    validated: validated(&owner),
                    phone: prop(contact, "phone"),
                    email: prop(contact, "email"),
                    memory: prop(memory, "content").map(|c| snippet(&c, chars)),
                });
            }
        }
    }
    Ok(hits)
}

fn batch_rows(
    graph: &dyn GraphStore,
    number: i64,
    limit: usize,
    chars: usize,
) -> MemSyncResult<Vec<SearchHit>> {
    let batches =
        graph.find_nodes(&NodeQuery::label(NodeLabel::Batch, SCAN_LIMIT).where_eq("number", number))?;

    let mut hits = Vec::new();
    for batch in batches {
        let memories = neighbors(
            graph,
            batch.id,
            Direction::Outgoing,
            &RelationType::contains_memory(),
        )?;
        for memory in memories {
            let owners = neighbors(graph, memory.id, Direction::Outgoing, &RelationType::validates())?;
            let mut rows: Vec<(Option<GraphNode>, Option<GraphNode>)> = Vec::new();
            for owner in or_none(owners) {
                let contacts = match owner {
                    Some(ref o) => neighbors(graph, o.id, Direction::Outgoing, &RelationType::has_contact())?,
                    None => Vec::new(),
                };
                for contact in or_none(contacts) {
                    rows.push((owner.clone(), contact));
                }
            }
            for (owner, contact) in rows {
                if hits.len() == limit {
                    return Ok(hits);
                }
                hits.push(SearchHit::BatchMemory {
                    memory: memory.str_prop("content").map(|c| snippet(c, chars)),
                    owner: prop(&owner, "name"),
                    validated: owner.as_ref().is_some_and(validated),
                    phone: prop(&contact, "phone"),
                    email: prop(&contact, "email"),
                });
            }
        }
    }
    Ok(hits)
}

fn batch_summary(graph: &dyn GraphStore, limit: usize) -> MemSyncResult<Vec<SearchHit>> {
    let mut rows = Vec::new();
    for batch in graph.find_nodes(&NodeQuery::label(NodeLabel::Batch, SCAN_LIMIT))? {
        let Some(number) = batch.properties.get("number").and_then(|v| v.as_i64()) else {
            continue;
        };
        let memories = graph
            .edges(batch.id, Direction::Outgoing, Some(&RelationType::contains_memory()))?
            .len() as u64;
        rows.push((number, memories));
    }
    rows.sort_by_key(|(number, _)| *number);
    Ok(rows
        .into_iter()
        .take(limit)
        .map(|(batch, memories)| SearchHit::BatchSummary { batch, memories })
        .collect())
}

fn memory_rows(
    graph: &dyn GraphStore,
    term: &str,
    limit: usize,
    chars: usize,
) -> MemSyncResult<Vec<SearchHit>> {
    let memories = graph.find_nodes(
        &NodeQuery::label(NodeLabel::Memory, limit)
            .where_contains("content", term)
            .order_desc("timestamp"),
    )?;

    let mut hits = Vec::new();
    for memory in memories {
        let id = memory.str_prop("id").unwrap_or_default().to_string();
        let content = memory.str_prop("content").map(|c| snippet(c, chars));
        let area = memory.str_prop("area").map(str::to_string);

        let mut related = Vec::new();
        for edge in graph.edges(memory.id, Direction::Outgoing, None)? {
            if let Some(target) = graph.get_node(edge.target)? {
                related.push((edge.rel_type, target));
            }
        }

        if related.is_empty() {
            if hits.len() == limit {
                break;
            }
            hits.push(SearchHit::Memory {
                id,
                content,
                area,
                relationship: None,
                entity_type: None,
                entity: None,
            });
            continue;
        }
        for (rel_type, target) in related {
            if hits.len() == limit {
                return Ok(hits);
            }
            hits.push(SearchHit::Memory {
                id: id.clone(),
                content: content.clone(),
                area: area.clone(),
                relationship: Some(rel_type.to_string()),
                entity_type: target.primary_label().map(|l| l.to_string()),
                entity: target.str_prop("name").map(str::to_string),
            });
        }
    }
    Ok(hits)
}

fn contact_of(node: &GraphNode) -> ContactInfo {
    let get = |key: &str| node.str_prop(key).map(str::to_string);
    ContactInfo {
        phone: get("phone"),
        phone_type: get("phone_type"),
        email: get("email"),
        website: get("website"),
        social: get("social"),
        address: get("address"),
    }
}

fn analyze_entity(graph: &dyn GraphStore, name: &str) -> MemSyncResult<EntityAnalysis> {
    let nodes = graph.find_nodes(
        &NodeQuery::label(NodeLabel::Entity, SCAN_LIMIT).where_eq("canonical_name", canonicalize(name)),
    )?;

    let mentions = RelationType::mentions();
    let mut analysis = EntityAnalysis {
        name: name.to_string(),
        ..Default::default()
    };

    for node in &nodes {
        analysis.profiles.push(EntityProfile {
            memory_id: node.str_prop("memory_id").map(str::to_string),
            label: node.primary_label().map(|l| l.to_string()),
            contact: contact_of(node),
            confidence: node.str_prop("confidence").map(str::to_string),
            notes: node.str_prop("notes").map(str::to_string),
            context: node.str_prop("context").map(str::to_string),
        });

        for direction in [Direction::Outgoing, Direction::Incoming] {
            for edge in graph.edges(node.id, direction, None)? {
                if edge.rel_type == mentions {
                    continue;
                }
                let other_id = match direction {
                    Direction::Outgoing => edge.target,
                    Direction::Incoming => edge.source,
                };
                let Some(other) = graph.get_node(other_id)? else {
                    continue;
                };
                let text = |key: &str| {
                    edge.properties
                        .get(key)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                let summary = RelationshipSummary {
                    rel_type: edge.rel_type.to_string(),
                    outgoing: direction == Direction::Outgoing,
                    other: other
                        .str_prop("name")
                        .map(str::to_string)
                        .unwrap_or_else(|| other.key.clone()),
                    other_label: other.primary_label().map(|l| l.to_string()),
                    since: text("since"),
                    until: text("until"),
                    current: edge.properties.get("current").and_then(|v| v.as_bool()),
                };
                if !analysis.relationships.contains(&summary) {
                    analysis.relationships.push(summary);
                }
            }
        }
    }

    debug!(
        entity = %name,
        occurrences = analysis.profiles.len(),
        relationships = analysis.relationships.len(),
        "Entity analysis finished"
    );
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SqliteGraphStore;
    use crate::semantic::SqliteVectorStore;
    use crate::writer::{GraphSyncWriter, MemorySnapshot};
    use chrono::{TimeZone, Utc};
    use memsync_types::extraction::{Entity, EntityKind, Extraction, Relationship};
    use memsync_types::graph::{GraphEdge, NodeKey, Properties};
    use memsync_types::memory::Metadata;
    use serde_json::json;

    fn props(value: serde_json::Value) -> Properties {
        value.as_object().cloned().unwrap_or_default()
    }

    fn write(graph: &Arc<SqliteGraphStore>, id: &str, day: u32, content: &str, extraction: Extraction) {
        GraphSyncWriter::new(graph.clone(), 2000)
            .write(
                &MemorySnapshot {
                    memory_id: id.into(),
                    area: "main".into(),
                    timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
                    content: content.into(),
                },
                &extraction,
            )
            .unwrap();
    }

    fn jane_at_acme() -> Extraction {
        let mut jane = Entity::new("Jane Doe", EntityKind::Person);
        jane.contact.email = Some("jane@acme.com".into());
        let mut rel = Relationship::new("Jane Doe", "WORKS_AT", "Acme Corp");
        rel.since = Some("2020".into());
        Extraction {
            entities: vec![jane, Entity::new("Acme Corp", EntityKind::Company)],
            relationships: vec![rel],
            contacts: vec![],
        }
    }

    fn federator(graph: Option<Arc<dyn GraphStore>>, vector: Arc<SqliteVectorStore>) -> SearchFederator {
        SearchFederator::new(graph, vector, SearchConfig::default())
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("Validated owner Smith"),
            SearchIntent::OwnerLookup {
                term: "Smith".into()
            }
        );
        assert_eq!(
            classify("owner"),
            SearchIntent::OwnerLookup { term: String::new() }
        );
        assert_eq!(
            classify("status of Batch 12"),
            SearchIntent::BatchLookup { number: Some(12) }
        );
        assert_eq!(classify("all batches"), SearchIntent::BatchLookup { number: None });
        assert_eq!(
            classify("  acme  "),
            SearchIntent::FullText {
                term: "acme".into()
            }
        );
    }

    #[tokio::test]
    async fn test_full_text_rows_per_relationship() {
        let graph = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        write(&graph, "m1", 1, "Jane Doe works at Acme Corp", jane_at_acme());
        write(&graph, "m2", 2, "Lunch with the ACME team", Extraction::default());
        write(&graph, "m3", 3, "Unrelated", Extraction::default());
        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let federator = federator(Some(graph), vector);

        let outcome = federator.search("acme", 10).await.unwrap();
        assert_eq!(outcome.source(), SearchSource::Graph);
        let hits = outcome.hits();
        assert_eq!(hits.len(), 3);
        // Newest first; m2 has no relationships.
        assert!(matches!(&hits[0], SearchHit::Memory { id, entity: None, .. } if id == "m2"));
        let entities: Vec<_> = hits[1..]
            .iter()
            .filter_map(|h| match h {
                SearchHit::Memory { entity, entity_type, relationship, .. } => {
                    assert_eq!(relationship.as_deref(), Some("MENTIONS"));
                    Some((entity.clone()?, entity_type.clone()?))
                }
                _ => None,
            })
            .collect();
        assert!(entities.contains(&("Jane Doe".to_string(), "Person".to_string())));
        assert!(entities.contains(&("Acme Corp".to_string(), "Company".to_string())));

        let capped = federator.search("acme", 2).await.unwrap();
        assert_eq!(capped.hits().len(), 2);
    }

    #[tokio::test]
    async fn test_no_results_outcome() {
        let graph = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let outcome = federator(Some(graph), vector)
            .search("nothing here", 5)
            .await
            .unwrap();
        assert!(outcome.is_empty());
        assert_eq!(outcome.to_string(), "No results found for 'nothing here'");
    }

    #[tokio::test]
    async fn test_owner_lookup() {
        let graph = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let smith = graph
            .merge_node(
                &NodeKey::new(NodeLabel::Owner, &[("name", "John Smith")]),
                &[],
                &props(json!({"name": "John Smith", "validated": true, "last_updated": "2024-02-01"})),
            )
            .unwrap();
        graph
            .merge_node(
                &NodeKey::new(NodeLabel::Owner, &[("name", "Mary Jones")]),
                &[],
                &props(json!({"name": "Mary Jones", "validated": false, "last_updated": "2024-03-01"})),
            )
            .unwrap();
        let contact = graph
            .merge_node(
                &NodeKey::new(NodeLabel::Contact, &[("owner", "John Smith")]),
                &[],
                &props(json!({"phone": "555-123-4567", "email": "john@smith.com"})),
            )
            .unwrap();
        graph
            .merge_edge(smith, &RelationType::has_contact(), contact, &Properties::new())
            .unwrap();
        let memory = graph
            .merge_node(
                &NodeKey::memory("m1"),
                &[],
                &props(json!({"id": "m1", "content": "Confirmed ownership by phone"})),
            )
            .unwrap();
        graph
            .merge_edge(memory, &RelationType::validates(), smith, &Properties::new())
            .unwrap();

        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let federator = federator(Some(graph), vector);

        let outcome = federator.search("validated owner smith", 10).await.unwrap();
        assert_eq!(
            outcome.hits(),
            &[SearchHit::Owner {
                owner: "John Smith".into(),
                validated: true,
                phone: Some("555-123-4567".into()),
                email: Some("john@smith.com".into()),
                memory: Some("Confirmed ownership by phone".into()),
            }]
        );

        let all = federator.search("owner", 10).await.unwrap();
        let names: Vec<_> = all
            .hits()
            .iter()
            .filter_map(|h| match h {
                SearchHit::Owner { owner, .. } => Some(owner.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["Mary Jones", "John Smith"]);
    }

    #[tokio::test]
    async fn test_batch_lookup_and_summary() {
        let graph = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let mut batches = Vec::new();
        for number in [7, 3] {
            let key = number.to_string();
            batches.push(
                graph
                    .merge_node(
                        &NodeKey::new(NodeLabel::Batch, &[("number", key.as_str())]),
                        &[],
                        &props(json!({"number": number})),
                    )
                    .unwrap(),
            );
        }
        for (i, content) in ["Parcel 12 owner called back", "Parcel 19 no answer"].iter().enumerate() {
            let id = format!("m{i}");
            let memory = graph
                .merge_node(
                    &NodeKey::memory(&id),
                    &[],
                    &props(json!({"id": id, "content": content})),
                )
                .unwrap();
            graph
                .merge_edge(batches[0], &RelationType::contains_memory(), memory, &Properties::new())
                .unwrap();
        }

        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let federator = federator(Some(graph), vector);

        let outcome = federator.search("batch 7", 10).await.unwrap();
        assert_eq!(outcome.hits().len(), 2);
        assert!(outcome.hits().iter().all(|h| matches!(
            h,
            SearchHit::BatchMemory { owner: None, validated: false, .. }
        )));

        let summary = federator.search("batch overview", 10).await.unwrap();
        assert_eq!(
            summary.hits(),
            &[
                SearchHit::BatchSummary { batch: 3, memories: 0 },
                SearchHit::BatchSummary { batch: 7, memories: 2 },
            ]
        );
    }

    /// Graph store whose every call fails, as after a lost connection.
    struct Broken;

    impl GraphStore for Broken {
        fn ping(&self) -> MemSyncResult<()> {
            Err(MemSyncError::StoreUnavailable("connection refused".into()))
        }
        fn create_range_index(&self, _: NodeLabel, _: &str) -> MemSyncResult<()> {
            Err(MemSyncError::Graph("connection reset".into()))
        }
        fn merge_node(&self, _: &NodeKey, _: &[NodeLabel], _: &Properties) -> MemSyncResult<NodeId> {
            Err(MemSyncError::Graph("connection reset".into()))
        }
        fn find_node(&self, _: &NodeKey) -> MemSyncResult<Option<GraphNode>> {
            Err(MemSyncError::Graph("connection reset".into()))
        }
        fn get_node(&self, _: NodeId) -> MemSyncResult<Option<GraphNode>> {
            Err(MemSyncError::Graph("connection reset".into()))
        }
        fn find_nodes(&self, _: &NodeQuery) -> MemSyncResult<Vec<GraphNode>> {
            Err(MemSyncError::Graph("connection reset".into()))
        }
        fn merge_edge(&self, _: NodeId, _: &RelationType, _: NodeId, _: &Properties) -> MemSyncResult<()> {
            Err(MemSyncError::Graph("connection reset".into()))
        }
        fn edges(&self, _: NodeId, _: Direction, _: Option<&RelationType>) -> MemSyncResult<Vec<GraphEdge>> {
            Err(MemSyncError::Graph("connection reset".into()))
        }
        fn detach_delete(&self, _: NodeId) -> MemSyncResult<usize> {
            Err(MemSyncError::Graph("connection reset".into()))
        }
        fn statistics(&self) -> MemSyncResult<GraphStatistics> {
            Err(MemSyncError::Graph("connection reset".into()))
        }
    }

    async fn seeded_vector() -> Arc<SqliteVectorStore> {
        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let long = format!("anything goes {}", "x".repeat(400));
        vector.insert(&long, Metadata::new()).await.unwrap();
        vector
            .insert("completely different", Metadata::new())
            .await
            .unwrap();
        vector
    }

    #[tokio::test]
    async fn test_runtime_graph_error_falls_back_to_vector() {
        let federator = federator(Some(Arc::new(Broken)), seeded_vector().await);
        let outcome = federator.search("anything", 5).await.unwrap();
        assert_eq!(outcome.source(), SearchSource::Vector);
        match &outcome.hits()[0] {
            SearchHit::Similar { content, score, .. } => {
                assert_eq!(content.chars().count(), 200);
                assert!(*score >= 0.5);
            }
            other => panic!("unexpected hit {other:?}"),
        }
        assert_eq!(outcome.hits().len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_mode() {
        let federator = federator(None, seeded_vector().await);
        assert!(federator.is_degraded());
        let outcome = federator.search("anything", 5).await.unwrap();
        assert_eq!(outcome.source(), SearchSource::Vector);
        assert!(!outcome.is_empty());

        assert!(matches!(
            federator.analyze("Jane Doe").await,
            Err(MemSyncError::StoreUnavailable(_))
        ));
        assert!(matches!(
            federator.statistics().await,
            Err(MemSyncError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_analyze_across_memories() {
        let graph = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        write(&graph, "m1", 1, "Jane Doe works at Acme Corp", jane_at_acme());
        let mut again = jane_at_acme();
        again.entities[0].context = Some("mentioned in passing".into());
        write(&graph, "m2", 2, "jane doe again", again);
        let vector = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
        let federator = federator(Some(graph), vector);

        let analysis = federator.analyze("  JANE   doe ").await.unwrap();
        assert!(analysis.found());
        assert_eq!(analysis.profiles.len(), 2);
        let contexts: Vec<_> = analysis
            .profiles
            .iter()
            .filter_map(|p| p.context.as_deref())
            .collect();
        assert_eq!(contexts, vec!["mentioned in passing"]);
        assert_eq!(analysis.emails(), vec!["jane@acme.com"]);
        assert_eq!(analysis.relationships.len(), 1);
        let rel = &analysis.relationships[0];
        assert_eq!(rel.rel_type, "WORKS_AT");
        assert!(rel.outgoing);
        assert_eq!(rel.other, "Acme Corp");
        assert_eq!(rel.other_label.as_deref(), Some("Company"));
        assert_eq!(rel.since.as_deref(), Some("2020"));

        let acme = federator.analyze("acme corp").await.unwrap();
        assert!(!acme.relationships[0].outgoing);

        let stats = federator.statistics().await.unwrap();
        assert_eq!(stats.counts_by_label.get("Memory"), Some(&2));
        assert!(!federator.analyze("Nobody").await.unwrap().found());
    }
}
