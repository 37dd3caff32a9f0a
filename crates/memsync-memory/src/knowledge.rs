//! Property graph backed by SQLite.
//!
//! Nodes are upserted by natural key and carry a label set and a JSON
//! property map; edges are unique per (source, type, target). Property
//! merges use SQLite's `json_patch`, so a merge never removes a property.

use chrono::Utc;
use memsync_types::error::{MemSyncError, MemSyncResult};
use memsync_types::graph::{
    Direction, GraphEdge, GraphNode, GraphStatistics, GraphStore, NodeId, NodeKey, NodeLabel,
    NodeQuery, Properties, PropertyFilter, RelationType,
};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Graph store backed by SQLite.
#[derive(Clone)]
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGraphStore {
    /// Create a new graph store wrapping a migrated connection.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Open (or create) a database file and run migrations.
    pub fn open(path: &Path) -> MemSyncResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| MemSyncError::StoreUnavailable(e.to_string()))?;
        crate::migration::run_migrations(&conn)
            .map_err(|e| MemSyncError::StoreUnavailable(e.to_string()))?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> MemSyncResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MemSyncError::StoreUnavailable(e.to_string()))?;
        crate::migration::run_migrations(&conn)
            .map_err(|e| MemSyncError::StoreUnavailable(e.to_string()))?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    fn lock(&self) -> MemSyncResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MemSyncError::Internal(e.to_string()))
    }
}

/// Property names are interpolated into JSON paths, so they must be plain identifiers.
fn check_identifier(name: &str) -> MemSyncResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(MemSyncError::InvalidInput(format!(
            "invalid property name: {name:?}"
        )))
    }
}

fn graph_err(e: rusqlite::Error) -> MemSyncError {
    MemSyncError::Graph(e.to_string())
}

fn json_scalar(value: &serde_json::Value) -> MemSyncResult<rusqlite::types::Value> {
    use rusqlite::types::Value;
    match value {
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        serde_json::Value::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => Ok(Value::Real(n.as_f64().unwrap_or_default())),
        },
        other => Err(MemSyncError::InvalidInput(format!(
            "cannot compare against non-scalar {other}"
        ))),
    }
}

fn load_node(conn: &Connection, id: i64) -> MemSyncResult<Option<GraphNode>> {
    let row = conn
        .query_row(
            "SELECT node_key, properties FROM graph_nodes WHERE id = ?1",
            rusqlite::params![id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(graph_err)?;
    let Some((key, props)) = row else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT label FROM graph_node_labels WHERE node_id = ?1")
        .map_err(graph_err)?;
    let mut labels: Vec<NodeLabel> = stmt
        .query_map(rusqlite::params![id], |row| row.get::<_, String>(0))
        .map_err(graph_err)?
        .filter_map(|r| r.ok())
        .filter_map(|l| NodeLabel::parse(&l))
        .collect();
    labels.sort();

    let properties: Properties = serde_json::from_str(&props).unwrap_or_default();
    Ok(Some(GraphNode {
        id: NodeId(id),
        key,
        labels,
        properties,
    }))
}

impl GraphStore for SqliteGraphStore {
    fn ping(&self) -> MemSyncResult<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| MemSyncError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Labels live in their own table, so one expression index per property
    /// serves every label; `label` only names the request in logs.
    fn create_range_index(&self, label: NodeLabel, property: &str) -> MemSyncResult<()> {
        check_identifier(property)?;
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_graph_prop_{property}
             ON graph_nodes(json_extract(properties, '$.{property}'))"
        ))
        .map_err(graph_err)?;
        debug!(label = %label, property, "Range index ensured");
        Ok(())
    }

    fn merge_node(
        &self,
        key: &NodeKey,
        labels: &[NodeLabel],
        properties: &Properties,
    ) -> MemSyncResult<NodeId> {
        let props_str = serde_json::to_string(properties)
            .map_err(|e| MemSyncError::Serialization(e.to_string()))?;
        let encoded = key.encode();
        let now = Utc::now().to_rfc3339();

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(graph_err)?;
        tx.execute(
            "INSERT INTO graph_nodes (node_key, properties, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(node_key) DO UPDATE SET
                properties = json_patch(graph_nodes.properties, excluded.properties),
                updated_at = excluded.updated_at",
            rusqlite::params![encoded, props_str, now],
        )
        .map_err(graph_err)?;
        let id: i64 = tx
            .query_row(
                "SELECT id FROM graph_nodes WHERE node_key = ?1",
                rusqlite::params![encoded],
                |row| row.get(0),
            )
            .map_err(graph_err)?;
        for label in std::iter::once(&key.label).chain(labels.iter()) {
            tx.execute(
                "INSERT OR IGNORE INTO graph_node_labels (node_id, label) VALUES (?1, ?2)",
                rusqlite::params![id, label.as_str()],
            )
            .map_err(graph_err)?;
        }
        tx.commit().map_err(graph_err)?;
        Ok(NodeId(id))
    }

    fn find_node(&self, key: &NodeKey) -> MemSyncResult<Option<GraphNode>> {
        let conn = self.lock()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM graph_nodes WHERE node_key = ?1",
                rusqlite::params![key.encode()],
                |row| row.get(0),
            )
            .optional()
            .map_err(graph_err)?;
        match id {
            Some(id) => load_node(&conn, id),
            None => Ok(None),
        }
    }

    fn get_node(&self, id: NodeId) -> MemSyncResult<Option<GraphNode>> {
        let conn = self.lock()?;
        load_node(&conn, id.0)
    }

    fn find_nodes(&self, query: &NodeQuery) -> MemSyncResult<Vec<GraphNode>> {
        let mut sql = String::from(
            "SELECT n.id FROM graph_nodes n
             JOIN graph_node_labels l ON l.node_id = n.id
             WHERE l.label = ?1",
        );
        let mut params: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Text(query.label.as_str().to_string())];

        match query.filter {
            Some(PropertyFilter::Equals(ref prop, ref value)) => {
                check_identifier(prop)?;
                params.push(json_scalar(value)?);
                sql.push_str(&format!(
                    " AND json_extract(n.properties, '$.{prop}') = ?{}",
                    params.len()
                ));
            }
            Some(PropertyFilter::Contains(ref prop, ref needle)) => {
                check_identifier(prop)?;
                let needle = needle.trim().to_ascii_lowercase();
                if !needle.is_empty() {
                    params.push(rusqlite::types::Value::Text(needle));
                    sql.push_str(&format!(
                        " AND instr(lower(COALESCE(json_extract(n.properties, '$.{prop}'), '')), ?{}) > 0",
                        params.len()
                    ));
                }
            }
            None => {}
        }

        match query.order_desc {
            Some(ref prop) => {
                check_identifier(prop)?;
                sql.push_str(&format!(
                    " ORDER BY json_extract(n.properties, '$.{prop}') DESC, n.id DESC"
                ));
            }
            None => sql.push_str(" ORDER BY n.id"),
        }
        sql.push_str(&format!(" LIMIT {}", query.limit));

        let conn = self.lock()?;
        let ids: Vec<i64> = {
            let mut stmt = conn.prepare(&sql).map_err(graph_err)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| row.get(0))
                .map_err(graph_err)?;
            rows.collect::<Result<_, _>>().map_err(graph_err)?
        };

        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = load_node(&conn, id)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    fn merge_edge(
        &self,
        source: NodeId,
        rel: &RelationType,
        target: NodeId,
        properties: &Properties,
    ) -> MemSyncResult<()> {
        let props_str = serde_json::to_string(properties)
            .map_err(|e| MemSyncError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO graph_edges (source_id, rel_type, target_id, properties, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source_id, rel_type, target_id) DO UPDATE SET
                properties = json_patch(graph_edges.properties, excluded.properties)",
            rusqlite::params![source.0, rel.as_str(), target.0, props_str, now],
        )
        .map_err(graph_err)?;
        Ok(())
    }

    fn edges(
        &self,
        node: NodeId,
        direction: Direction,
        rel: Option<&RelationType>,
    ) -> MemSyncResult<Vec<GraphEdge>> {
        let anchor = match direction {
            Direction::Outgoing => "source_id",
            Direction::Incoming => "target_id",
        };
        let mut sql = format!(
            "SELECT source_id, rel_type, target_id, properties FROM graph_edges WHERE {anchor} = ?1"
        );
        let mut params: Vec<rusqlite::types::Value> = vec![rusqlite::types::Value::Integer(node.0)];
        if let Some(rel) = rel {
            sql.push_str(" AND rel_type = ?2");
            params.push(rusqlite::types::Value::Text(rel.as_str().to_string()));
        }
        sql.push_str(" ORDER BY id");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(graph_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(graph_err)?;

        let mut edges = Vec::new();
        for row in rows {
            let (source, rel_type, target, props) = row.map_err(graph_err)?;
            edges.push(GraphEdge {
                source: NodeId(source),
                rel_type: RelationType::parse(&rel_type),
                target: NodeId(target),
                properties: serde_json::from_str(&props).unwrap_or_default(),
            });
        }
        Ok(edges)
    }

    fn detach_delete(&self, node: NodeId) -> MemSyncResult<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(graph_err)?;
        let removed = tx
            .execute(
                "DELETE FROM graph_edges WHERE source_id = ?1 OR target_id = ?1",
                rusqlite::params![node.0],
            )
            .map_err(graph_err)?;
        tx.execute(
            "DELETE FROM graph_node_labels WHERE node_id = ?1",
            rusqlite::params![node.0],
        )
        .map_err(graph_err)?;
        tx.execute(
            "DELETE FROM graph_nodes WHERE id = ?1",
            rusqlite::params![node.0],
        )
        .map_err(graph_err)?;
        tx.commit().map_err(graph_err)?;
        Ok(removed)
    }

    fn statistics(&self) -> MemSyncResult<GraphStatistics> {
        let conn = self.lock()?;
        let node_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM graph_nodes", [], |row| row.get(0))
            .map_err(graph_err)?;
        let edge_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM graph_edges", [], |row| row.get(0))
            .map_err(graph_err)?;

        let mut stmt = conn
            .prepare("SELECT label, COUNT(*) FROM graph_node_labels GROUP BY label ORDER BY label")
            .map_err(graph_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(graph_err)?;
        let mut stats = GraphStatistics {
            node_count: node_count as u64,
            edge_count: edge_count as u64,
            ..Default::default()
        };
        for row in rows {
            let (label, count) = row.map_err(graph_err)?;
            stats.counts_by_label.insert(label, count as u64);
        }
        Ok(stats)
    }
}
