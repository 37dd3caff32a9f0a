//! Federated search results and entity analysis summaries.

use crate::extraction::ContactInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a query is asking for, decided by fixed patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum SearchIntent {
    /// Owner / validation lookup; `term` is the query minus the keywords.
    OwnerLookup { term: String },
    /// Batch lookup; `None` lists every batch.
    BatchLookup { number: Option<i64> },
    /// Generic content search.
    FullText { term: String },
}

/// Which backend produced the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// Graph store.
    Graph,
    /// Vector similarity fallback.
    Vector,
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchSource::Graph => f.write_str("graph"),
            SearchSource::Vector => f.write_str("vector"),
        }
    }
}

/// One normalized result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchHit {
    /// Owner with validation state and contact.
    Owner {
        owner: String,
        validated: bool,
        phone: Option<String>,
        email: Option<String>,
        memory: Option<String>,
    },
    /// Memory belonging to a numbered batch.
    BatchMemory {
        memory: Option<String>,
        owner: Option<String>,
        validated: bool,
        phone: Option<String>,
        email: Option<String>,
    },
    /// Per-batch memory count.
    BatchSummary { batch: i64, memories: u64 },
    /// Memory with one of its outgoing relationships.
    Memory {
        id: String,
        content: Option<String>,
        area: Option<String>,
        relationship: Option<String>,
        entity_type: Option<String>,
        entity: Option<String>,
    },
    /// Vector similarity match.
    Similar {
        id: String,
        content: String,
        score: f32,
    },
}

/// Result of a federated search. An empty result is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// At least one row.
    Results {
        source: SearchSource,
        hits: Vec<SearchHit>,
    },
    /// Nothing matched.
    NoResults { query: String, source: SearchSource },
}

impl SearchOutcome {
    /// Build from hits, choosing the variant by emptiness.
    pub fn from_hits(query: &str, source: SearchSource, hits: Vec<SearchHit>) -> Self {
        if hits.is_empty() {
            Self::NoResults {
                query: query.to_string(),
                source,
            }
        } else {
            Self::Results { source, hits }
        }
    }

    /// Rows, empty for `NoResults`.
    pub fn hits(&self) -> &[SearchHit] {
        match self {
            Self::Results { hits, .. } => hits,
            Self::NoResults { .. } => &[],
        }
    }

    /// Backend that answered.
    pub fn source(&self) -> SearchSource {
        match self {
            Self::Results { source, .. } | Self::NoResults { source, .. } => *source,
        }
    }

    /// True for `NoResults`.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::NoResults { .. })
    }
}

fn mark(validated: bool) -> &'static str {
    if validated {
        "validated"
    } else {
        "not validated"
    }
}

impl fmt::Display for SearchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (source, hits) = match self {
            Self::NoResults { query, .. } => {
                return write!(f, "No results found for '{query}'");
            }
            Self::Results { source, hits } => (source, hits),
        };
        writeln!(f, "Found {} result(s) ({source} search)", hits.len())?;
        for (i, hit) in hits.iter().enumerate() {
            let n = i + 1;
            writeln!(f)?;
            match hit {
                SearchHit::Owner {
                    owner,
                    validated,
                    phone,
                    email,
                    memory,
                } => {
                    writeln!(f, "{n}. Owner: {owner} - {}", mark(*validated))?;
                    if phone.is_some() || email.is_some() {
                        writeln!(
                            f,
                            "   Contact: {} | {}",
                            phone.as_deref().unwrap_or("No phone"),
                            email.as_deref().unwrap_or("No email")
                        )?;
                    }
                    if let Some(memory) = memory {
                        writeln!(f, "   Memory: {memory}")?;
                    }
                }
                SearchHit::BatchMemory {
                    memory,
                    owner,
                    validated,
                    ..
                } => {
                    writeln!(f, "{n}. Batch memory:")?;
                    if let Some(owner) = owner {
                        writeln!(f, "   Owner: {owner} ({})", mark(*validated))?;
                    }
                    if let Some(memory) = memory {
                        writeln!(f, "   Content: {memory}")?;
                    }
                }
                SearchHit::BatchSummary { batch, memories } => {
                    writeln!(f, "{n}. Batch {batch}: {memories} memories")?;
                }
                SearchHit::Memory {
                    id,
                    content,
                    relationship,
                    entity_type,
                    entity,
                    ..
                } => {
                    writeln!(f, "{n}. Memory {id}:")?;
                    if let Some(content) = content {
                        writeln!(f, "   {content}")?;
                    }
                    if let Some(entity) = entity {
                        writeln!(
                            f,
                            "   -> {} {}: {entity}",
                            relationship.as_deref().unwrap_or("RELATED_TO"),
                            entity_type.as_deref().unwrap_or("Entity")
                        )?;
                    }
                }
                SearchHit::Similar { content, score, .. } => {
                    writeln!(f, "{n}. ({score:.2}) {content}")?;
                }
            }
        }
        Ok(())
    }
}

/// One relationship of an analyzed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSummary {
    /// Relationship type.
    pub rel_type: String,
    /// True when the analyzed entity is the source.
    pub outgoing: bool,
    /// Name of the entity on the other end.
    pub other: String,
    /// Most specific label of the other entity.
    pub other_label: Option<String>,
    /// Start, free-form.
    pub since: Option<String>,
    /// End, free-form.
    pub until: Option<String>,
    /// Whether the relationship still holds.
    pub current: Option<bool>,
}

/// One graph occurrence of an entity (entities are scoped per memory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProfile {
    /// Memory this occurrence belongs to.
    pub memory_id: Option<String>,
    /// Most specific label.
    pub label: Option<String>,
    /// Contact attributes stored on the node.
    pub contact: ContactInfo,
    /// Stored confidence.
    pub confidence: Option<String>,
    /// Stored notes.
    pub notes: Option<String>,
    /// How the entity appears in its memory.
    pub context: Option<String>,
}

/// Contact and relationship summary for an entity name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAnalysis {
    /// The queried name.
    pub name: String,
    /// One profile per memory-scoped occurrence.
    pub profiles: Vec<EntityProfile>,
    /// Relationships across every occurrence.
    pub relationships: Vec<RelationshipSummary>,
}

impl EntityAnalysis {
    /// Whether any occurrence was found.
    pub fn found(&self) -> bool {
        !self.profiles.is_empty()
    }

    /// Distinct emails across occurrences.
    pub fn emails(&self) -> Vec<&str> {
        distinct(self.profiles.iter().filter_map(|p| p.contact.email.as_deref()))
    }

    /// Distinct phones across occurrences.
    pub fn phones(&self) -> Vec<&str> {
        distinct(self.profiles.iter().filter_map(|p| p.contact.phone.as_deref()))
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

impl fmt::Display for EntityAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.found() {
            return write!(f, "No entity named '{}'", self.name);
        }
        writeln!(
            f,
            "{} ({} occurrence(s))",
            self.name,
            self.profiles.len()
        )?;
        for email in self.emails() {
            writeln!(f, "  email: {email}")?;
        }
        for phone in self.phones() {
            writeln!(f, "  phone: {phone}")?;
        }
        for rel in &self.relationships {
            let arrow = if rel.outgoing { "->" } else { "<-" };
            write!(f, "  {arrow} {} {}", rel.rel_type, rel.other)?;
            if let Some(ref since) = rel.since {
                write!(f, " (since {since})")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
