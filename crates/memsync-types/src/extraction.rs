//! Extraction output: entities, relationships and regex-found contact tokens.

use crate::graph::NodeLabel;
use serde::{Deserialize, Serialize};

/// Canonical form used for every natural-key comparison: trimmed,
/// internal whitespace collapsed, lowercased.
pub fn canonicalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Batch-local identifier derived from a name (`"Acme Corp"` -> `"acme_corp"`).
pub fn slugify(name: &str) -> String {
    canonicalize(name).replace(' ', "_")
}

/// Kind of a real-world entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A person.
    Person,
    /// A business.
    Company,
    /// A product or service.
    Product,
    /// A framework, language or tool.
    Technology,
    /// A city, country or place.
    Location,
    /// A non-profit or government body.
    Organization,
    /// Anything else.
    Other,
}

impl EntityKind {
    /// Parse a free-form type string. Unknown spellings become `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "person" | "people" | "individual" => Self::Person,
            "company" | "business" | "corporation" => Self::Company,
            "product" | "service" => Self::Product,
            "technology" | "tech" | "framework" | "language" => Self::Technology,
            "location" | "place" | "city" | "country" => Self::Location,
            "organization" | "organisation" | "org" => Self::Organization,
            _ => Self::Other,
        }
    }

    /// The graph label for this kind.
    pub fn label(self) -> NodeLabel {
        match self {
            Self::Person => NodeLabel::Person,
            Self::Company => NodeLabel::Company,
            Self::Product => NodeLabel::Product,
            Self::Technology => NodeLabel::Technology,
            Self::Location => NodeLabel::Location,
            Self::Organization | Self::Other => NodeLabel::Entity,
        }
    }

    /// Lowercase name, as stored in the `type` property.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Company => "company",
            Self::Product => "product",
            Self::Technology => "technology",
            Self::Location => "location",
            Self::Organization => "organization",
            Self::Other => "other",
        }
    }
}

/// How certain the extractor is about an entity and its contact details.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Directly stated with a clear association.
    High,
    /// Present but association inferred.
    #[default]
    Medium,
    /// Uncertain or conflicting.
    Low,
}

impl Confidence {
    /// Parse a label ("high") or a numeric score (0.0 - 1.0).
    pub fn parse(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
                "high" => Self::High,
                "low" => Self::Low,
                _ => Self::Medium,
            },
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(score) if score >= 0.8 => Self::High,
                Some(score) if score < 0.5 => Self::Low,
                _ => Self::Medium,
            },
            _ => Self::Medium,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Contact attributes of an entity. Absent values are `None`, never empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Phone number as written.
    pub phone: Option<String>,
    /// mobile / landline / unknown.
    pub phone_type: Option<String>,
    /// Email address as written.
    pub email: Option<String>,
    /// Website or domain.
    pub website: Option<String>,
    /// `platform: handle` form.
    pub social: Option<String>,
    /// Physical address.
    pub address: Option<String>,
}

impl ContactInfo {
    /// True when no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.email.is_none()
            && self.website.is_none()
            && self.social.is_none()
            && self.address.is_none()
    }
}

/// An entity found in memory content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Batch-local identifier, when the extractor supplied one.
    pub id: Option<String>,
    /// Display name, as written.
    pub name: String,
    /// Kind of entity.
    pub kind: EntityKind,
    /// Contact attributes.
    pub contact: ContactInfo,
    /// Extraction confidence.
    pub confidence: Confidence,
    /// Free-text caveats ("possibly outdated").
    pub notes: Option<String>,
    /// How the entity appears in the memory ("met at the Berlin offsite").
    pub context: Option<String>,
}

impl Entity {
    /// Create an entity with no contact details.
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind,
            contact: ContactInfo::default(),
            confidence: Confidence::default(),
            notes: None,
            context: None,
        }
    }

    /// The identifier relationships in the same batch use to refer to this entity.
    pub fn batch_id(&self) -> String {
        match self.id {
            Some(ref id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => slugify(&self.name),
        }
    }
}

/// A typed, directed edge between two entities of the same extraction batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Batch-local id (or name) of the source entity.
    pub from: String,
    /// Batch-local id (or name) of the target entity.
    pub to: String,
    /// Relationship type as extracted ("works at", "CEO_OF").
    pub rel_type: String,
    /// Start of the relationship, free-form.
    pub since: Option<String>,
    /// End of the relationship, free-form.
    pub until: Option<String>,
    /// Whether the relationship still holds.
    pub current: Option<bool>,
    /// Supporting snippet from the text.
    pub evidence: Option<String>,
}

impl Relationship {
    /// Create a relationship without temporal attributes.
    pub fn new(from: impl Into<String>, rel_type: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            rel_type: rel_type.into(),
            since: None,
            until: None,
            current: None,
            evidence: None,
        }
    }
}

/// What a regex-found token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// http(s) URL.
    Url,
    /// Absolute date.
    Date,
}

/// A contact or date token found by the deterministic pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactToken {
    /// What was found.
    pub kind: TokenKind,
    /// Exactly as written.
    pub value: String,
    /// Canonical form (digits-only for phones).
    pub normalized: Option<String>,
    /// Fixed per-kind confidence.
    pub confidence: f32,
    /// Byte offset of the match in the source text.
    pub offset: usize,
    /// Name of the entity this token was attached to, if any.
    pub attached_to: Option<String>,
}

/// Combined result of both extraction passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Validated entities.
    pub entities: Vec<Entity>,
    /// Validated relationships.
    pub relationships: Vec<Relationship>,
    /// Tokens from the regex pass.
    pub contacts: Vec<ContactToken>,
}

impl Extraction {
    /// True when nothing at all was extracted.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty() && self.contacts.is_empty()
    }

    /// Tokens of one kind, in text order.
    pub fn tokens(&self, kind: TokenKind) -> impl Iterator<Item = &ContactToken> {
        self.contacts.iter().filter(move |t| t.kind == kind)
    }

    /// Tokens no entity claimed.
    pub fn unattached(&self) -> impl Iterator<Item = &ContactToken> {
        self.contacts.iter().filter(|t| t.attached_to.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("  Jane   Doe "), "jane doe");
        assert_eq!(slugify("Acme  Corp"), "acme_corp");
    }

    #[test]
    fn test_entity_kind_labels() {
        assert_eq!(EntityKind::parse("Person"), EntityKind::Person);
        assert_eq!(EntityKind::parse("property"), EntityKind::Other);
        assert_eq!(EntityKind::Organization.label(), NodeLabel::Entity);
        assert_eq!(EntityKind::Company.label(), NodeLabel::Company);
    }

    #[test]
    fn test_confidence_parse() {
        assert_eq!(Confidence::parse(&serde_json::json!("HIGH")), Confidence::High);
        assert_eq!(Confidence::parse(&serde_json::json!(0.3)), Confidence::Low);
        assert_eq!(Confidence::parse(&serde_json::Value::Null), Confidence::Medium);
    }

    #[test]
    fn test_batch_id() {
        let mut entity = Entity::new("Acme Corp", EntityKind::Company);
        assert_eq!(entity.batch_id(), "acme_corp");
        entity.id = Some("e1".into());
        assert_eq!(entity.batch_id(), "e1");
    }
}
