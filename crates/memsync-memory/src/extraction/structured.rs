//! Generator-backed entity and relationship extraction.

use super::normalize::parse_generation_output;
use memsync_types::error::MemSyncResult;
use memsync_types::extraction::{Confidence, ContactInfo, Entity, EntityKind, Relationship};
use memsync_types::generation::TextGenerator;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// System prompt sent with every extraction request.
pub const EXTRACTION_PROMPT: &str = r#"You extract entities and relationships from a single piece of text.
Use only what the text states. Do not add outside knowledge.

Entity types: person, company, product, technology, location, organization, other.
For every entity record any contact details written next to it: phone (with area code),
phone_type (mobile, landline or unknown), email (exactly as written), website (bare domain),
social ("platform: handle"), address. Leave a field out when the text does not give it.
Confidence is "high" when a detail is stated with a clear owner, "medium" when the owner is
inferred, "low" when it is unclear. Use notes for caveats such as "old number" and context
for how the entity appears in the text.

Relationship types are UPPER_SNAKE_CASE, for example CEO_OF, FOUNDER_OF, WORKS_AT, WORKED_AT,
OWNS, ACQUIRED, INVESTED_IN, SUBSIDIARY_OF, BASED_IN, LOCATED_AT, PARTNER_OF, RENAMED_TO.
"from" and "to" must be names of entities you listed. Add since/until/current when the text
gives a timeframe.

Reply with one JSON object and nothing else:
{"entities":[{"name":"","type":"","phone":"","phone_type":"","email":"","website":"","social":"","address":"","confidence":"","notes":"","context":""}],
 "relationships":[{"from":"","to":"","type":"","since":"","until":"","current":true}]}"#;

/// Extraction pass that asks a text generator for structured output.
#[derive(Clone)]
pub struct StructuredExtractor {
    generator: Arc<dyn TextGenerator>,
}

impl StructuredExtractor {
    /// Wrap a text generator.
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Ask the generator about `content` and parse its answer.
    ///
    /// Errors are generation failures and unparseable output; callers treat
    /// both as an empty result.
    pub async fn extract(&self, content: &str) -> MemSyncResult<(Vec<Entity>, Vec<Relationship>)> {
        let message = format!("Extract entities and relationships from this text:\n\n{content}");
        let raw = self.generator.generate(EXTRACTION_PROMPT, &message).await?;
        debug!(chars = raw.len(), "Generator replied");
        let value = parse_generation_output(&raw)?;
        Ok(parse_extraction(&value))
    }
}

/// Read entities and relationships out of either the flat schema or the
/// document schema (nested `contact`, relationship `attributes`).
pub fn parse_extraction(value: &Value) -> (Vec<Entity>, Vec<Relationship>) {
    let entities: Vec<Entity> = value
        .get("entities")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).map(parse_entity).collect())
        .unwrap_or_default();
    let relationships: Vec<Relationship> = value
        .get("relationships")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(parse_relationship)
                .collect()
        })
        .unwrap_or_default();
    (entities, relationships)
}

/// Non-blank trimmed string.
fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `platform: handle` from a string or a `{platform, url|handle}` object.
fn social(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(obj) => {
            let platform = text(obj, "platform")?;
            let handle = text(obj, "url").or_else(|| text(obj, "handle"))?;
            Some(format!("{platform}: {handle}"))
        }
        _ => None,
    }
}

/// First `value` of a document-schema contact list.
fn first_value(contact: &Map<String, Value>, list: &str) -> Option<String> {
    contact
        .get(list)?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find_map(|item| text(item, "value"))
}

fn parse_entity(obj: &Map<String, Value>) -> Entity {
    let mut contact = ContactInfo {
        phone: text(obj, "phone"),
        phone_type: text(obj, "phone_type"),
        email: text(obj, "email"),
        website: text(obj, "website"),
        social: social(obj.get("social")),
        address: text(obj, "address"),
    };

    if let Some(nested) = obj.get("contact").and_then(Value::as_object) {
        contact.email = contact.email.or_else(|| first_value(nested, "emails"));
        contact.phone = contact.phone.or_else(|| first_value(nested, "phones"));
        contact.website = contact
            .website
            .or_else(|| first_value(nested, "domains"))
            .or_else(|| first_value(nested, "urls"));
        contact.social = contact.social.or_else(|| {
            nested
                .get("socials")
                .and_then(Value::as_array)
                .and_then(|items| items.iter().find_map(|item| social(Some(item))))
        });
    }

    Entity {
        id: text(obj, "id"),
        name: text(obj, "name").unwrap_or_default(),
        kind: EntityKind::parse(&text(obj, "type").unwrap_or_default()),
        contact,
        confidence: obj
            .get("confidence")
            .map(Confidence::parse)
            .unwrap_or_default(),
        notes: text(obj, "notes"),
        context: text(obj, "context"),
    }
}

fn parse_relationship(obj: &Map<String, Value>) -> Relationship {
    let attributes = obj.get("attributes").and_then(Value::as_object);
    let attr = |key: &str| text(obj, key).or_else(|| attributes.and_then(|a| text(a, key)));

    let current = match obj.get("current") {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    };

    Relationship {
        from: text(obj, "from").unwrap_or_default(),
        to: text(obj, "to").unwrap_or_default(),
        rel_type: text(obj, "type").unwrap_or_else(|| "RELATED_TO".to_string()),
        since: attr("since"),
        until: attr("until"),
        current,
        evidence: text(obj, "evidence"),
    }
}
