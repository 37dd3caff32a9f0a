//! Extraction pipeline: regex pass plus structured-generation pass.
//!
//! Both passes always run and their results are unioned. The regex pass
//! cannot fail; structured-pass failures degrade to an empty contribution.
//! Contact tokens are attached to a generated entity only when proximity
//! makes the owner unambiguous.

pub mod normalize;
pub mod patterns;
pub mod structured;

use memsync_types::config::ExtractionConfig;
use memsync_types::extraction::{
    canonicalize, ContactToken, Entity, Extraction, Relationship, TokenKind,
};
use memsync_types::generation::TextGenerator;
use std::sync::Arc;
use structured::StructuredExtractor;
use tracing::{debug, warn};

/// Turns raw memory text into validated entities, relationships and contact tokens.
#[derive(Clone)]
pub struct ExtractionPipeline {
    structured: Option<StructuredExtractor>,
    proximity_window: usize,
}

impl ExtractionPipeline {
    /// Build a pipeline. Without a generator only the regex pass runs.
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, config: &ExtractionConfig) -> Self {
        let structured = if config.structured {
            generator.map(StructuredExtractor::new)
        } else {
            None
        };
        Self {
            structured,
            proximity_window: config.proximity_window,
        }
    }

    /// Regex pass only.
    pub fn regex_only() -> Self {
        Self::new(None, &ExtractionConfig::default())
    }

    /// Whether the structured-generation pass is configured.
    pub fn has_structured_pass(&self) -> bool {
        self.structured.is_some()
    }

    /// Run both passes over `content`. Never fails.
    pub async fn extract(&self, content: &str) -> Extraction {
        let contacts = patterns::scan(content);

        let (entities, relationships) = match self.structured {
            Some(ref extractor) => match extractor.extract(content).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "Structured extraction failed, continuing with regex results");
                    (Vec::new(), Vec::new())
                }
            },
            None => (Vec::new(), Vec::new()),
        };

        let mut extraction = Extraction {
            entities: validate_entities(entities),
            relationships: validate_relationships(relationships),
            contacts,
        };
        attach_contacts(content, &mut extraction, self.proximity_window);

        debug!(
            entities = extraction.entities.len(),
            relationships = extraction.relationships.len(),
            contacts = extraction.contacts.len(),
            "Extraction finished"
        );
        extraction
    }
}

/// Drop entities without a usable name.
fn validate_entities(entities: Vec<Entity>) -> Vec<Entity> {
    entities
        .into_iter()
        .filter(|e| {
            let name = e.name.trim();
            let keep = !name.is_empty() && !name.eq_ignore_ascii_case("none");
            if !keep {
                debug!(entity = ?e.name, "Dropping entity without a name");
            }
            keep
        })
        .collect()
}

/// Drop relationships missing either endpoint.
fn validate_relationships(relationships: Vec<Relationship>) -> Vec<Relationship> {
    relationships
        .into_iter()
        .filter(|r| {
            let keep = !r.from.trim().is_empty() && !r.to.trim().is_empty();
            if !keep {
                debug!(from = %r.from, to = %r.to, "Dropping relationship without both endpoints");
            }
            keep
        })
        .collect()
}

/// Byte spans where `name` occurs in `content`, ignoring ASCII case.
fn mentions(content: &str, name: &str) -> Vec<(usize, usize)> {
    let haystack = content.to_ascii_lowercase();
    let needle = name.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    haystack
        .match_indices(&needle)
        .map(|(start, m)| (start, start + m.len()))
        .collect()
}

fn distance(token: &ContactToken, span: (usize, usize)) -> usize {
    let token_end = token.offset + token.value.len();
    if token.offset >= span.1 {
        token.offset - span.1
    } else if token_end <= span.0 {
        span.0 - token_end
    } else {
        0
    }
}

/// Whether the entity already carries this token's value.
fn claims(entity: &Entity, token: &ContactToken) -> bool {
    match token.kind {
        TokenKind::Email => entity
            .contact
            .email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(&token.value)),
        TokenKind::Phone => entity
            .contact
            .phone
            .as_deref()
            .and_then(patterns::normalize_phone)
            .is_some_and(|p| Some(p) == token.normalized),
        TokenKind::Url => entity.contact.website.as_deref().is_some_and(|w| {
            token
                .value
                .to_ascii_lowercase()
                .contains(&w.to_ascii_lowercase())
        }),
        TokenKind::Date => false,
    }
}

/// The entity field a token would fill, if it is still empty.
fn slot<'a>(entity: &'a mut Entity, kind: TokenKind) -> Option<&'a mut Option<String>> {
    let field = match kind {
        TokenKind::Email => &mut entity.contact.email,
        TokenKind::Phone => &mut entity.contact.phone,
        TokenKind::Url => &mut entity.contact.website,
        TokenKind::Date => return None,
    };
    field.is_none().then_some(field)
}

/// Mark tokens an entity already owns, then fill empty contact fields from
/// tokens that have exactly one entity mention within `window` bytes.
fn attach_contacts(content: &str, extraction: &mut Extraction, window: usize) {
    let spans: Vec<Vec<(usize, usize)>> = extraction
        .entities
        .iter()
        .map(|e| mentions(content, &e.name))
        .collect();

    for token in extraction.contacts.iter_mut() {
        if let Some(owner) = extraction.entities.iter().find(|e| claims(e, token)) {
            token.attached_to = Some(owner.name.clone());
            continue;
        }
        if token.kind == TokenKind::Date {
            continue;
        }

        let near: Vec<usize> = spans
            .iter()
            .enumerate()
            .filter(|(_, s)| s.iter().any(|span| distance(token, *span) <= window))
            .map(|(i, _)| i)
            .collect();
        // Several entities sharing one canonical name count as one owner.
        let owners: Vec<String> = {
            let mut names: Vec<String> = near
                .iter()
                .map(|&i| canonicalize(&extraction.entities[i].name))
                .collect();
            names.sort();
            names.dedup();
            names
        };
        if owners.len() != 1 {
            continue;
        }

        let entity = &mut extraction.entities[near[0]];
        let value = token.value.clone();
        if let Some(field) = slot(entity, token.kind) {
            *field = Some(value);
            token.attached_to = Some(entity.name.clone());
            debug!(entity = %entity.name, kind = ?token.kind, "Attached contact by proximity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memsync_types::error::{MemSyncError, MemSyncResult};
    use memsync_types::extraction::EntityKind;

    struct Scripted(String);

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, _system: &str, _message: &str) -> MemSyncResult<String> {
            Ok(self.0.clone())
        }
    }

    struct Offline;

    #[async_trait]
    impl TextGenerator for Offline {
        async fn generate(&self, _system: &str, _message: &str) -> MemSyncResult<String> {
            Err(MemSyncError::Generation("connection refused".into()))
        }
    }

    fn pipeline(reply: &str) -> ExtractionPipeline {
        ExtractionPipeline::new(
            Some(Arc::new(Scripted(reply.to_string()))),
            &ExtractionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_regex_pass_without_generator() {
        let result = ExtractionPipeline::regex_only()
            .extract("contact a@b.com or c@d.org")
            .await;
        assert!(result.entities.is_empty());
        assert_eq!(result.tokens(TokenKind::Email).count(), 2);
        assert_eq!(result.unattached().count(), 2);
    }

    #[tokio::test]
    async fn test_generator_failure_keeps_regex_results() {
        let pipeline = ExtractionPipeline::new(
            Some(Arc::new(Offline)),
            &ExtractionConfig::default(),
        );
        let result = pipeline.extract("call 555-123-4567").await;
        assert!(result.entities.is_empty());
        assert_eq!(result.tokens(TokenKind::Phone).count(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_empty() {
        let result = pipeline("I'm sorry, I can't help with that.")
            .extract("Jane Doe works at Acme")
            .await;
        assert!(result.entities.is_empty());
        assert!(result.relationships.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_repaired() {
        let reply = "```json\n{'entities': [{'name': 'Jane Doe', 'type': 'person'}], \
                     'relationships': [{'from': 'Jane Doe', 'to': 'Acme', 'type': 'WORKS_AT', \
                     'current': True, 'until': None}]}\n```";
        let result = pipeline(reply).extract("Jane Doe works at Acme").await;
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].kind, EntityKind::Person);
        assert_eq!(result.relationships[0].current, Some(true));
    }

    #[tokio::test]
    async fn test_validation_drops_incomplete_records() {
        let reply = r#"{"entities": [{"name": ""}, {"name": "None"}, {"name": "Acme", "type": "company"}],
                        "relationships": [{"from": "acme", "type": "OWNS"}, {"to": "acme"}, {"from": "acme", "to": "acme"}]}"#;
        let result = pipeline(reply).extract("Acme").await;
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.relationships.len(), 1);
    }

    #[tokio::test]
    async fn test_contact_attached_by_proximity() {
        let reply = r#"{"entities": [{"name": "Bob Smith", "type": "person"}], "relationships": []}"#;
        let result = pipeline(reply)
            .extract("Bob Smith can be reached at bob@smith.io. Unrelated note dated 2024-05-01.")
            .await;
        let bob = &result.entities[0];
        assert_eq!(bob.contact.email.as_deref(), Some("bob@smith.io"));
        let email = result.tokens(TokenKind::Email).next().unwrap();
        assert_eq!(email.attached_to.as_deref(), Some("Bob Smith"));
        assert_eq!(result.unattached().count(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_contact_stays_unattached() {
        let reply = r#"{"entities": [{"name": "Jane Doe", "type": "person"},
                                     {"name": "Acme Corp", "type": "company"}], "relationships": []}"#;
        let result = pipeline(reply)
            .extract("Jane Doe works at Acme Corp, jane@acme.com")
            .await;
        assert!(result.entities.iter().all(|e| e.contact.email.is_none()));
        assert_eq!(result.unattached().count(), 1);
    }

    #[tokio::test]
    async fn test_generated_contact_claims_token() {
        let reply = r#"{"entities": [{"name": "Jane Doe", "email": "jane@acme.com"},
                                     {"name": "Acme Corp"}], "relationships": []}"#;
        let result = pipeline(reply)
            .extract("Jane Doe works at Acme Corp, jane@acme.com")
            .await;
        let email = result.tokens(TokenKind::Email).next().unwrap();
        assert_eq!(email.attached_to.as_deref(), Some("Jane Doe"));
        assert_eq!(result.unattached().count(), 0);
    }

    #[tokio::test]
    async fn test_structured_pass_disabled_by_config() {
        let config = ExtractionConfig {
            structured: false,
            ..Default::default()
        };
        let pipeline = ExtractionPipeline::new(
            Some(Arc::new(Scripted(r#"{"entities": [{"name": "X"}]}"#.into()))),
            &config,
        );
        assert!(!pipeline.has_structured_pass());
        assert!(pipeline.extract("X").await.entities.is_empty());
    }
}
