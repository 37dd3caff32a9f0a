//! Repairs generator output into parseable JSON.
//!
//! Tolerated malformations: a surrounding Markdown code fence, single-quoted
//! strings, `True`/`False`/`None` literals, and prose around the object.

use memsync_types::error::{MemSyncError, MemSyncResult};
use serde_json::Value;

/// Parse a generator response, repairing it step by step until one parse succeeds.
pub fn parse_generation_output(raw: &str) -> MemSyncResult<Value> {
    let body = strip_code_fence(raw);
    if let Ok(value) = serde_json::from_str(body) {
        return Ok(value);
    }

    // Prose outside the object may hold apostrophes, so the object span is
    // tried before any quote repair touches the whole body.
    let span = outer_object(body);
    if let Some(span) = span {
        if let Ok(value) = serde_json::from_str(span) {
            return Ok(value);
        }
    }

    let repaired = repair_literals(body);
    let first_err = match serde_json::from_str(&repaired) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(span) = span {
        if let Ok(value) = serde_json::from_str(&repair_literals(span)) {
            return Ok(value);
        }
    }

    if let Some(span) = outer_object(&repaired) {
        if let Ok(value) = serde_json::from_str(span) {
            return Ok(value);
        }
    }

    Err(MemSyncError::ExtractionParse(first_err.to_string()))
}

/// Body of the first fenced block, or the trimmed input when unfenced.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = trimmed[start + 3..].trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => after.trim(),
    }
}

/// Rewrite single-quoted strings as JSON strings and replace bare
/// `True`/`False`/`None` outside of strings.
fn repair_literals(text: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Outside,
        Double,
        Single,
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut state = State::Outside;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match state {
            State::Outside => match c {
                '"' => {
                    out.push(c);
                    state = State::Double;
                }
                '\'' => {
                    out.push('"');
                    state = State::Single;
                }
                c if c.is_ascii_alphabetic() => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    out.push_str(match word.as_str() {
                        "True" => "true",
                        "False" => "false",
                        "None" => "null",
                        other => other,
                    });
                    continue;
                }
                _ => out.push(c),
            },
            State::Double => {
                out.push(c);
                if c == '\\' {
                    if let Some(&next) = chars.get(i + 1) {
                        out.push(next);
                        i += 1;
                    }
                } else if c == '"' {
                    state = State::Outside;
                }
            }
            State::Single => match c {
                '\\' => match chars.get(i + 1) {
                    Some('\'') => {
                        out.push('\'');
                        i += 1;
                    }
                    Some(&next) => {
                        out.push('\\');
                        out.push(next);
                        i += 1;
                    }
                    None => out.push_str("\\\\"),
                },
                '"' => out.push_str("\\\""),
                '\'' => {
                    out.push('"');
                    state = State::Outside;
                }
                _ => out.push(c),
            },
        }
        i += 1;
    }
    out
}

/// The span from the first `{` to the last `}`.
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_passes_through() {
        let value = parse_generation_output(r#"{"entities": [], "relationships": []}"#).unwrap();
        assert_eq!(value, json!({"entities": [], "relationships": []}));
    }

    #[test]
    fn test_code_fence() {
        let raw = "```json\n{\"entities\": [{\"name\": \"Acme\"}]}\n```";
        let value = parse_generation_output(raw).unwrap();
        assert_eq!(value["entities"][0]["name"], "Acme");

        let bare = "```{\"a\": 1}```";
        assert_eq!(parse_generation_output(bare).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_single_quotes() {
        let raw = "{'entities': [{'name': 'Jane Doe', 'notes': 'says \"hi\"'}]}";
        let value = parse_generation_output(raw).unwrap();
        assert_eq!(value["entities"][0]["name"], "Jane Doe");
        assert_eq!(value["entities"][0]["notes"], "says \"hi\"");
    }

    #[test]
    fn test_python_literals() {
        let raw = r#"{"relationships": [{"from": "a", "to": "b", "current": True, "until": None}], "ok": False}"#;
        let value = parse_generation_output(raw).unwrap();
        assert_eq!(value["relationships"][0]["current"], json!(true));
        assert_eq!(value["relationships"][0]["until"], Value::Null);
        assert_eq!(value["ok"], json!(false));
    }

    #[test]
    fn test_all_malformations_combined() {
        let raw = "Here you go:\n```json\n{'entities': [{'name': 'O\\'Brien', 'type': 'person', \
                   'email': None}], 'relationships': [{'from': 'o_brien', 'to': 'acme', \
                   'current': True}]}\n```\nLet me know!";
        let value = parse_generation_output(raw).unwrap();
        assert_eq!(value["entities"][0]["name"], "O'Brien");
        assert_eq!(value["entities"][0]["email"], Value::Null);
        assert_eq!(value["relationships"][0]["current"], json!(true));
    }

    #[test]
    fn test_prose_around_object() {
        let raw = "Sure! {\"entities\": [], \"relationships\": []} Hope that helps.";
        let value = parse_generation_output(raw).unwrap();
        assert!(value["entities"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_apostrophe_in_surrounding_prose() {
        let raw = r#"Here's what I found: {"entities": [{"name": "Acme"}], "relationships": []}"#;
        let value = parse_generation_output(raw).unwrap();
        assert_eq!(value["entities"][0]["name"], "Acme");

        let raw = "Here's what I found: {'entities': [{'name': 'Acme', 'current': True}]} That's all.";
        let value = parse_generation_output(raw).unwrap();
        assert_eq!(value["entities"][0]["name"], "Acme");
        assert_eq!(value["entities"][0]["current"], json!(true));
    }

    #[test]
    fn test_literal_words_inside_strings_untouched() {
        let raw = "{'notes': 'None of this is True'}";
        let value = parse_generation_output(raw).unwrap();
        assert_eq!(value["notes"], "None of this is True");
    }

    #[test]
    fn test_unparseable_is_error() {
        let err = parse_generation_output("I could not find any entities.").unwrap_err();
        assert!(matches!(err, MemSyncError::ExtractionParse(_)));
        assert!(parse_generation_output("{broken").is_err());
    }
}
