//! Tolerant JSON extraction from free-form LLM output
//!
//! Models wrap arrays in prose, markdown fences, Python literals and
//! single-quote pseudo-JSON. This module extracts the array with a strategy
//! chain (code fence, regex-bounded array, whole string), repairs common
//! damage, validates per object kind, and falls back to salvaging
//! individual `{...}` blobs before raising `ParseError`.

use crate::errors::{ExtractError, ExtractResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Object kind expected from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseKind {
    Entity,
    Relationship,
}

impl ParseKind {
    fn as_str(&self) -> &'static str {
        match self {
            ParseKind::Entity => "entity",
            ParseKind::Relationship => "relationship",
        }
    }
}

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\[.*?\])\s*```").unwrap());
static ARRAY_BOUNDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());
static SINGLE_QUOTE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\[{]\s*\{?\s*'").unwrap());
// Structural single-quote rewrites; ordered so value-internal apostrophes
// like "L'Histoire" are never touched.
static SQ_KEY_COLON: Lazy<Regex> = Lazy::new(|| Regex::new(r"'\s*:").unwrap());
static SQ_COLON_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r":\s*'").unwrap());
static SQ_VALUE_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"'\s*,").unwrap());
static SQ_COMMA_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*'").unwrap());
static SQ_VALUE_BRACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"'\s*\}").unwrap());
static SQ_VALUE_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"'\s*\]").unwrap());
static SQ_BRACKET_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\s*'").unwrap());
static SQ_BRACE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\s*'").unwrap());
static PY_NONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bNone\b").unwrap());
static PY_TRUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bTrue\b").unwrap());
static PY_FALSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bFalse\b").unwrap());
static TRAILING_COMMA_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\]").unwrap());
static TRAILING_COMMA_BRACE: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\}").unwrap());
static MISSING_COMMA_OBJECTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\}\s*\{").unwrap());
static MISSING_COMMA_ARRAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]\s*\[").unwrap());
static MISSING_COMMA_ARRAY_OBJ: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]\s*\{").unwrap());
static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f]").unwrap());
// Matches individual objects with at most one level of nesting, lenient
// enough to survive a broken surrounding array.
static OBJECT_BLOB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").unwrap());

/// Apply common repairs to malformed JSON from LLM responses.
///
/// Handles Python literals, trailing commas, missing commas between adjacent
/// objects, stray control characters and single-quote-delimited JSON. The
/// single-quote rewrite only touches *structural* quotes so apostrophes
/// inside string values survive.
pub fn repair_json(json_str: &str) -> String {
    let mut s = json_str.to_string();

    // Detect single-quote delimited JSON from the leading structure only
    let head: String = s.chars().take(50).collect();
    if SINGLE_QUOTE_START.is_match(&head) {
        s = SQ_KEY_COLON.replace_all(&s, "\":").into_owned();
        s = SQ_COLON_VALUE.replace_all(&s, ": \"").into_owned();
        s = SQ_VALUE_COMMA.replace_all(&s, "\",").into_owned();
        s = SQ_COMMA_KEY.replace_all(&s, ", \"").into_owned();
        s = SQ_VALUE_BRACE.replace_all(&s, "\"}").into_owned();
        s = SQ_VALUE_BRACKET.replace_all(&s, "\"]").into_owned();
        s = SQ_BRACKET_VALUE.replace_all(&s, "[\"").into_owned();
        s = SQ_BRACE_KEY.replace_all(&s, "{\"").into_owned();
    }

    s = PY_NONE.replace_all(&s, "null").into_owned();
    s = PY_TRUE.replace_all(&s, "true").into_owned();
    s = PY_FALSE.replace_all(&s, "false").into_owned();

    s = TRAILING_COMMA_BRACKET.replace_all(&s, "]").into_owned();
    s = TRAILING_COMMA_BRACE.replace_all(&s, "}").into_owned();

    s = MISSING_COMMA_OBJECTS.replace_all(&s, "},{").into_owned();
    s = MISSING_COMMA_ARRAYS.replace_all(&s, "],[").into_owned();
    s = MISSING_COMMA_ARRAY_OBJ.replace_all(&s, "],{").into_owned();

    s = CONTROL_CHARS.replace_all(&s, "").into_owned();

    s
}

/// Normalize a natural-language predicate to an UPPER_SNAKE relation type.
///
/// Known predicate phrases map directly; everything else is tokenised from
/// its first three words.
pub fn normalize_predicate(predicate: &str) -> String {
    if predicate.trim().is_empty() {
        return "RELATED_TO".to_string();
    }

    let predicate_lower = predicate.trim().to_lowercase();

    const MAPPING: [(&str, &str); 27] = [
        ("works at", "WORKS_AT"),
        ("works for", "WORKS_FOR"),
        ("created by", "CREATED_BY"),
        ("created", "CREATED"),
        ("directed by", "DIRECTED_BY"),
        ("directed", "DIRECTED"),
        ("produced by", "PRODUCED_BY"),
        ("produced", "PRODUCED"),
        ("stars in", "STARS_IN"),
        ("stars", "STARS"),
        ("voiced by", "VOICED_BY"),
        ("founded by", "FOUNDED_BY"),
        ("founded", "FOUNDED"),
        ("born in", "BORN_IN"),
        ("located in", "LOCATED_IN"),
        ("part of", "PART_OF"),
        ("member of", "MEMBER_OF"),
        ("contains", "CONTAINS"),
        ("uses", "USES"),
        ("has", "HAS"),
        ("is an", "IS_A"),
        ("is a", "IS_A"),
        ("based on", "BASED_ON"),
        ("released", "RELEASED"),
        ("published", "PUBLISHED"),
        ("written by", "WRITTEN_BY"),
        ("wrote", "WROTE"),
    ];

    for (pattern, rel_type) in MAPPING {
        if predicate_lower.starts_with(pattern) {
            return rel_type.to_string();
        }
    }

    // Fallback: first three words as an UPPER_SNAKE type
    let type_str: String = predicate_lower
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if type_str.is_empty() {
        "RELATED_TO".to_string()
    } else {
        type_str
    }
}

/// Normalize a relationship object into the canonical
/// `{source, target, type}` shape, accepting the alternate
/// `{subject, predicate, object}` shape.
fn normalize_relationship(obj: &Map<String, Value>) -> Option<Map<String, Value>> {
    if obj.contains_key("source") && obj.contains_key("target") && obj.contains_key("type") {
        return Some(obj.clone());
    }
    if obj.contains_key("subject") && obj.contains_key("object") {
        let predicate = obj.get("predicate").and_then(Value::as_str).unwrap_or("");
        let mut normalized = Map::new();
        normalized.insert("source".to_string(), obj["subject"].clone());
        normalized.insert("target".to_string(), obj["object"].clone());
        normalized.insert(
            "type".to_string(),
            Value::String(normalize_predicate(predicate)),
        );
        normalized.insert(
            "description".to_string(),
            Value::String(predicate.to_string()),
        );
        return Some(normalized);
    }
    None
}

fn validate_object(obj: &Map<String, Value>, kind: ParseKind) -> Option<Map<String, Value>> {
    match kind {
        ParseKind::Entity => {
            if obj.contains_key("name") && obj.contains_key("type") {
                Some(obj.clone())
            } else {
                None
            }
        }
        ParseKind::Relationship => normalize_relationship(obj),
    }
}

/// Salvage individual `{...}` blobs when full-array parsing has failed.
fn salvage_objects(text: &str, kind: ParseKind) -> Vec<Map<String, Value>> {
    let mut objects = Vec::new();

    for m in OBJECT_BLOB.find_iter(text) {
        let repaired = repair_json(m.as_str());
        let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&repaired) else {
            continue;
        };
        if let Some(valid) = validate_object(&obj, kind) {
            objects.push(valid);
        }
    }

    objects
}

fn preview(text: &str) -> String {
    text.chars().take(500).collect()
}

/// Parse a JSON array of objects from raw LLM output.
///
/// Strategy order: markdown code fence, regex-bounded array, the entire
/// string. The repaired candidate is parsed, each object validated for its
/// kind; a single bare object with the required fields is wrapped in a list.
/// On parse failure the object-salvage pass runs before `ParseError` is
/// raised; the parser never silently returns an empty list for non-empty
/// input that failed to parse.
pub fn parse_json_response(response: &str, kind: ParseKind) -> ExtractResult<Vec<Map<String, Value>>> {
    let (json_str, strategy) = if let Some(cap) = CODE_FENCE.captures(response) {
        (cap.get(1).map(|m| m.as_str()).unwrap_or(""), "code_fence")
    } else if let Some(m) = ARRAY_BOUNDS.find(response) {
        (m.as_str(), "regex_array")
    } else {
        (response.trim(), "full_response")
    };

    debug!(strategy, kind = kind.as_str(), "json_extraction_strategy");

    let repaired = repair_json(json_str.trim());

    match serde_json::from_str::<Value>(&repaired) {
        Ok(Value::Array(items)) => {
            let total = items.len();
            let mut valid_items = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(obj) => {
                        if let Some(valid) = validate_object(&obj, kind) {
                            valid_items.push(valid);
                        } else {
                            warn!(index = i, kind = kind.as_str(), "invalid_object_structure");
                        }
                    }
                    other => {
                        warn!(index = i, item_type = %other, "invalid_array_item");
                    }
                }
            }
            debug!(
                strategy,
                kind = kind.as_str(),
                total_items = total,
                valid_items = valid_items.len(),
                "json_parse_success"
            );
            Ok(valid_items)
        }
        Ok(Value::Object(obj)) => {
            // Single object instead of an array: wrap when valid
            if let Some(valid) = validate_object(&obj, kind) {
                debug!(kind = kind.as_str(), "wrapping_single_object_in_array");
                Ok(vec![valid])
            } else {
                Err(ExtractError::Parse {
                    strategy: strategy.to_string(),
                    preview: preview(response),
                })
            }
        }
        Ok(_) => Err(ExtractError::Parse {
            strategy: strategy.to_string(),
            preview: preview(response),
        }),
        Err(e) => {
            warn!(
                strategy,
                error = %e,
                "json_parse_failed_trying_individual_extraction"
            );

            let salvaged = salvage_objects(response, kind);
            if !salvaged.is_empty() {
                debug!(
                    extracted_count = salvaged.len(),
                    kind = kind.as_str(),
                    "json_individual_extraction_success"
                );
                return Ok(salvaged);
            }

            Err(ExtractError::Parse {
                strategy: strategy.to_string(),
                preview: preview(response),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a str {
        obj.get(key).and_then(Value::as_str).unwrap_or("")
    }

    #[test]
    fn test_parse_clean_array() {
        let response = r#"[{"name": "Microsoft", "type": "ORGANIZATION"}]"#;
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(str_field(&items[0], "name"), "Microsoft");
    }

    #[test]
    fn test_parse_code_fence() {
        let response = "Here you go:\n```json\n[{\"name\": \"Rust\", \"type\": \"TECHNOLOGY\"}]\n```\nHope this helps!";
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(str_field(&items[0], "name"), "Rust");
    }

    #[test]
    fn test_parse_array_embedded_in_prose() {
        let response = r#"The entities are: [{"name": "Bill Gates", "type": "PERSON"}] as requested."#;
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_repair_python_literals() {
        let response = r#"[{"name": "X", "type": "CONCEPT", "extra": None, "flag": True}]"#;
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0]["extra"].is_null());
        assert_eq!(items[0]["flag"], Value::Bool(true));
    }

    #[test]
    fn test_repair_trailing_commas() {
        let response = r#"[{"name": "X", "type": "CONCEPT",},]"#;
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_repair_missing_comma_between_objects() {
        let response = r#"[{"name": "A", "type": "CONCEPT"} {"name": "B", "type": "CONCEPT"}]"#;
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_single_quote_json_preserves_apostrophes() {
        // Malformed single-quote JSON with a missing comma and trailing comma
        let response =
            r#"[{'name': "L'Histoire", 'type': "DOCUMENT"} {'name':'Ulm','type':'LOCATION'},]"#;
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(str_field(&items[0], "name"), "L'Histoire");
        assert_eq!(str_field(&items[1], "name"), "Ulm");
    }

    #[test]
    fn test_entity_missing_required_fields_dropped() {
        let response = r#"[{"name": "Valid", "type": "CONCEPT"}, {"name": "NoType"}]"#;
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_relationship_canonical_shape() {
        let response = r#"[{"source": "A", "target": "B", "type": "USES"}]"#;
        let items = parse_json_response(response, ParseKind::Relationship).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(str_field(&items[0], "type"), "USES");
    }

    #[test]
    fn test_relationship_spo_shape_normalized() {
        let response = r#"[{"subject": "Guido", "predicate": "created", "object": "Python"}]"#;
        let items = parse_json_response(response, ParseKind::Relationship).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(str_field(&items[0], "source"), "Guido");
        assert_eq!(str_field(&items[0], "target"), "Python");
        assert_eq!(str_field(&items[0], "type"), "CREATED");
        assert_eq!(str_field(&items[0], "description"), "created");
    }

    #[test]
    fn test_single_object_wrapped() {
        let response = r#"{"name": "Solo", "type": "CONCEPT"}"#;
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_salvage_from_broken_array() {
        let response = r#"[{"name": "Good", "type": "CONCEPT"}, {"name": "Broken", "type": ]"#;
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(str_field(&items[0], "name"), "Good");
    }

    #[test]
    fn test_unparseable_raises_parse_error() {
        let result = parse_json_response("total garbage with no json", ParseKind::Entity);
        match result {
            Err(ExtractError::Parse { strategy, preview }) => {
                assert_eq!(strategy, "full_response");
                assert!(preview.starts_with("total garbage"));
            }
            other => panic!("expected ParseError, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_array_is_valid() {
        let items = parse_json_response("[]", ParseKind::Entity).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_normalize_predicate_known_patterns() {
        assert_eq!(normalize_predicate("works at"), "WORKS_AT");
        assert_eq!(normalize_predicate("founded by"), "FOUNDED_BY");
        assert_eq!(normalize_predicate("is a"), "IS_A");
    }

    #[test]
    fn test_normalize_predicate_tokenized_fallback() {
        assert_eq!(
            normalize_predicate("is a setting that can be tried"),
            "IS_A"
        );
        assert_eq!(normalize_predicate("strongly influences"), "STRONGLY_INFLUENCES");
        assert_eq!(normalize_predicate(""), "RELATED_TO");
    }

    #[test]
    fn test_control_characters_removed() {
        let response = "[{\"name\": \"A\u{0001}B\", \"type\": \"CONCEPT\"}]";
        let items = parse_json_response(response, ParseKind::Entity).unwrap();
        assert_eq!(str_field(&items[0], "name"), "AB");
    }
}
