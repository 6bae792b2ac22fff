//! Deterministic NER baseline
//!
//! Offline, rule-driven named-entity tagger used as the first pipeline
//! stage and by the coreference resolver. Per-language models carry the
//! lexicons (stop words, organization suffixes, location prepositions,
//! name particles); they are loaded lazily and held for process lifetime,
//! with the load guarded so only one concurrent loader wins.
//!
//! Labels follow the conventional NER tag set (PER, ORG, GPE, DATE, ...)
//! and are mapped into the universal entity-type vocabulary on the way out.

use crate::types::Entity;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// A raw tagged span with byte offsets into the input text
#[derive(Debug, Clone, PartialEq)]
pub struct NerSpan {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
}

/// Map a NER label into the universal entity-type set.
///
/// `MISC` deliberately maps to the generic `ENTITY` bucket, which the
/// consolidator later rejects.
pub fn map_ner_label(label: &str) -> &'static str {
    match label.to_uppercase().as_str() {
        "PER" | "PERSON" => "PERSON",
        "ORG" | "NORP" => "ORGANIZATION",
        "LOC" | "GPE" | "FAC" => "LOCATION",
        "DATE" | "TIME" => "TEMPORAL",
        "QUANTITY" | "CARDINAL" | "MONEY" | "PERCENT" => "QUANTITY",
        "WORK_OF_ART" | "LANGUAGE" => "CONCEPT",
        "LAW" => "DOCUMENT",
        "EVENT" => "EVENT",
        "PRODUCT" => "TECHNOLOGY",
        _ => "ENTITY",
    }
}

static MONEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"[$€£]\s?\d[\d,.]*").unwrap());
static PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:[.,]\d+)?\s?(?:%|percent|prozent)").unwrap());
static MONTH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2}(?:,\s*\d{4})?\b",
    )
    .unwrap()
});
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:1[0-9]{3}|20[0-9]{2})\b").unwrap());
static CARDINAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+(?:[.,]\d+)?\b").unwrap());

/// Per-language tagger model: lexicons driving the rule passes.
#[derive(Debug)]
pub struct NerModel {
    pub lang: &'static str,
    stopwords: HashSet<&'static str>,
    org_suffixes: HashSet<&'static str>,
    location_preps: HashSet<&'static str>,
    name_particles: HashSet<&'static str>,
}

impl NerModel {
    fn for_language(lang: &str) -> Arc<NerModel> {
        let (lang, stopwords, location_preps): (&'static str, Vec<&'static str>, Vec<&'static str>) =
            match lang {
                "de" => (
                    "de",
                    vec![
                        "der", "die", "das", "ein", "eine", "und", "oder", "aber", "es", "er",
                        "sie", "ich", "wir", "ihr", "dies", "diese", "dieser", "im", "am", "um",
                        "mit", "für", "von", "nach", "bei", "aus", "auch", "als", "wenn", "dann",
                    ],
                    vec!["in", "bei", "nach", "aus", "von"],
                ),
                "fr" => (
                    "fr",
                    vec![
                        "le", "la", "les", "un", "une", "des", "et", "ou", "mais", "il", "elle",
                        "ils", "elles", "je", "nous", "vous", "ce", "cette", "ces", "dans", "pour",
                        "avec", "sur", "par", "que", "qui", "si", "alors",
                    ],
                    vec!["à", "en", "dans", "vers", "de"],
                ),
                "es" => (
                    "es",
                    vec![
                        "el", "la", "los", "las", "un", "una", "unos", "unas", "y", "o", "pero",
                        "él", "ella", "ellos", "ellas", "yo", "nosotros", "este", "esta", "estos",
                        "en", "para", "con", "sobre", "por", "que", "si",
                    ],
                    vec!["en", "a", "hacia", "de"],
                ),
                _ => (
                    "en",
                    vec![
                        "the", "a", "an", "and", "or", "but", "it", "he", "she", "they", "them",
                        "i", "we", "you", "this", "that", "these", "those", "in", "on", "at",
                        "with", "for", "from", "to", "of", "by", "as", "if", "then", "when",
                        "where", "who", "which", "its", "his", "her", "their", "our", "is", "was",
                        "are", "were", "be", "been", "has", "have", "had", "not", "no", "yes",
                    ],
                    vec!["in", "at", "near", "from", "to"],
                ),
            };

        Arc::new(NerModel {
            lang,
            stopwords: stopwords.into_iter().collect(),
            org_suffixes: [
                "Inc", "Inc.", "Corp", "Corp.", "Corporation", "Ltd", "Ltd.", "LLC", "GmbH", "AG",
                "SA", "SE", "Co", "Co.", "Company", "Group", "Labs", "University", "Institute",
                "Foundation", "Agency", "Ministry",
            ]
            .into_iter()
            .collect(),
            location_preps: location_preps.into_iter().collect(),
            name_particles: ["van", "von", "de", "der", "da", "di", "del", "la", "le", "bin", "al"]
                .into_iter()
                .collect(),
        })
    }

    fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token.to_lowercase().as_str())
    }

    /// Tag a text, returning spans sorted by start offset. Deterministic,
    /// no network.
    pub fn tag(&self, text: &str) -> Vec<NerSpan> {
        let mut spans: Vec<NerSpan> = Vec::new();

        let mut push_regex = |re: &Regex, label: &str, spans: &mut Vec<NerSpan>| {
            for m in re.find_iter(text) {
                if spans.iter().any(|s| overlaps(s.start, s.end, m.start(), m.end())) {
                    continue;
                }
                spans.push(NerSpan {
                    text: m.as_str().to_string(),
                    label: label.to_string(),
                    start: m.start(),
                    end: m.end(),
                });
            }
        };

        push_regex(&MONEY, "MONEY", &mut spans);
        push_regex(&PERCENT, "PERCENT", &mut spans);
        push_regex(&MONTH_DATE, "DATE", &mut spans);
        push_regex(&YEAR, "DATE", &mut spans);
        push_regex(&CARDINAL, "CARDINAL", &mut spans);

        self.tag_capitalized_sequences(text, &mut spans);

        spans.sort_by_key(|s| s.start);
        spans
    }

    /// Walk tokens collecting capitalized sequences (name particles may
    /// join them) and classify each sequence.
    fn tag_capitalized_sequences(&self, text: &str, spans: &mut Vec<NerSpan>) {
        let tokens = tokenize(text);
        let mut i = 0usize;

        while i < tokens.len() {
            let tok = &tokens[i];
            if !self.qualifies(tok, spans) {
                i += 1;
                continue;
            }

            // Extend the sequence over capitalized tokens, allowing
            // lowercase name particles between them ("Guido van Rossum")
            let seq_start = i;
            let mut seq_end = i;
            let mut capitalized_count = 1usize;
            let mut j = i + 1;
            while j < tokens.len() {
                let next = &tokens[j];
                if self.qualifies(next, spans) {
                    seq_end = j;
                    capitalized_count += 1;
                    j += 1;
                } else if self.name_particles.contains(next.text.to_lowercase().as_str())
                    && j + 1 < tokens.len()
                    && self.qualifies(&tokens[j + 1], spans)
                {
                    seq_end = j + 1;
                    capitalized_count += 1;
                    j += 2;
                } else {
                    break;
                }
            }

            let start = tokens[seq_start].start;
            let end = tokens[seq_end].end;
            let surface = &text[start..end];

            let label = if capitalized_count >= 2 {
                if tokens[seq_start..=seq_end]
                    .iter()
                    .any(|t| self.org_suffixes.contains(t.text.as_str()))
                {
                    "ORG"
                } else {
                    "PER"
                }
            } else {
                let prev = seq_start
                    .checked_sub(1)
                    .map(|p| tokens[p].text.to_lowercase());
                if prev
                    .as_deref()
                    .map(|p| self.location_preps.contains(p))
                    .unwrap_or(false)
                {
                    "GPE"
                } else {
                    "ORG"
                }
            };

            spans.push(NerSpan {
                text: surface.to_string(),
                label: label.to_string(),
                start,
                end,
            });

            i = seq_end + 1;
        }
    }

    fn qualifies(&self, tok: &Token, spans: &[NerSpan]) -> bool {
        if tok.text.len() < 2 {
            return false;
        }
        let first = match tok.text.chars().next() {
            Some(c) => c,
            None => return false,
        };
        if !first.is_uppercase() {
            return false;
        }
        if self.is_stopword(&tok.text) {
            return false;
        }
        // Skip tokens already claimed by a regex span
        !spans.iter().any(|s| overlaps(s.start, s.end, tok.start, tok.end))
    }
}

fn overlaps(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start < b_end && b_start < a_end
}

#[derive(Debug, Clone)]
struct Token {
    text: String,
    start: usize,
    end: usize,
}

const EDGE_PUNCT: &[char] = &[
    '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '"', '\u{201c}', '\u{201d}',
    '\u{2018}', '\u{2019}',
];

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut offset = 0usize;

    for raw in text.split_whitespace() {
        let start_in_text = text[offset..].find(raw).map(|p| p + offset).unwrap_or(offset);
        let trimmed = raw.trim_matches(|c| EDGE_PUNCT.contains(&c));
        if !trimmed.is_empty() {
            let lead = raw.find(trimmed).unwrap_or(0);
            tokens.push(Token {
                text: trimmed.to_string(),
                start: start_in_text + lead,
                end: start_in_text + lead + trimmed.len(),
            });
        }
        offset = start_in_text + raw.len();
    }

    tokens
}

/// Process-wide model table; loads are guarded so only one loader wins.
#[derive(Debug, Default)]
pub struct NerRegistry {
    models: RwLock<HashMap<&'static str, Arc<NerModel>>>,
}

impl NerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or lazily load) the model for a language
    pub fn model_for(&self, lang: &str) -> Arc<NerModel> {
        if let Some(model) = self.models.read().expect("ner registry poisoned").get(lang) {
            return Arc::clone(model);
        }
        let mut guard = self.models.write().expect("ner registry poisoned");
        // Another loader may have won while we waited for the write lock
        if let Some(model) = guard.get(lang) {
            return Arc::clone(model);
        }
        let model = NerModel::for_language(lang);
        debug!(lang = model.lang, "ner_model_loaded");
        guard.insert(model.lang, Arc::clone(&model));
        model
    }
}

/// Run the NER baseline over a text, mapping labels into the universal set
/// and recording provenance (label, offsets, origin stage) as properties.
pub fn extract_entities(
    registry: &NerRegistry,
    text: &str,
    lang: &str,
    document_id: Option<&str>,
) -> Vec<Entity> {
    let model = registry.model_for(lang);
    let spans = model.tag(text);

    let mut entities = Vec::with_capacity(spans.len());
    for span in spans {
        let mapped = map_ner_label(&span.label);
        let mut entity = Entity::new(span.text.clone(), mapped)
            .with_property("ner_label", serde_json::json!(span.label))
            .with_property("char_start", serde_json::json!(span.start))
            .with_property("char_end", serde_json::json!(span.end))
            .with_property("origin_stage", serde_json::json!("ner_baseline"));
        if let Some(doc) = document_id {
            entity = entity.with_source_document(doc);
        }
        entities.push(entity);
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(text: &str) -> Vec<NerSpan> {
        let registry = NerRegistry::new();
        registry.model_for("en").tag(text)
    }

    fn labels_of(text: &str) -> Vec<(String, String)> {
        tag(text)
            .into_iter()
            .map(|s| (s.text, s.label))
            .collect()
    }

    #[test]
    fn test_founding_sentence() {
        let found = labels_of("Microsoft was founded by Bill Gates and Paul Allen in 1975 in Albuquerque.");
        assert!(found.contains(&("Microsoft".into(), "ORG".into())));
        assert!(found.contains(&("Bill Gates".into(), "PER".into())));
        assert!(found.contains(&("Paul Allen".into(), "PER".into())));
        assert!(found.contains(&("1975".into(), "DATE".into())));
        assert!(found.contains(&("Albuquerque".into(), "GPE".into())));
    }

    #[test]
    fn test_name_particle_joins_sequence() {
        let found = labels_of("Python was created by Guido van Rossum.");
        assert!(found.contains(&("Guido van Rossum".into(), "PER".into())));
    }

    #[test]
    fn test_org_suffix_classifies_organization() {
        let found = labels_of("She joined Acme Corp last spring.");
        assert!(found.contains(&("Acme Corp".into(), "ORG".into())));
    }

    #[test]
    fn test_pronouns_and_stopwords_excluded() {
        let found = labels_of("It was fine. The thing worked. They agreed.");
        assert!(found.is_empty(), "unexpected spans: {:?}", found);
    }

    #[test]
    fn test_money_and_percent() {
        let found = labels_of("Revenue grew 12% to $4.5 billion.");
        assert!(found.iter().any(|(t, l)| t.starts_with("12") && l == "PERCENT"));
        assert!(found.iter().any(|(t, l)| t.starts_with('$') && l == "MONEY"));
    }

    #[test]
    fn test_offsets_match_input() {
        let text = "Bill Gates founded Microsoft.";
        for span in tag(text) {
            assert_eq!(&text[span.start..span.end], span.text);
        }
    }

    #[test]
    fn test_determinism() {
        let text = "OpenAI released GPT-4 in March 2023. The model topped many benchmarks.";
        assert_eq!(tag(text), tag(text));
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(map_ner_label("PER"), "PERSON");
        assert_eq!(map_ner_label("ORG"), "ORGANIZATION");
        assert_eq!(map_ner_label("NORP"), "ORGANIZATION");
        assert_eq!(map_ner_label("GPE"), "LOCATION");
        assert_eq!(map_ner_label("FAC"), "LOCATION");
        assert_eq!(map_ner_label("DATE"), "TEMPORAL");
        assert_eq!(map_ner_label("CARDINAL"), "QUANTITY");
        assert_eq!(map_ner_label("MONEY"), "QUANTITY");
        assert_eq!(map_ner_label("WORK_OF_ART"), "CONCEPT");
        assert_eq!(map_ner_label("LAW"), "DOCUMENT");
        assert_eq!(map_ner_label("MISC"), "ENTITY");
    }

    #[test]
    fn test_extract_entities_carries_provenance() {
        let registry = NerRegistry::new();
        let entities = extract_entities(&registry, "Bill Gates founded Microsoft.", "en", Some("doc1"));
        let gates = entities.iter().find(|e| e.name == "Bill Gates").unwrap();
        assert_eq!(gates.entity_type, "PERSON");
        assert_eq!(gates.source_document.as_deref(), Some("doc1"));
        assert_eq!(gates.properties["origin_stage"], serde_json::json!("ner_baseline"));
        assert_eq!(gates.properties["char_start"], serde_json::json!(0));
    }

    #[test]
    fn test_registry_caches_models() {
        let registry = NerRegistry::new();
        let a = registry.model_for("en");
        let b = registry.model_for("en");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
