//! Heuristic coreference resolution
//!
//! Rewrites pronouns to their most recent plausible antecedent before
//! extraction, which measurably improves relation recall on pronoun-heavy
//! text. Candidates are scored: +10 for a category match, +2 per sentence
//! of remaining proximity budget, +5 for same-sentence; ties break by
//! recency. Replacements are applied back to front so offsets stay valid.
//!
//! Resolution never fails: any input that cannot be processed comes back
//! unchanged with a zero resolution count.

use crate::ner::{NerModel, NerRegistry, NerSpan};
use crate::preprocess::split_sentences;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Pronoun category, deciding which entity labels may serve as antecedent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PronounCategory {
    Person,
    Thing,
    Relative,
}

struct PronounTable {
    person: HashSet<&'static str>,
    thing: HashSet<&'static str>,
    relative: HashSet<&'static str>,
}

impl PronounTable {
    fn category(&self, token_lower: &str) -> Option<PronounCategory> {
        if self.person.contains(token_lower) {
            Some(PronounCategory::Person)
        } else if self.thing.contains(token_lower) {
            Some(PronounCategory::Thing)
        } else if self.relative.contains(token_lower) {
            Some(PronounCategory::Relative)
        } else {
            None
        }
    }
}

static PRONOUNS_BY_LANG: Lazy<HashMap<&'static str, PronounTable>> = Lazy::new(|| {
    let mut tables = HashMap::new();
    tables.insert(
        "en",
        PronounTable {
            person: [
                "he", "she", "him", "his", "hers", "himself", "herself", "they", "them", "their",
                "theirs", "themselves",
            ]
            .into_iter()
            .collect(),
            thing: ["it", "its", "itself"].into_iter().collect(),
            // which/that double as determiners and conjunctions; left out
            relative: ["who", "whom", "whose"].into_iter().collect(),
        },
    );
    tables.insert(
        "de",
        PronounTable {
            person: ["er", "ihm", "ihn", "ihr", "ihrer", "dessen", "deren"].into_iter().collect(),
            thing: ["es"].into_iter().collect(),
            relative: ["wer", "wessen"].into_iter().collect(),
        },
    );
    tables.insert(
        "fr",
        PronounTable {
            person: ["il", "elle", "lui", "eux", "elles"].into_iter().collect(),
            thing: ["cela", "ceci", "ça"].into_iter().collect(),
            relative: ["qui", "dont"].into_iter().collect(),
        },
    );
    tables.insert(
        "es",
        PronounTable {
            person: ["él", "ella", "ellos", "ellas"].into_iter().collect(),
            thing: ["ello", "esto", "eso", "aquello"].into_iter().collect(),
            relative: ["quien", "quienes", "cuyo", "cuya"].into_iter().collect(),
        },
    );
    tables
});

const PERSON_LABELS: [&str; 2] = ["PER", "PERSON"];
const ORG_LABELS: [&str; 3] = ["ORG", "NORP", "GPE"];
const THING_LABELS: [&str; 5] = ["PRODUCT", "WORK_OF_ART", "EVENT", "LAW", "TECHNOLOGY"];

fn label_matches(category: PronounCategory, label: &str) -> bool {
    let person = PERSON_LABELS.contains(&label);
    let org = ORG_LABELS.contains(&label);
    let thing = THING_LABELS.contains(&label);
    match category {
        // "They" can refer to organizations as well as people
        PronounCategory::Person => person || org,
        // "It" covers companies and products
        PronounCategory::Thing => org || thing,
        PronounCategory::Relative => person || org || thing,
    }
}

/// Result of a resolution pass
#[derive(Debug, Clone)]
pub struct CoreferenceResult {
    pub original_text: String,
    pub resolved_text: String,
    pub resolution_count: usize,
}

struct EntityMention {
    span: NerSpan,
    sent_idx: usize,
}

struct Resolution {
    start: usize,
    end: usize,
    replacement: String,
}

/// Heuristic pronoun resolver backed by the NER baseline.
pub struct CoreferenceResolver {
    lang: &'static str,
    max_distance: usize,
    model: Arc<NerModel>,
}

impl CoreferenceResolver {
    /// Create a resolver for a language (antecedent window of 3 sentences)
    pub fn new(registry: &NerRegistry, lang: &str) -> Self {
        let model = registry.model_for(lang);
        Self {
            lang: model.lang,
            max_distance: 3,
            model,
        }
    }

    /// Set the antecedent search window in sentences
    pub fn with_max_distance(mut self, max_distance: usize) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Resolve pronouns in a text.
    ///
    /// Texts with no resolvable pronoun come back unchanged with
    /// `resolution_count == 0`.
    pub fn resolve(&self, text: &str) -> CoreferenceResult {
        let unchanged = CoreferenceResult {
            original_text: text.to_string(),
            resolved_text: text.to_string(),
            resolution_count: 0,
        };

        if text.trim().is_empty() {
            return unchanged;
        }

        let Some(table) = PRONOUNS_BY_LANG.get(self.lang) else {
            return unchanged;
        };

        let sentences = split_sentences(text);
        let spans = self.model.tag(text);
        if spans.is_empty() {
            return unchanged;
        }

        let sent_of = |offset: usize| -> usize {
            sentences
                .iter()
                .position(|s| offset < s.end)
                .unwrap_or(sentences.len().saturating_sub(1))
        };

        let mentions: Vec<EntityMention> = spans
            .into_iter()
            .map(|span| EntityMention {
                sent_idx: sent_of(span.start),
                span,
            })
            .collect();

        let mut resolutions: Vec<Resolution> = Vec::new();

        for (offset, word) in word_tokens(text) {
            let lower = word.to_lowercase();
            let Some(category) = table.category(lower.as_str()) else {
                continue;
            };
            let sent_idx = sent_of(offset);
            if let Some(antecedent) = self.find_antecedent(category, offset, sent_idx, &mentions) {
                resolutions.push(Resolution {
                    start: offset,
                    end: offset + word.len(),
                    replacement: antecedent,
                });
            }
        }

        if resolutions.is_empty() {
            return unchanged;
        }

        // Apply in reverse so earlier offsets stay valid
        let mut resolved = text.to_string();
        resolutions.sort_by(|a, b| b.start.cmp(&a.start));
        for res in &resolutions {
            resolved.replace_range(res.start..res.end, &res.replacement);
        }

        debug!(
            resolutions = resolutions.len(),
            text_delta = resolved.len() as i64 - text.len() as i64,
            "coreference_resolved"
        );

        CoreferenceResult {
            original_text: text.to_string(),
            resolved_text: resolved,
            resolution_count: resolutions.len(),
        }
    }

    /// Score candidate antecedents and return the winner's surface form.
    fn find_antecedent(
        &self,
        category: PronounCategory,
        pronoun_offset: usize,
        sent_idx: usize,
        mentions: &[EntityMention],
    ) -> Option<String> {
        let mut best: Option<(i64, usize, &EntityMention)> = None;

        for mention in mentions {
            // Antecedent must be strictly before the pronoun
            if mention.span.end >= pronoun_offset {
                continue;
            }
            let distance = sent_idx.saturating_sub(mention.sent_idx);
            if distance > self.max_distance {
                continue;
            }

            let mut score: i64 = 0;
            if label_matches(category, &mention.span.label) {
                score += 10;
            }
            score += 2 * (self.max_distance as i64 - distance as i64);
            if distance == 0 {
                score += 5;
            }

            // Ties break by recency (largest start offset)
            let better = match &best {
                None => true,
                Some((best_score, best_start, _)) => {
                    score > *best_score || (score == *best_score && mention.span.start > *best_start)
                }
            };
            if better {
                best = Some((score, mention.span.start, mention));
            }
        }

        best.map(|(_, _, m)| m.span.text.clone())
    }
}

/// Iterate alphabetic word tokens with byte offsets
fn word_tokens(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_alphabetic() || c == '\u{2019}' || c == '\'' {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            tokens.push((s, &text[s..i]));
        }
    }
    if let Some(s) = start {
        tokens.push((s, &text[s..]));
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CoreferenceResolver {
        CoreferenceResolver::new(&NerRegistry::new(), "en")
    }

    #[test]
    fn test_thing_pronoun_resolves_to_organization() {
        let result = resolver().resolve("Microsoft was founded in 1975. It later acquired GitHub.");
        assert!(result.resolution_count >= 1);
        assert!(
            result.resolved_text.contains("Microsoft later acquired GitHub"),
            "got: {}",
            result.resolved_text
        );
    }

    #[test]
    fn test_person_pronoun_resolves_to_person() {
        let result = resolver().resolve("Bill Gates started the project. He hired many engineers.");
        assert!(result.resolution_count >= 1);
        assert!(
            result.resolved_text.contains("Bill Gates hired many engineers"),
            "got: {}",
            result.resolved_text
        );
    }

    #[test]
    fn test_pronounless_input_unchanged() {
        let text = "Microsoft acquired GitHub in 2018.";
        let result = resolver().resolve(text);
        assert_eq!(result.resolved_text, text);
        assert_eq!(result.resolution_count, 0);
    }

    #[test]
    fn test_empty_input_unchanged() {
        let result = resolver().resolve("");
        assert_eq!(result.resolution_count, 0);
        assert_eq!(result.resolved_text, "");
    }

    #[test]
    fn test_no_entities_means_no_resolutions() {
        let text = "it was raining and they went home.";
        let result = resolver().resolve(text);
        assert_eq!(result.resolved_text, text);
        assert_eq!(result.resolution_count, 0);
    }

    #[test]
    fn test_recency_wins_between_candidates() {
        let result = resolver()
            .resolve("Apple competed fiercely. Netscape shipped a browser. It dominated the market.");
        // Both are ORG candidates; the closer one wins
        assert!(
            result.resolved_text.contains("Netscape dominated the market"),
            "got: {}",
            result.resolved_text
        );
    }

    #[test]
    fn test_antecedent_must_precede_pronoun() {
        let result = resolver().resolve("It all began later. Microsoft shipped Windows.");
        // No entity precedes the pronoun, so nothing is rewritten
        assert!(result.resolved_text.starts_with("It all began later."));
    }

    #[test]
    fn test_distance_window_respected() {
        let far = "Microsoft opened an office. Sales rose. Numbers grew. Costs fell. Workers rested. It expanded again.";
        let result = resolver().with_max_distance(3).resolve(far);
        // "Microsoft" is 5 sentences back, outside the window; other
        // sentence-initial words are ORG-labelled noise candidates, so a
        // resolution may still occur, but never to Microsoft
        assert!(!result.resolved_text.contains("Microsoft expanded again"));
    }
}
