//! Entity quality filter: multilingual noise reduction for NER output
//!
//! The NER baseline over-generates: bare numbers, ordinals, partial spans
//! with leading articles. This filter drops noise labels, enforces length
//! rules, strips leading articles and rejects stop-word names.

use crate::types::Entity;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// NER labels that are always noise for graph purposes
static NOISE_LABELS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["CARDINAL", "ORDINAL", "MONEY", "PERCENT", "QUANTITY", "TIME"]
        .into_iter()
        .collect()
});

/// Labels kept only above a minimum length ("English" stays, "EN" would
/// not). DATE spans are exempt: bare years are legitimate TEMPORAL
/// entities.
static CONDITIONAL_MIN_LENGTH: Lazy<HashMap<&'static str, usize>> =
    Lazy::new(|| HashMap::from([("LANGUAGE", 3)]));

static ARTICLES: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("en", vec!["the ", "a ", "an "]),
        (
            "de",
            vec![
                "der ", "die ", "das ", "den ", "dem ", "des ", "ein ", "eine ", "einer ",
                "einem ", "einen ",
            ],
        ),
        (
            "fr",
            vec!["le ", "la ", "les ", "l'", "un ", "une ", "des ", "du ", "de la ", "de l'"],
        ),
        (
            "es",
            vec!["el ", "la ", "los ", "las ", "un ", "una ", "unos ", "unas ", "lo "],
        ),
        (
            "it",
            vec!["il ", "lo ", "la ", "i ", "gli ", "le ", "un ", "uno ", "una ", "un'"],
        ),
        ("pt", vec!["o ", "a ", "os ", "as ", "um ", "uma ", "uns ", "umas "]),
    ])
});

static STOPWORD_NAMES: Lazy<HashMap<&'static str, HashSet<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        (
            "en",
            [
                "it", "he", "she", "they", "them", "this", "that", "these", "those", "which",
                "who", "what", "where", "when", "how", "all", "some", "any", "none", "each",
                "every", "both", "either", "neither",
            ]
            .into_iter()
            .collect::<HashSet<_>>(),
        ),
        (
            "de",
            [
                "es", "er", "sie", "dies", "das", "diese", "jene", "welche", "wer", "was", "wo",
                "wann", "wie", "alle", "einige", "manche", "keine",
            ]
            .into_iter()
            .collect::<HashSet<_>>(),
        ),
        (
            "fr",
            ["il", "elle", "ce", "cela", "qui", "que", "tous", "chaque", "aucun"]
                .into_iter()
                .collect::<HashSet<_>>(),
        ),
        (
            "es",
            ["él", "ella", "esto", "eso", "que", "quien", "todos", "cada", "ninguno"]
                .into_iter()
                .collect::<HashSet<_>>(),
        ),
    ])
});

/// Statistics from a filter pass
#[derive(Debug, Clone, Default)]
pub struct FilterStats {
    pub total_input: usize,
    pub total_output: usize,
    pub filtered_by_type: usize,
    pub filtered_by_length: usize,
    pub filtered_by_conditional: usize,
    pub filtered_by_stopword: usize,
    pub articles_removed: usize,
}

impl FilterStats {
    /// Percentage of entities filtered
    pub fn filter_rate(&self) -> f64 {
        if self.total_input == 0 {
            return 0.0;
        }
        (self.total_input - self.total_output) as f64 / self.total_input as f64 * 100.0
    }
}

/// Entity quality filter configuration
#[derive(Debug, Clone)]
pub struct QualityFilterConfig {
    pub min_length: usize,
    pub strip_articles: bool,
}

impl Default for QualityFilterConfig {
    fn default() -> Self {
        Self {
            min_length: 2,
            strip_articles: true,
        }
    }
}

/// Multilingual entity noise filter.
pub struct EntityQualityFilter {
    config: QualityFilterConfig,
}

impl EntityQualityFilter {
    pub fn new(config: QualityFilterConfig) -> Self {
        Self { config }
    }

    /// Strip a single leading article for the language, case-insensitively.
    fn strip_leading_article(&self, name: &str, lang: &str) -> Option<String> {
        let patterns = ARTICLES.get(lang)?;
        let lower = name.to_lowercase();
        for article in patterns {
            if lower.starts_with(article) && name.len() > article.len() {
                return Some(name[article.len()..].trim_start().to_string());
            }
        }
        None
    }

    fn ner_label(entity: &Entity) -> Option<String> {
        entity
            .properties
            .get("ner_label")
            .and_then(|v| v.as_str())
            .map(|s| s.to_uppercase())
    }

    /// Filter a batch of entities, returning survivors and stats.
    pub fn filter(&self, entities: Vec<Entity>, lang: &str) -> (Vec<Entity>, FilterStats) {
        let mut stats = FilterStats {
            total_input: entities.len(),
            ..Default::default()
        };
        let stopwords = STOPWORD_NAMES.get(lang);

        let mut kept = Vec::with_capacity(entities.len());

        for mut entity in entities {
            let label = Self::ner_label(&entity);

            if let Some(label) = &label {
                if NOISE_LABELS.contains(label.as_str()) {
                    stats.filtered_by_type += 1;
                    continue;
                }
                if let Some(min) = CONDITIONAL_MIN_LENGTH.get(label.as_str()) {
                    if entity.name.trim().len() < *min {
                        stats.filtered_by_conditional += 1;
                        continue;
                    }
                }
            }

            if self.config.strip_articles {
                if let Some(stripped) = self.strip_leading_article(&entity.name, lang) {
                    debug!(original = %entity.name, stripped = %stripped, "leading_article_removed");
                    entity.name = stripped;
                    stats.articles_removed += 1;
                }
            }

            let name = entity.name.trim().to_string();
            if name.len() < self.config.min_length {
                stats.filtered_by_length += 1;
                continue;
            }

            if let Some(stopwords) = stopwords {
                if stopwords.contains(name.to_lowercase().as_str()) {
                    stats.filtered_by_stopword += 1;
                    continue;
                }
            }

            entity.name = name;
            kept.push(entity);
        }

        stats.total_output = kept.len();
        debug!(
            total_input = stats.total_input,
            total_output = stats.total_output,
            filtered_by_type = stats.filtered_by_type,
            articles_removed = stats.articles_removed,
            "entity_quality_filter_complete"
        );
        (kept, stats)
    }
}

impl Default for EntityQualityFilter {
    fn default() -> Self {
        Self::new(QualityFilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ner_entity(name: &str, label: &str) -> Entity {
        Entity::new(name, crate::ner::map_ner_label(label))
            .with_property("ner_label", serde_json::json!(label))
    }

    #[test]
    fn test_noise_labels_filtered() {
        let filter = EntityQualityFilter::default();
        let entities = vec![
            ner_entity("20", "CARDINAL"),
            ner_entity("first", "ORDINAL"),
            ner_entity(".236 per cent", "PERCENT"),
            ner_entity("Microsoft", "ORG"),
        ];
        let (kept, stats) = filter.filter(entities, "en");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Microsoft");
        assert_eq!(stats.filtered_by_type, 3);
    }

    #[test]
    fn test_conditional_language_length() {
        let filter = EntityQualityFilter::default();
        let entities = vec![
            ner_entity("EN", "LANGUAGE"),
            ner_entity("English", "LANGUAGE"),
        ];
        let (kept, stats) = filter.filter(entities, "en");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "English");
        assert_eq!(stats.filtered_by_conditional, 1);
    }

    #[test]
    fn test_bare_years_survive() {
        let filter = EntityQualityFilter::default();
        let entities = vec![ner_entity("1975", "DATE")];
        let (kept, _) = filter.filter(entities, "en");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "1975");
    }

    #[test]
    fn test_leading_article_stripped() {
        let filter = EntityQualityFilter::default();
        let entities = vec![ner_entity("the Kotayk Province", "GPE")];
        let (kept, stats) = filter.filter(entities, "en");
        assert_eq!(kept[0].name, "Kotayk Province");
        assert_eq!(stats.articles_removed, 1);
    }

    #[test]
    fn test_german_article_stripped() {
        let filter = EntityQualityFilter::default();
        let entities = vec![ner_entity("die Bundesbank", "ORG")];
        let (kept, _) = filter.filter(entities, "de");
        assert_eq!(kept[0].name, "Bundesbank");
    }

    #[test]
    fn test_stopword_names_rejected() {
        let filter = EntityQualityFilter::default();
        let entities = vec![ner_entity("This", "ORG"), ner_entity("Tesla", "ORG")];
        let (kept, stats) = filter.filter(entities, "en");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Tesla");
        assert_eq!(stats.filtered_by_stopword, 1);
    }

    #[test]
    fn test_min_length_enforced() {
        let filter = EntityQualityFilter::default();
        let entities = vec![ner_entity("X", "ORG")];
        let (kept, stats) = filter.filter(entities, "en");
        assert!(kept.is_empty());
        assert_eq!(stats.filtered_by_length, 1);
    }

    #[test]
    fn test_filter_rate() {
        let filter = EntityQualityFilter::default();
        let entities = vec![ner_entity("20", "CARDINAL"), ner_entity("Acme", "ORG")];
        let (_, stats) = filter.filter(entities, "en");
        assert!((stats.filter_rate() - 50.0).abs() < 1e-9);
        assert_eq!(FilterStats::default().filter_rate(), 0.0);
    }
}
