//! Entity consolidation: merge NER and LLM entities before relation
//! extraction
//!
//! The NER baseline is the trusted source; LLM enrichment adds value but
//! also noise (sentence-length "entities", generic types, duplicates).
//! Consolidation validates types on both sources, enforces length bounds,
//! and deduplicates NER-first with optional embedding similarity.

use crate::errors::ExtractResult;
use crate::traits::{cosine_similarity, EmbeddingService};
use crate::types::Entity;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Generic type buckets rejected from both sources
const INVALID_ENTITY_TYPES: [&str; 3] = ["ENTITY", "MISC", "UNKNOWN"];

/// Statistics from a consolidation pass
#[derive(Debug, Clone, Default)]
pub struct ConsolidationStats {
    pub ner_input: usize,
    pub llm_input: usize,
    pub total_input: usize,
    pub filtered_by_type: usize,
    pub filtered_by_length: usize,
    pub filtered_by_duplicate: usize,
    pub total_output: usize,
}

impl ConsolidationStats {
    /// Percentage of entities filtered
    pub fn filter_rate(&self) -> f64 {
        if self.total_input == 0 {
            return 0.0;
        }
        (self.total_input - self.total_output) as f64 / self.total_input as f64 * 100.0
    }
}

/// Consolidation configuration
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    pub min_length: usize,
    /// Rejects full sentences masquerading as entities
    pub max_length: usize,
    pub reject_generic_types: bool,
    pub enable_deduplication: bool,
    /// Embedding cosine similarity threshold for semantic duplicates
    pub similarity_threshold: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: 80,
            reject_generic_types: true,
            enable_deduplication: true,
            similarity_threshold: 0.85,
        }
    }
}

/// Consolidates entities from the NER baseline and LLM enrichment.
pub struct EntityConsolidator {
    config: ConsolidationConfig,
    embedding_service: Option<Arc<dyn EmbeddingService>>,
}

impl EntityConsolidator {
    pub fn new(
        config: ConsolidationConfig,
        embedding_service: Option<Arc<dyn EmbeddingService>>,
    ) -> Self {
        Self {
            config,
            embedding_service,
        }
    }

    /// Consolidate NER (trusted) and LLM (less trusted) entities.
    pub async fn consolidate(
        &self,
        ner_entities: Vec<Entity>,
        llm_entities: Vec<Entity>,
    ) -> (Vec<Entity>, ConsolidationStats) {
        let mut stats = ConsolidationStats {
            ner_input: ner_entities.len(),
            llm_input: llm_entities.len(),
            total_input: ner_entities.len() + llm_entities.len(),
            ..Default::default()
        };

        // Type and length filtering applies to both sources; a NER label
        // that fell into a generic bucket is dropped here too.
        let filtered_ner = self.filter_entities(ner_entities, "ner", &mut stats);
        let filtered_llm = self.filter_entities(llm_entities, "llm", &mut stats);

        let consolidated = if self.config.enable_deduplication {
            self.deduplicate(filtered_ner, filtered_llm, &mut stats).await
        } else {
            let mut all = filtered_ner;
            all.extend(filtered_llm);
            all
        };

        stats.total_output = consolidated.len();

        info!(
            ner_input = stats.ner_input,
            llm_input = stats.llm_input,
            filtered_by_type = stats.filtered_by_type,
            filtered_by_length = stats.filtered_by_length,
            filtered_by_duplicate = stats.filtered_by_duplicate,
            total_output = stats.total_output,
            filter_rate = format!("{:.1}%", stats.filter_rate()),
            "entity_consolidation_complete"
        );

        (consolidated, stats)
    }

    fn filter_entities(
        &self,
        entities: Vec<Entity>,
        source: &str,
        stats: &mut ConsolidationStats,
    ) -> Vec<Entity> {
        let mut filtered = Vec::with_capacity(entities.len());

        for entity in entities {
            let name = entity.name.trim();
            let etype = entity.entity_type.to_uppercase();

            if self.config.reject_generic_types && INVALID_ENTITY_TYPES.contains(&etype.as_str()) {
                debug!(name = %truncate(name, 50), r#type = %etype, source, "entity_filtered_invalid_type");
                stats.filtered_by_type += 1;
                continue;
            }

            if name.len() < self.config.min_length {
                stats.filtered_by_length += 1;
                continue;
            }
            if name.len() > self.config.max_length {
                debug!(
                    name = %truncate(name, 50),
                    length = name.len(),
                    source,
                    "entity_filtered_too_long"
                );
                stats.filtered_by_length += 1;
                continue;
            }

            filtered.push(entity);
        }

        filtered
    }

    /// NER-first dedup: every NER entity is kept; an LLM entity is dropped
    /// on an exact lower-cased name match or (when an embedding service is
    /// wired in) a cosine similarity at or above the threshold.
    async fn deduplicate(
        &self,
        ner_entities: Vec<Entity>,
        llm_entities: Vec<Entity>,
        stats: &mut ConsolidationStats,
    ) -> Vec<Entity> {
        let mut existing_names: HashSet<String> =
            ner_entities.iter().map(|e| e.dedup_key()).collect();
        let mut result = ner_entities;

        for llm_entity in llm_entities {
            let key = llm_entity.dedup_key();

            if existing_names.contains(&key) {
                debug!(name = %llm_entity.name, "entity_filtered_exact_duplicate");
                stats.filtered_by_duplicate += 1;
                continue;
            }

            if self.embedding_service.is_some() && self.config.similarity_threshold < 1.0 {
                match self.is_semantic_duplicate(&llm_entity.name, &existing_names).await {
                    Ok(true) => {
                        debug!(name = %llm_entity.name, "entity_filtered_semantic_duplicate");
                        stats.filtered_by_duplicate += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        debug!(name = %llm_entity.name, error = %e, "semantic_duplicate_check_failed");
                    }
                }
            }

            existing_names.insert(key);
            result.push(llm_entity);
        }

        result
    }

    async fn is_semantic_duplicate(
        &self,
        name: &str,
        existing_names: &HashSet<String>,
    ) -> ExtractResult<bool> {
        let Some(service) = &self.embedding_service else {
            return Ok(false);
        };
        if existing_names.is_empty() {
            return Ok(false);
        }

        let name_embedding = service.embed(name).await?;
        for existing in existing_names {
            let existing_embedding = service.embed(existing).await?;
            let similarity = cosine_similarity(&name_embedding, &existing_embedding);
            if similarity >= self.config.similarity_threshold {
                debug!(
                    name,
                    existing = existing.as_str(),
                    similarity = format!("{:.3}", similarity),
                    "semantic_duplicate_found"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Default for EntityConsolidator {
    fn default() -> Self {
        Self::new(ConsolidationConfig::default(), None)
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExtractError;
    use async_trait::async_trait;

    fn entity(name: &str, etype: &str) -> Entity {
        Entity::new(name, etype)
    }

    #[tokio::test]
    async fn test_generic_types_rejected_from_both_sources() {
        let consolidator = EntityConsolidator::default();
        let ner = vec![entity("Something", "ENTITY"), entity("Paris", "LOCATION")];
        let llm = vec![entity("Misc thing", "MISC"), entity("Rust", "TECHNOLOGY")];
        let (kept, stats) = consolidator.consolidate(ner, llm).await;

        assert_eq!(kept.len(), 2);
        assert_eq!(stats.filtered_by_type, 2);
        assert!(kept.iter().all(|e| !["ENTITY", "MISC", "UNKNOWN"].contains(&e.entity_type.as_str())));
    }

    #[tokio::test]
    async fn test_length_bounds() {
        let consolidator = EntityConsolidator::default();
        let long_name = "a".repeat(100);
        let ner = vec![entity("x", "CONCEPT")];
        let llm = vec![entity(&long_name, "CONCEPT"), entity("ok name", "CONCEPT")];
        let (kept, stats) = consolidator.consolidate(ner, llm).await;

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "ok name");
        assert_eq!(stats.filtered_by_length, 2);
    }

    #[tokio::test]
    async fn test_ner_entities_always_survive_dedup() {
        let consolidator = EntityConsolidator::default();
        let ner = vec![entity("Microsoft", "ORGANIZATION")];
        let llm = vec![entity("microsoft", "TECHNOLOGY"), entity("Azure", "PRODUCT")];
        let (kept, stats) = consolidator.consolidate(ner, llm).await;

        assert_eq!(kept.len(), 2);
        // The NER version wins and keeps its type
        assert!(kept.iter().any(|e| e.name == "Microsoft" && e.entity_type == "ORGANIZATION"));
        assert!(kept.iter().any(|e| e.name == "Azure"));
        assert_eq!(stats.filtered_by_duplicate, 1);
    }

    #[tokio::test]
    async fn test_no_duplicate_lowercased_names_in_output() {
        let consolidator = EntityConsolidator::default();
        let ner = vec![entity("GitHub", "ORGANIZATION")];
        let llm = vec![
            entity("GITHUB", "TECHNOLOGY"),
            entity("github", "PRODUCT"),
            entity("Copilot", "PRODUCT"),
        ];
        let (kept, _) = consolidator.consolidate(ner, llm).await;

        let mut seen = HashSet::new();
        for e in &kept {
            assert!(seen.insert(e.dedup_key()), "duplicate name {}", e.name);
        }
        assert_eq!(kept.len(), 2);
    }

    struct NearDuplicateEmbedder;

    #[async_trait]
    impl EmbeddingService for NearDuplicateEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ExtractError> {
            // "ML" and "machine learning" collide; everything else is
            // orthogonal to them
            if text.to_lowercase().contains("machine learning") || text == "ML" {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    #[tokio::test]
    async fn test_semantic_dedup_with_embedding_service() {
        let consolidator = EntityConsolidator::new(
            ConsolidationConfig::default(),
            Some(Arc::new(NearDuplicateEmbedder)),
        );
        let ner = vec![entity("machine learning", "CONCEPT")];
        let llm = vec![entity("ML", "CONCEPT"), entity("Rust", "TECHNOLOGY")];
        let (kept, stats) = consolidator.consolidate(ner, llm).await;

        assert_eq!(kept.len(), 2);
        assert!(kept.iter().any(|e| e.name == "Rust"));
        assert!(!kept.iter().any(|e| e.name == "ML"));
        assert_eq!(stats.filtered_by_duplicate, 1);
    }

    #[tokio::test]
    async fn test_dedup_disabled_keeps_everything_filtered() {
        let consolidator = EntityConsolidator::new(
            ConsolidationConfig {
                enable_deduplication: false,
                ..Default::default()
            },
            None,
        );
        let ner = vec![entity("Same", "CONCEPT")];
        let llm = vec![entity("same", "CONCEPT")];
        let (kept, _) = consolidator.consolidate(ner, llm).await;
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn test_stats_filter_rate() {
        let consolidator = EntityConsolidator::default();
        let (_, stats) = consolidator
            .consolidate(vec![entity("Keep", "CONCEPT")], vec![entity("x", "CONCEPT")])
            .await;
        assert!((stats.filter_rate() - 50.0).abs() < 1e-9);
    }
}
