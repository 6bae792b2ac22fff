//! Gleaning: multi-pass "is this complete?" extraction
//!
//! After the initial extraction round, a completeness probe asks the model
//! for a strict YES/NO; while incomplete (and rounds remain), a
//! continuation prompt extracts only the items not already listed. Both
//! entities and relations glean. The probe failing counts as incomplete.
//!
//! Gleaning always drives the first cascade rank, even when the legacy
//! cascade is enabled elsewhere.

use crate::config::CascadeRankConfig;
use crate::driver::{entity_from_map, relation_from_map};
use crate::errors::ExtractResult;
use crate::parser::{parse_json_response, ParseKind};
use crate::prompts::{
    fill, ENTITY_COMPLETENESS_PROMPT, ENTITY_CONTINUATION_PROMPT, RELATION_COMPLETENESS_PROMPT,
    RELATION_CONTINUATION_PROMPT,
};
use crate::stage::{retry_async, with_timeout, RetryPolicy};
use crate::traits::{Complexity, LlmGateway, LlmTask, Quality, TaskKind};
use crate::types::{Entity, Relation};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Multi-pass gleaning controller over one cascade rank.
pub struct GleaningController {
    gateway: Arc<dyn LlmGateway>,
    rank: CascadeRankConfig,
    max_tokens: u32,
    temperature: f32,
}

impl GleaningController {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        rank: CascadeRankConfig,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            gateway,
            rank,
            max_tokens,
            temperature,
        }
    }

    /// Completeness probe for entities. Returns true when extraction is
    /// complete; probe failures count as incomplete.
    async fn entity_extraction_complete(&self, text: &str, entities: &[Entity]) -> bool {
        let entity_list = entities
            .iter()
            .map(|e| format!("- {} ({})", e.name, e.entity_type))
            .collect::<Vec<_>>()
            .join("\n");

        let truncated: String = text.chars().take(2000).collect();
        let prompt = fill(
            ENTITY_COMPLETENESS_PROMPT,
            &[("entities", entity_list.as_str()), ("text", truncated.as_str())],
        );

        let task = LlmTask {
            task_kind: TaskKind::Extraction,
            prompt,
            system_prompt: None,
            complexity: Complexity::Low,
            quality: Quality::High,
            max_tokens: 10,
            temperature: 0.0,
            model_override: Some(self.rank.model.clone()),
        };

        match self.gateway.generate(task).await {
            Ok(result) => {
                let answer = result.content.trim().to_uppercase();
                let complete = !answer.contains("YES");
                info!(
                    entities_count = entities.len(),
                    complete, "gleaning_entity_completeness_check"
                );
                complete
            }
            Err(e) => {
                warn!(error = %e, "gleaning_completeness_check_failed_assuming_incomplete");
                false
            }
        }
    }

    /// Continuation extraction: only entities missing from the list so far.
    async fn extract_missing_entities(
        &self,
        text: &str,
        existing: &[Entity],
        document_id: Option<&str>,
    ) -> ExtractResult<Vec<Entity>> {
        let entity_list = existing
            .iter()
            .map(|e| format!("- {} ({}): {}", e.name, e.entity_type, e.description))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = fill(
            ENTITY_CONTINUATION_PROMPT,
            &[("entities", entity_list.as_str()), ("text", text)],
        );

        let policy = RetryPolicy::from(&self.rank);
        let timeout_s = self.rank.entity_timeout_s;
        let gateway = Arc::clone(&self.gateway);
        let model = self.rank.model.clone();
        let max_tokens = self.max_tokens;
        let temperature = self.temperature;

        let items = retry_async(policy, move || {
            let gateway = Arc::clone(&gateway);
            let prompt = prompt.clone();
            let model = model.clone();
            async move {
                with_timeout(timeout_s, async move {
                    let task = LlmTask {
                        task_kind: TaskKind::Extraction,
                        prompt,
                        system_prompt: None,
                        complexity: Complexity::High,
                        quality: Quality::High,
                        max_tokens,
                        temperature,
                        model_override: Some(model),
                    };
                    let result = gateway.generate(task).await?;
                    parse_json_response(&result.content, ParseKind::Entity)
                })
                .await
            }
        })
        .await?;

        Ok(items
            .iter()
            .filter_map(|obj| entity_from_map(obj, document_id, "gleaning"))
            .collect())
    }

    /// Entity gleaning over an initial extraction.
    ///
    /// Runs up to `steps` probe/continue rounds, then merges and
    /// deduplicates across all rounds.
    pub async fn glean_entities(
        &self,
        text: &str,
        initial: Vec<Entity>,
        document_id: Option<&str>,
        steps: u32,
    ) -> Vec<Entity> {
        let mut all_entities = initial;

        for round in 1..=steps {
            if self.entity_extraction_complete(text, &all_entities).await {
                info!(round, total_entities = all_entities.len(), "gleaning_complete_early");
                break;
            }

            match self.extract_missing_entities(text, &all_entities, document_id).await {
                Ok(new_entities) => {
                    info!(
                        round,
                        new_entities = new_entities.len(),
                        "gleaning_round_complete"
                    );
                    all_entities.extend(new_entities);
                }
                Err(e) => {
                    warn!(round, error = %e, "gleaning_round_failed");
                }
            }
        }

        merge_and_deduplicate_entities(all_entities)
    }

    /// Completeness probe for relations. Returns true when complete.
    async fn relation_extraction_complete(
        &self,
        text: &str,
        entities: &[Entity],
        relations: &[Relation],
    ) -> bool {
        let relation_list = if relations.is_empty() {
            "(no relationships extracted yet)".to_string()
        } else {
            relations
                .iter()
                .map(|r| format!("{} --[{}]--> {}", r.source, r.relation_type, r.target))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let entity_list = entities
            .iter()
            .map(|e| format!("- {} ({})", e.name, e.entity_type))
            .collect::<Vec<_>>()
            .join("\n");

        let truncated: String = text.chars().take(3000).collect();
        let prompt = fill(
            RELATION_COMPLETENESS_PROMPT,
            &[
                ("relations", relation_list.as_str()),
                ("entities", entity_list.as_str()),
                ("text", truncated.as_str()),
            ],
        );

        let task = LlmTask {
            task_kind: TaskKind::Generation,
            prompt,
            system_prompt: None,
            complexity: Complexity::Low,
            quality: Quality::Low,
            max_tokens: 10,
            temperature: 0.0,
            model_override: Some(self.rank.model.clone()),
        };

        match self.gateway.generate(task).await {
            Ok(result) => {
                let answer = result.content.trim().to_uppercase();
                !answer.starts_with("YES")
            }
            Err(e) => {
                warn!(error = %e, "relation_gleaning_completeness_check_failed");
                false
            }
        }
    }

    async fn extract_missing_relations(
        &self,
        text: &str,
        entities: &[Entity],
        existing: &[Relation],
        document_id: Option<&str>,
    ) -> ExtractResult<Vec<Relation>> {
        let relation_list = if existing.is_empty() {
            "(no relationships extracted yet)".to_string()
        } else {
            existing
                .iter()
                .map(|r| {
                    format!(
                        r#"{{"source": "{}", "target": "{}", "type": "{}"}}"#,
                        r.source, r.target, r.relation_type
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        let entity_list = entities
            .iter()
            .map(|e| format!("- {} ({})", e.name, e.entity_type))
            .collect::<Vec<_>>()
            .join("\n");

        let truncated: String = text.chars().take(3000).collect();
        let prompt = fill(
            RELATION_CONTINUATION_PROMPT,
            &[
                ("relations", relation_list.as_str()),
                ("entities", entity_list.as_str()),
                ("text", truncated.as_str()),
            ],
        );

        let task = LlmTask {
            task_kind: TaskKind::Extraction,
            prompt,
            system_prompt: None,
            complexity: Complexity::Medium,
            quality: Quality::High,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            model_override: Some(self.rank.model.clone()),
        };

        let result = self.gateway.generate(task).await?;
        let items = parse_json_response(&result.content, ParseKind::Relationship)?;

        let mut existing_triples: HashSet<(String, String, String)> =
            existing.iter().map(|r| r.triple_key()).collect();

        let mut new_relations = Vec::new();
        for obj in &items {
            if let Some(relation) = relation_from_map(obj, document_id) {
                let key = relation.triple_key();
                if existing_triples.insert(key) {
                    new_relations.push(relation);
                }
            }
        }

        Ok(new_relations)
    }

    /// Relation gleaning over an initial extraction.
    pub async fn glean_relations(
        &self,
        text: &str,
        entities: &[Entity],
        initial: Vec<Relation>,
        document_id: Option<&str>,
        steps: u32,
    ) -> Vec<Relation> {
        if entities.is_empty() {
            return initial;
        }

        let mut all_relations = initial;

        for round in 1..=steps {
            if self
                .relation_extraction_complete(text, entities, &all_relations)
                .await
            {
                info!(round, total_relations = all_relations.len(), "relation_gleaning_complete_early");
                break;
            }

            match self
                .extract_missing_relations(text, entities, &all_relations, document_id)
                .await
            {
                Ok(new_relations) if !new_relations.is_empty() => {
                    info!(round, new_relations = new_relations.len(), "relation_gleaning_round_complete");
                    all_relations.extend(new_relations);
                }
                Ok(_) => {
                    info!(round, "relation_gleaning_round_no_new");
                    break;
                }
                Err(e) => {
                    warn!(round, error = %e, "relation_gleaning_round_failed");
                    break;
                }
            }
        }

        dedup_relations(all_relations)
    }
}

/// Merge entities from multiple rounds.
///
/// Case-insensitive exact matches keep the higher-confidence entity;
/// substring containment keeps the longer, more specific name.
pub fn merge_and_deduplicate_entities(entities: Vec<Entity>) -> Vec<Entity> {
    if entities.is_empty() {
        return entities;
    }

    let total = entities.len();
    let mut unique: Vec<Entity> = Vec::new();
    let mut duplicate_count = 0usize;

    'outer: for entity in entities {
        let key = entity.dedup_key();

        for existing in unique.iter_mut() {
            let existing_key = existing.dedup_key();

            if key == existing_key {
                duplicate_count += 1;
                if entity.confidence > existing.confidence {
                    *existing = entity;
                }
                continue 'outer;
            }

            if key.contains(existing_key.as_str()) || existing_key.contains(key.as_str()) {
                duplicate_count += 1;
                if key.len() > existing_key.len() {
                    *existing = entity;
                }
                continue 'outer;
            }
        }

        unique.push(entity);
    }

    info!(
        total_entities = total,
        unique_entities = unique.len(),
        duplicates_removed = duplicate_count,
        "gleaning_deduplication_complete"
    );

    unique
}

/// Deduplicate relations by case-insensitive `(source, target, TYPE)`.
pub fn dedup_relations(relations: Vec<Relation>) -> Vec<Relation> {
    let mut seen: HashMap<(String, String, String), ()> = HashMap::new();
    relations
        .into_iter()
        .filter(|r| seen.insert(r.triple_key(), ()).is_none())
        .collect()
}
