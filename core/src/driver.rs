//! Extraction driver: the NER-first pipeline and the legacy cascade
//!
//! The default flow runs the three-stage pipeline (NER baseline, mandatory
//! LLM entity enrichment, windowed LLM relation extraction) with entity
//! consolidation between stages 2 and 3. The legacy cascade tries each rank
//! in order for entities and relations independently, logging a
//! `cascade_fallback` event on every rank transition and propagating the
//! last error when the final rank fails.

use crate::config::{ExtractionConfig, ExtractionMethod};
use crate::consolidate::{ConsolidationConfig, EntityConsolidator};
use crate::cost::CostLedger;
use crate::errors::{ExtractError, ExtractResult};
use crate::gleaning::{dedup_relations, GleaningController};
use crate::hygiene::{self, KgHygieneService};
use crate::ner::NerRegistry;
use crate::parser::{parse_json_response, ParseKind};
use crate::preprocess::{
    coref::CoreferenceResolver, detect_language, windows::window_texts, windows::WindowConfig,
};
use crate::prompts::{fill, PromptResolver, ENTITY_ENRICHMENT_PROMPT, RELATION_FROM_ENTITIES_PROMPT};
use crate::quality::EntityQualityFilter;
use crate::registry::{ModelRegistry, ModelUseCase};
use crate::stage::{
    cap_results, retry_async, with_timeout, RetryPolicy, MAX_ENTITIES_PER_CHUNK,
    MAX_RELATIONS_PER_CHUNK,
};
use crate::traits::{
    Complexity, DomainRepository, EmbeddingService, LlmGateway, LlmTask, Quality, TaskKind,
};
use crate::types::{
    validate_entity_type, validate_relation_type, Entity, ExtractionOutput, Relation,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Build an entity from a parsed object; objects without a usable name are
/// dropped. The raw type is preserved so the consolidator can reject
/// generic buckets before final validation.
pub(crate) fn entity_from_map(
    obj: &Map<String, Value>,
    document_id: Option<&str>,
    origin: &str,
) -> Option<Entity> {
    let name = obj.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let raw_type = obj
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .trim()
        .to_uppercase();
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let mut entity = Entity::new(name, raw_type)
        .with_description(description)
        .with_property("origin_stage", serde_json::json!(origin));
    if let Some(doc) = document_id {
        entity = entity.with_source_document(doc);
    }
    if let Some(confidence) = obj.get("confidence").and_then(Value::as_f64) {
        entity = entity.with_confidence(confidence);
    }
    Some(entity)
}

/// Build a relation from a parsed (already canonical-shaped) object.
pub(crate) fn relation_from_map(
    obj: &Map<String, Value>,
    document_id: Option<&str>,
) -> Option<Relation> {
    let source = obj.get("source")?.as_str()?.trim();
    let target = obj.get("target")?.as_str()?.trim();
    if source.is_empty() || target.is_empty() {
        return None;
    }
    let raw_type = obj
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("RELATED_TO")
        .trim()
        .to_uppercase();
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let evidence = obj
        .get("evidence_span")
        .or_else(|| obj.get("evidence"))
        .and_then(Value::as_str)
        .unwrap_or(&description)
        .to_string();

    let mut relation = Relation::new(source, target, raw_type)
        .with_description(description)
        .with_evidence(evidence);
    if let Some(doc) = document_id {
        relation = relation.with_source_document(doc);
    }
    if let Some(strength) = obj.get("strength").and_then(Value::as_u64) {
        relation = relation.with_strength(strength.min(10) as u8);
    }
    if let Some(confidence) = obj.get("confidence").and_then(Value::as_f64) {
        relation.confidence = confidence.clamp(0.0, 1.0);
    }
    Some(relation)
}

/// Result of a batch extraction
#[derive(Debug, Default)]
pub struct BatchResult {
    pub total_documents: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub outputs: Vec<(String, ExtractResult<ExtractionOutput>)>,
}

/// Entity and relationship extraction service.
pub struct ExtractionService {
    config: ExtractionConfig,
    gateway: Arc<dyn LlmGateway>,
    model_registry: Arc<ModelRegistry>,
    ner: Arc<NerRegistry>,
    prompt_resolver: PromptResolver,
    consolidator: EntityConsolidator,
    quality_filter: EntityQualityFilter,
    cost_ledger: Option<Arc<CostLedger>>,
    semaphore: Arc<Semaphore>,
}

impl ExtractionService {
    pub fn new(
        config: ExtractionConfig,
        gateway: Arc<dyn LlmGateway>,
        model_registry: Arc<ModelRegistry>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_documents));
        let prompt_resolver = PromptResolver::new(config.use_dspy_prompts, None);
        Self {
            config,
            gateway,
            model_registry,
            ner: Arc::new(NerRegistry::new()),
            prompt_resolver,
            consolidator: EntityConsolidator::default(),
            quality_filter: EntityQualityFilter::default(),
            cost_ledger: None,
            semaphore,
        }
    }

    /// Wire in a domain repository for trained prompt lookup
    pub fn with_domain_repository(mut self, repository: Arc<dyn DomainRepository>) -> Self {
        self.prompt_resolver = PromptResolver::new(self.config.use_dspy_prompts, Some(repository));
        self
    }

    /// Wire in an embedding service for semantic entity deduplication
    pub fn with_embedding_service(mut self, service: Arc<dyn EmbeddingService>) -> Self {
        self.consolidator = EntityConsolidator::new(ConsolidationConfig::default(), Some(service));
        self
    }

    /// Wire in a cost ledger for usage accounting
    pub fn with_cost_ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.cost_ledger = Some(ledger);
        self
    }

    fn gleaning_controller(&self) -> GleaningController {
        GleaningController::new(
            Arc::clone(&self.gateway),
            self.config.cascade[0].clone(),
            self.config.max_tokens,
            self.config.temperature,
        )
    }

    /// Resolve pronouns before extraction; returns the (possibly rewritten)
    /// text and the resolution count. Never fails.
    fn apply_coreference(&self, text: &str) -> (String, usize) {
        if !self.config.use_coreference {
            return (text.to_string(), 0);
        }
        let lang = detect_language(text);
        let resolver = CoreferenceResolver::new(&self.ner, lang);
        let result = resolver.resolve(text);
        if result.resolution_count > 0 {
            info!(
                resolutions = result.resolution_count,
                lang, "coreference_preprocessing_applied"
            );
        }
        (result.resolved_text, result.resolution_count)
    }

    /// Stage 1: deterministic NER baseline plus the quality filter.
    fn ner_baseline(&self, text: &str, document_id: Option<&str>) -> Vec<Entity> {
        let lang = detect_language(text);
        let entities = crate::ner::extract_entities(&self.ner, text, lang, document_id);
        if self.config.use_entity_filter {
            let (filtered, _stats) = self.quality_filter.filter(entities, lang);
            filtered
        } else {
            entities
        }
    }

    /// One retried, deadline-bounded gateway call parsed as `kind`.
    #[allow(clippy::too_many_arguments)]
    async fn call_extraction(
        &self,
        prompt: String,
        kind: ParseKind,
        model: Option<String>,
        use_case: ModelUseCase,
        timeout_s: u64,
        policy: RetryPolicy,
        complexity: Complexity,
        quality: Quality,
        max_tokens: u32,
    ) -> ExtractResult<Vec<Map<String, Value>>> {
        let model = match model {
            Some(m) => m,
            None => self.model_registry.model_for(use_case).await,
        };

        let gateway = Arc::clone(&self.gateway);
        let ledger = self.cost_ledger.clone();
        let temperature = self.config.temperature;

        retry_async(policy, move || {
            let gateway = Arc::clone(&gateway);
            let ledger = ledger.clone();
            let prompt = prompt.clone();
            let model = model.clone();
            async move {
                with_timeout(timeout_s, async move {
                    let task = LlmTask {
                        task_kind: TaskKind::Extraction,
                        prompt,
                        system_prompt: None,
                        complexity,
                        quality,
                        max_tokens,
                        temperature,
                        model_override: Some(model),
                    };
                    let result = gateway.generate(task).await?;
                    if let Some(ledger) = &ledger {
                        ledger.record(TaskKind::Extraction, &result);
                    }
                    parse_json_response(&result.content, kind)
                })
                .await
            }
        })
        .await
    }

    fn format_entity_list(entities: &[Entity]) -> String {
        entities
            .iter()
            .map(|e| format!("- {} ({})", e.name, e.entity_type))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_entity_list_with_descriptions(entities: &[Entity]) -> String {
        entities
            .iter()
            .map(|e| {
                let desc = if e.description.is_empty() {
                    "No description"
                } else {
                    e.description.as_str()
                };
                format!("- {} ({}): {}", e.name, e.entity_type, desc)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn truncate_chars(text: &str, max: usize) -> String {
        text.chars().take(max).collect()
    }

    // ------------------------------------------------------------------
    // NER-first pipeline (default)
    // ------------------------------------------------------------------

    /// Run the three-stage pipeline: NER baseline, LLM entity enrichment,
    /// consolidation, windowed LLM relation extraction.
    pub async fn extract_with_pipeline(
        &self,
        text: &str,
        document_id: Option<&str>,
        domain: Option<&str>,
    ) -> ExtractResult<ExtractionOutput> {
        let stages = &self.config.pipeline;
        info!(
            document_id = document_id.unwrap_or("unknown"),
            text_length = text.len(),
            stages = stages.len(),
            "pipeline_started"
        );

        // Stage 1: NER baseline, with LLM fallback when empty
        let mut ner_entities = self.ner_baseline(text, document_id);
        if ner_entities.is_empty() && stages[0].fallback_to_llm {
            info!(document_id = document_id.unwrap_or("unknown"), "ner_empty_falling_back_to_llm");
            ner_entities = self.llm_entity_fallback(text, document_id, domain).await;
        }
        info!(entities_found = ner_entities.len(), "pipeline_stage1_complete");

        // Stage 2: mandatory LLM entity enrichment
        let enriched = self
            .enrich_entities(text, &ner_entities, document_id, domain)
            .await;
        info!(enriched_entities = enriched.len(), "pipeline_stage2_complete");

        // Consolidation before relation extraction
        let (all_entities, _stats) = self.consolidator.consolidate(ner_entities, enriched).await;

        // Stage 3: windowed relation extraction over the consolidated list
        let relations = self
            .pipeline_relations(text, &all_entities, document_id)
            .await;
        info!(
            total_entities = all_entities.len(),
            total_relations = relations.len(),
            "pipeline_complete"
        );

        Ok(ExtractionOutput {
            entities: all_entities,
            relations,
        })
    }

    /// LLM entity extraction used when the NER stage produced nothing.
    async fn llm_entity_fallback(
        &self,
        text: &str,
        document_id: Option<&str>,
        domain: Option<&str>,
    ) -> Vec<Entity> {
        let pair = self.prompt_resolver.resolve(domain).await;
        let prompt = fill(
            &pair.entity_prompt,
            &[
                ("text", Self::truncate_chars(text, 8000).as_str()),
                ("domain", domain.unwrap_or("general")),
            ],
        );

        let result = self
            .call_extraction(
                prompt,
                ParseKind::Entity,
                self.config.pipeline[1].model.clone(),
                ModelUseCase::EntityExtraction,
                120,
                RetryPolicy {
                    max_attempts: 1,
                    backoff_multiplier: 1,
                },
                Complexity::Medium,
                Quality::Balanced,
                2000,
            )
            .await;

        match result {
            Ok(items) => items
                .iter()
                .filter_map(|obj| entity_from_map(obj, document_id, "llm_fallback"))
                .collect(),
            Err(e) => {
                warn!(error = %e, "llm_entity_fallback_failed");
                Vec::new()
            }
        }
    }

    /// Stage 2: ask for entity kinds the baseline cannot detect and
    /// post-filter anything duplicating a baseline name.
    async fn enrich_entities(
        &self,
        text: &str,
        ner_entities: &[Entity],
        document_id: Option<&str>,
        _domain: Option<&str>,
    ) -> Vec<Entity> {
        let stage = &self.config.pipeline[1];

        let baseline = if ner_entities.is_empty() {
            "None found".to_string()
        } else {
            ner_entities
                .iter()
                .map(|e| format!("{} ({})", e.name, e.entity_type))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let prompt = fill(
            ENTITY_ENRICHMENT_PROMPT,
            &[
                ("entities", baseline.as_str()),
                ("text", Self::truncate_chars(text, 8000).as_str()),
            ],
        );

        let result = self
            .call_extraction(
                prompt,
                ParseKind::Entity,
                stage.model.clone(),
                ModelUseCase::EntityExtraction,
                stage.timeout_s,
                RetryPolicy::from(stage),
                Complexity::Medium,
                Quality::Medium,
                2000,
            )
            .await;

        let enriched: Vec<Entity> = match result {
            Ok(items) => items
                .iter()
                .filter_map(|obj| entity_from_map(obj, document_id, "llm_enrichment"))
                .collect(),
            Err(e) => {
                // Enrichment is best-effort; the baseline carries the chunk
                warn!(error = %e, "entity_enrichment_failed");
                return Vec::new();
            }
        };

        let baseline_names: HashSet<String> =
            ner_entities.iter().map(|e| e.dedup_key()).collect();
        let before = enriched.len();
        let new_entities: Vec<Entity> = enriched
            .into_iter()
            .filter(|e| !baseline_names.contains(&e.dedup_key()))
            .collect();
        debug!(
            new_entities = new_entities.len(),
            filtered_duplicates = before - new_entities.len(),
            "stage2_entities_filtered"
        );
        new_entities
    }

    /// Stage 3: relation extraction per window, merged by triple dedup.
    async fn pipeline_relations(
        &self,
        text: &str,
        entities: &[Entity],
        document_id: Option<&str>,
    ) -> Vec<Relation> {
        if entities.is_empty() {
            warn!("no_entities_for_relation_extraction");
            return Vec::new();
        }

        let stage = &self.config.pipeline[2];
        let entities_str = Self::format_entity_list_with_descriptions(entities);
        let known_names: HashSet<String> = entities.iter().map(|e| e.dedup_key()).collect();

        let windows = window_texts(text, self.config.use_cross_sentence, WindowConfig::default());
        let mut seen_triples: HashSet<(String, String, String)> = HashSet::new();
        let mut all_relations: Vec<Relation> = Vec::new();

        for (i, window) in windows.iter().enumerate() {
            let prompt = fill(
                RELATION_FROM_ENTITIES_PROMPT,
                &[
                    ("entities", entities_str.as_str()),
                    ("text", Self::truncate_chars(window, 8000).as_str()),
                ],
            );

            let result = self
                .call_extraction(
                    prompt,
                    ParseKind::Relationship,
                    stage.model.clone(),
                    ModelUseCase::RelationExtraction,
                    stage.timeout_s,
                    RetryPolicy::from(stage),
                    Complexity::High,
                    Quality::High,
                    4000,
                )
                .await;

            match result {
                Ok(items) => {
                    for obj in &items {
                        let Some(relation) = relation_from_map(obj, document_id) else {
                            continue;
                        };
                        if !known_names.contains(&relation.source.trim().to_lowercase())
                            || !known_names.contains(&relation.target.trim().to_lowercase())
                        {
                            warn!(
                                source = %relation.source,
                                target = %relation.target,
                                "relation_skipped_unknown_entity"
                            );
                            continue;
                        }
                        if seen_triples.insert(relation.triple_key()) {
                            all_relations.push(relation);
                        }
                    }
                }
                Err(e) => {
                    warn!(window_index = i, error = %e, "window_relation_extraction_failed");
                }
            }
        }

        cap_results(all_relations, MAX_RELATIONS_PER_CHUNK, "relations")
    }

    // ------------------------------------------------------------------
    // Legacy three-rank cascade
    // ------------------------------------------------------------------

    /// Extract entities via the cascade: try each rank in order, logging a
    /// fallback event between ranks; the last error propagates.
    pub async fn extract_entities_cascade(
        &self,
        text: &str,
        document_id: Option<&str>,
        domain: Option<&str>,
    ) -> ExtractResult<Vec<Entity>> {
        let pair = self.prompt_resolver.resolve(domain).await;
        let cascade = &self.config.cascade;
        let mut last_error: Option<ExtractError> = None;

        for (idx, rank) in cascade.iter().enumerate() {
            info!(
                rank = rank.rank,
                model = %rank.model,
                method = %rank.method,
                "trying_cascade_rank"
            );

            let attempt: ExtractResult<Vec<Entity>> = match rank.method {
                ExtractionMethod::HybridNerLlm | ExtractionMethod::SpacyNerOnly => {
                    Ok(self.ner_baseline(text, document_id))
                }
                _ => {
                    let prompt = fill(
                        &pair.entity_prompt,
                        &[("text", text), ("domain", domain.unwrap_or("technical"))],
                    );
                    self.call_extraction(
                        prompt,
                        ParseKind::Entity,
                        Some(rank.model.clone()),
                        ModelUseCase::EntityExtraction,
                        rank.entity_timeout_s,
                        RetryPolicy::from(rank),
                        Complexity::High,
                        Quality::High,
                        self.config.max_tokens,
                    )
                    .await
                    .map(|items| {
                        let entities: Vec<Entity> = items
                            .iter()
                            .filter_map(|obj| entity_from_map(obj, document_id, "llm_cascade"))
                            .collect();
                        cap_results(entities, MAX_ENTITIES_PER_CHUNK, "entities")
                    })
                }
            };

            match attempt {
                Ok(entities) => {
                    info!(rank = rank.rank, entity_count = entities.len(), "cascade_rank_success");
                    return Ok(entities);
                }
                Err(e) => {
                    // Cancellation aborts the cascade, not just the rank
                    if matches!(e, ExtractError::Cancelled(_)) {
                        return Err(e);
                    }
                    if idx + 1 < cascade.len() {
                        warn!(
                            from_rank = rank.rank,
                            to_rank = cascade[idx + 1].rank,
                            reason = e.kind(),
                            document_id = document_id.unwrap_or(""),
                            "cascade_fallback"
                        );
                    } else {
                        warn!(document_id = document_id.unwrap_or(""), error = %e, "all_cascade_ranks_failed");
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExtractError::Internal("empty cascade".into())))
    }

    async fn relations_with_rank(
        &self,
        text: &str,
        entities_str: &str,
        known_names: &HashSet<String>,
        relation_prompt: &str,
        rank: &crate::config::CascadeRankConfig,
        document_id: Option<&str>,
    ) -> ExtractResult<Vec<Relation>> {
        let prompt = fill(
            relation_prompt,
            &[("entities", entities_str), ("text", text)],
        );

        let items = self
            .call_extraction(
                prompt,
                ParseKind::Relationship,
                Some(rank.model.clone()),
                ModelUseCase::RelationExtraction,
                rank.relation_timeout_s,
                RetryPolicy::from(rank),
                Complexity::High,
                Quality::High,
                self.config.max_tokens,
            )
            .await?;

        let relations: Vec<Relation> = items
            .iter()
            .filter_map(|obj| relation_from_map(obj, document_id))
            .filter(|r| {
                known_names.contains(&r.source.trim().to_lowercase())
                    && known_names.contains(&r.target.trim().to_lowercase())
            })
            .collect();

        Ok(cap_results(relations, MAX_RELATIONS_PER_CHUNK, "relations"))
    }

    /// Extract relations via the cascade, windowed for long texts.
    pub async fn extract_relations_cascade(
        &self,
        text: &str,
        entities: &[Entity],
        document_id: Option<&str>,
        domain: Option<&str>,
    ) -> ExtractResult<Vec<Relation>> {
        if entities.is_empty() {
            warn!("no_entities_for_relationship_extraction");
            return Ok(Vec::new());
        }

        let pair = self.prompt_resolver.resolve(domain).await;
        let entities_str = Self::format_entity_list(entities);
        let known_names: HashSet<String> = entities.iter().map(|e| e.dedup_key()).collect();

        let windows = window_texts(text, self.config.use_cross_sentence, WindowConfig::default());
        if windows.len() > 1 {
            // Windowed extraction drives the first rank; failed windows are
            // skipped rather than cascaded
            let rank = &self.config.cascade[0];
            let mut seen: HashSet<(String, String, String)> = HashSet::new();
            let mut merged: Vec<Relation> = Vec::new();

            for (i, window) in windows.iter().enumerate() {
                match self
                    .relations_with_rank(
                        window,
                        &entities_str,
                        &known_names,
                        &pair.relation_prompt,
                        rank,
                        document_id,
                    )
                    .await
                {
                    Ok(relations) => {
                        for relation in relations {
                            if seen.insert(relation.triple_key()) {
                                merged.push(relation);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(window_index = i, error = %e, "cross_sentence_window_extraction_failed");
                    }
                }
            }
            return Ok(merged);
        }

        let cascade = &self.config.cascade;
        let mut last_error: Option<ExtractError> = None;
        for (idx, rank) in cascade.iter().enumerate() {
            match self
                .relations_with_rank(
                    text,
                    &entities_str,
                    &known_names,
                    &pair.relation_prompt,
                    rank,
                    document_id,
                )
                .await
            {
                Ok(relations) => {
                    info!(rank = rank.rank, relation_count = relations.len(), "cascade_rank_success");
                    return Ok(relations);
                }
                Err(e) => {
                    if matches!(e, ExtractError::Cancelled(_)) {
                        return Err(e);
                    }
                    if idx + 1 < cascade.len() {
                        warn!(
                            from_rank = rank.rank,
                            to_rank = cascade[idx + 1].rank,
                            reason = e.kind(),
                            document_id = document_id.unwrap_or(""),
                            "cascade_fallback"
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExtractError::Internal("empty cascade".into())))
    }

    // ------------------------------------------------------------------
    // Public entry points
    // ------------------------------------------------------------------

    /// Extract entities from one text with coreference preprocessing and
    /// optional gleaning. Gleaning drives the first cascade rank.
    pub async fn extract_entities(
        &self,
        text: &str,
        document_id: Option<&str>,
        domain: Option<&str>,
    ) -> ExtractResult<Vec<Entity>> {
        let (text, _resolutions) = self.apply_coreference(text);

        if self.config.gleaning_steps > 0 {
            let initial = self
                .extract_entities_cascade(&text, document_id, domain)
                .await?;
            let controller = self.gleaning_controller();
            return Ok(controller
                .glean_entities(&text, initial, document_id, self.config.gleaning_steps)
                .await);
        }

        self.extract_entities_cascade(&text, document_id, domain).await
    }

    /// Extract relations between known entities, with coreference
    /// preprocessing and optional gleaning.
    pub async fn extract_relations(
        &self,
        text: &str,
        entities: &[Entity],
        document_id: Option<&str>,
        domain: Option<&str>,
    ) -> ExtractResult<Vec<Relation>> {
        let (text, _resolutions) = self.apply_coreference(text);

        let initial = self
            .extract_relations_cascade(&text, entities, document_id, domain)
            .await?;

        if self.config.gleaning_steps > 0 {
            let controller = self.gleaning_controller();
            return Ok(controller
                .glean_relations(&text, entities, initial, document_id, self.config.gleaning_steps)
                .await);
        }

        Ok(initial)
    }

    /// Full extraction for one document: pipeline or cascade per the
    /// feature flag, then gleaning, hygiene and final type validation.
    pub async fn extract_document(
        &self,
        text: &str,
        document_id: &str,
        domain: Option<&str>,
    ) -> ExtractResult<ExtractionOutput> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ExtractError::Cancelled("service shutting down".into()))?;

        let (resolved_text, resolutions) = self.apply_coreference(text);
        debug!(document_id, resolutions, "document_preprocessed");

        let mut output = if self.config.use_spacy_first_pipeline {
            self.extract_with_pipeline(&resolved_text, Some(document_id), domain)
                .await?
        } else {
            let entities = self
                .extract_entities_cascade(&resolved_text, Some(document_id), domain)
                .await?;
            let relations = self
                .extract_relations_cascade(&resolved_text, &entities, Some(document_id), domain)
                .await?;
            ExtractionOutput { entities, relations }
        };

        if self.config.gleaning_steps > 0 {
            let controller = self.gleaning_controller();
            output.entities = controller
                .glean_entities(
                    &resolved_text,
                    output.entities,
                    Some(document_id),
                    self.config.gleaning_steps,
                )
                .await;
            output.relations = controller
                .glean_relations(
                    &resolved_text,
                    &output.entities,
                    output.relations,
                    Some(document_id),
                    self.config.gleaning_steps,
                )
                .await;
        }

        Ok(self.finalize(output, document_id))
    }

    /// Hygiene pass and final type validation for a finished extraction.
    fn finalize(&self, output: ExtractionOutput, document_id: &str) -> ExtractionOutput {
        let report = hygiene::analyze(&output.entities, &output.relations);
        debug!(
            document_id,
            health_score = format!("{:.1}", report.health_score()),
            "hygiene_report"
        );

        let (relations, removed) = KgHygieneService::remove_self_loops(output.relations);
        if removed > 0 {
            info!(document_id, self_loops_removed = removed, "self_loops_removed_from_output");
        }

        let mut entities = output.entities;
        for entity in entities.iter_mut() {
            entity.entity_type = validate_entity_type(&entity.entity_type).to_string();
        }

        let known_names: HashSet<String> = entities.iter().map(|e| e.dedup_key()).collect();
        let mut relations: Vec<Relation> = relations
            .into_iter()
            .filter(|r| {
                let ok = known_names.contains(&r.source.trim().to_lowercase())
                    && known_names.contains(&r.target.trim().to_lowercase());
                if !ok {
                    warn!(source = %r.source, target = %r.target, "orphan_relation_dropped");
                }
                ok
            })
            .collect();
        for relation in relations.iter_mut() {
            relation.relation_type = validate_relation_type(&relation.relation_type).to_string();
        }

        ExtractionOutput {
            entities,
            relations: dedup_relations(relations),
        }
    }

    /// Batch extraction over multiple documents; per-document failures are
    /// recorded, not fatal.
    pub async fn extract_batch(&self, documents: Vec<(String, String)>) -> BatchResult {
        let total = documents.len();
        info!(document_count = total, "batch_extraction_started");

        let mut result = BatchResult {
            total_documents: total,
            ..Default::default()
        };

        for (document_id, text) in documents {
            let extraction = self.extract_document(&text, &document_id, None).await;
            match &extraction {
                Ok(output) => {
                    result.success_count += 1;
                    debug!(
                        document_id = %document_id,
                        entities = output.entities.len(),
                        relations = output.relations.len(),
                        "batch_document_complete"
                    );
                }
                Err(e) => {
                    result.failed_count += 1;
                    warn!(document_id = %document_id, error = %e, "batch_document_failed");
                }
            }
            result.outputs.push((document_id, extraction));
        }

        info!(
            documents = total,
            success = result.success_count,
            failed = result.failed_count,
            "batch_extraction_complete"
        );

        result
    }
}
