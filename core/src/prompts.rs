//! Extraction, gleaning and research prompts, plus the prompt resolver
//!
//! Templates use `{text}`, `{entities}` and `{domain}` placeholders filled
//! by [`fill`]; an unused placeholder in a template is not an error.
//! The resolver picks the active (entity, relation) pair for a domain:
//! trained domain prompts win, then the DSPy-optimized universal pair
//! (default), then the legacy generic pair. Lookup failures fall through
//! silently.

use crate::traits::DomainRepository;
use tracing::{debug, warn};

/// DSPy-optimized entity extraction prompt (universal default).
pub const DSPY_ENTITY_PROMPT: &str = r#"You are a data annotator working with a structured knowledge-extraction pipeline.
Given a Document Text and a Domain label, identify all relevant named entities, classify each one with a type from the controlled list below, and give a brief description.

Procedure:
1. Read the entire text and the domain.
2. Think step by step about which entities belong in the output.
3. Output a single valid JSON array of objects with the keys:
   - "name" - the canonical entity string as it appears in the text (preserve case)
   - "type" - one of the allowed type tags below
   - "description" - a concise, one-sentence explanation of the entity's role

Allowed type tags:
PERSON, ORGANIZATION, LOCATION, TEMPORAL, QUANTITY, EVENT, DOCUMENT, CONCEPT,
TECHNOLOGY, PRODUCT, MODEL, ARCHITECTURE, PROCESS, LANGUAGE, REGULATION

If no entities match, output an empty JSON array: []

Formatting rules:
- Do not wrap the answer in markdown or code fences.
- The JSON array must be syntactically correct; no trailing commas.
- Do not add extra keys or explanatory text.

Text: {text}
Domain: {domain}

Entities (JSON array only):"#;

/// DSPy-optimized relation extraction prompt (universal default).
pub const DSPY_RELATION_PROMPT: &str = r#"Extract ALL relationships between entities from the text.

---Role---
You are a Knowledge Graph Specialist extracting Subject-Predicate-Object triples for a graph database.

---Goal---
Identify ALL relationships among the provided entities. Be EXHAUSTIVE.
A good knowledge graph has at least 1 relationship per entity.

---Entities---
{entities}

---Text---
{text}

---Instructions---
1. Extract ALL relationships - be exhaustive, not conservative
2. Decompose N-ary relationships: "A and B founded C" becomes A FOUNDED C, B FOUNDED C
3. Include implicit relationships (co-occurrence in same sentence often implies relation)
4. Rate strength 1-10: 10=explicit statement, 7=strong implication, 4=weak inference
5. Use a SPECIFIC relationship type from the vocabulary below where one fits
6. Keep entity names concise; use the most common canonical name
7. Relationship type must be in UPPER_SNAKE_CASE

---Relationship Type Vocabulary---
Structural: PART_OF, CONTAINS, INSTANCE_OF, TYPE_OF
Organizational: EMPLOYS, MANAGES, FOUNDED_BY, OWNS, LOCATED_IN
Causal: CAUSES, ENABLES, REQUIRES, LEADS_TO
Temporal: PRECEDES, FOLLOWS
Functional: USES, CREATES, IMPLEMENTS, DEPENDS_ON
Semantic: SIMILAR_TO, ASSOCIATED_WITH
Fallback: RELATED_TO (only if no specific type fits)

---Output Format---
Return ONLY a valid JSON array:
[
  {"source": "Entity1", "target": "Entity2", "type": "SPECIFIC_TYPE", "description": "Why related", "strength": 8}
]

Output (JSON array only):"#;

/// Legacy generic entity extraction prompt.
pub const GENERIC_ENTITY_PROMPT: &str = r#"Extract all significant entities from the following text.

An entity is any named thing: person, organization, place, concept, technology, product, event, etc.
Do NOT limit yourself to predefined types - extract whatever is meaningful in the context.

Text:
{text}

Return a JSON array of entities. Each entity should have:
- name: The exact name as it appears in text
- type: Your best categorization
- description: Brief description based on context (1 sentence)

Output (JSON array only):"#;

/// Legacy generic relation extraction prompt.
pub const GENERIC_RELATION_PROMPT: &str = r#"Extract ALL relationships between the given entities from the text.

---Role---
You are a Knowledge Graph Specialist extracting relationships from text.

---Goal---
Identify ALL relationships among the provided entities. Be EXHAUSTIVE.
A good knowledge graph has at least 1 relationship per entity.

---Entities---
{entities}

---Text---
{text}

---Instructions---
1. For EVERY pair of entities that interact or relate, extract a relationship
2. Decompose complex N-ary relationships into multiple binary pairs
3. Include both explicit relationships and strongly implied ones
4. Rate relationship strength from 1-10 (10 = explicitly stated, 5 = implied, 1 = weak inference)

---Output Format---
Return a JSON array with this structure:
[
  {"source": "Entity1", "target": "Entity2", "type": "RELATIONSHIP_TYPE", "description": "Why they are related", "strength": 8}
]

Output (JSON array only):"#;

/// Stage-2 enrichment prompt: ask only for entity kinds the NER baseline
/// cannot detect, never repeating already-extracted names.
pub const ENTITY_ENRICHMENT_PROMPT: &str = r#"You are enriching a deterministic NER baseline with domain-specific entities.

---Context---
The NER baseline has already extracted these entities: {entities}

The baseline is good at: PERSON, ORGANIZATION, LOCATION, TEMPORAL
The baseline MISSES: CONCEPT, TECHNOLOGY, PRODUCT, MODEL, ARCHITECTURE, LANGUAGE

---Your Task---
Find ONLY entities that the baseline MISSED. Do NOT repeat baseline entities.

---Text---
{text}

---Instructions---
1. Review the baseline entities - these are already captured
2. Find ADDITIONAL entities of types the baseline cannot detect:
   - CONCEPT: abstract ideas, theories, methods
   - TECHNOLOGY: frameworks, platforms, tools
   - PRODUCT: software products, services
   - MODEL: AI/ML models
   - ARCHITECTURE: system or neural architectures
   - LANGUAGE: programming or natural languages
3. Do NOT repeat any entity from the baseline list
4. Be thorough but precise - only include clear entities

---Output Format---
Return ONLY a valid JSON array of NEW entities:
[
  {"name": "Entity Name", "type": "ENTITY_TYPE", "description": "Brief description"}
]

If no additional entities found, return: []

Entities (JSON array only):"#;

/// Stage-3 prompt: relations over the full consolidated entity list.
pub const RELATION_FROM_ENTITIES_PROMPT: &str = r#"Extract ALL relationships between the given entities.

---Role---
You are a Knowledge Graph Specialist. Your task is to find ALL relationships between entities.

---Entities---
{entities}

---Text---
{text}

---Goal---
Create a COMPLETE relationship graph. Every entity should have at least ONE relationship.

---Instructions---
1. Consider ALL entity pairs - check if any relationship exists
2. Decompose complex relationships: "A and B work at C" becomes A EMPLOYS-style pairs
3. Include implicit relationships from context
4. Rate strength 1-10: 10=explicit, 7=implied, 4=inferred

---Relationship Types---
Use specific types when possible:
PART_OF, CONTAINS, INSTANCE_OF, TYPE_OF, EMPLOYS, MANAGES, FOUNDED_BY, OWNS,
LOCATED_IN, CAUSES, ENABLES, REQUIRES, LEADS_TO, PRECEDES, FOLLOWS, USES,
CREATES, IMPLEMENTS, DEPENDS_ON, SIMILAR_TO, ASSOCIATED_WITH,
RELATED_TO (only if no specific type fits)

---Output Format---
Return ONLY a valid JSON array:
[
  {"source": "Entity1", "target": "Entity2", "type": "RELATIONSHIP_TYPE", "description": "Evidence from text", "strength": 8}
]

IMPORTANT: Every entity should have at least one relationship!

Relationships (JSON array only):"#;

/// Gleaning probe: is the entity extraction complete? Strictly YES/NO.
pub const ENTITY_COMPLETENESS_PROMPT: &str = r#"You have extracted the following entities from a document:

{entities}

Document text:
{text}

Are there any significant entities (people, organizations, locations, concepts, technologies, products, events) that were MISSED in this extraction?

Think carefully about:
- Named entities that appear in the text but are not in the list above
- Important concepts or terminology not captured
- Relationships or connections that imply missing entities

Answer with ONLY "YES" or "NO" (no explanation needed).

If you believe the extraction is complete and comprehensive, answer: NO
If you believe there are missing entities worth extracting, answer: YES

Answer:"#;

/// Gleaning continuation: extract only what was missed.
pub const ENTITY_CONTINUATION_PROMPT: &str = r#"You previously extracted these entities from a document:

{entities}

The full document text is:
{text}

Please extract ONLY the entities that were MISSED in the previous extraction.
Do NOT repeat entities that were already extracted in the list above.

Focus on:
- Named entities (people, organizations, locations)
- Important concepts and topics not captured before
- Domain-specific terminology that was overlooked
- Products, technologies, or events mentioned but not extracted

CRITICAL OUTPUT INSTRUCTIONS:
- You MUST return ONLY a valid JSON array
- Do NOT include any explanatory text before or after the JSON array
- Do NOT use markdown code fences
- If there are NO missing entities, return an empty array: []

Required JSON format:
[
  {"name": "Entity Name", "type": "ENTITY_TYPE", "description": "One sentence description"}
]

Output (JSON array only):"#;

/// Gleaning probe for relations. Strictly YES/NO.
pub const RELATION_COMPLETENESS_PROMPT: &str = r#"You have extracted the following relationships between entities:

{relations}

From entities:
{entities}

Document text:
{text}

Are there any significant RELATIONSHIPS between the entities that were MISSED?

Think carefully about:
- Explicit relationships stated in the text
- Implicit relationships strongly implied
- Causal relationships (X causes Y, X leads to Y, X enables Y)
- Temporal relationships (X precedes Y, X follows Y)
- Spatial relationships (X is located in Y, X is part of Y)
- Hierarchical relationships (X manages Y, X owns Y, X contains Y)

Answer with ONLY "YES" or "NO" (no explanation needed).

If you believe the extraction is complete and comprehensive, answer: NO
If you believe there are missing relationships worth extracting, answer: YES

Answer:"#;

/// Gleaning continuation for relations.
pub const RELATION_CONTINUATION_PROMPT: &str = r#"You previously extracted these relationships:

{relations}

From entities:
{entities}

Full document text:
{text}

Please extract ONLY the relationships that were MISSED in the previous extraction.
Do NOT repeat relationships that were already extracted in the list above.

Focus on extracting:
- CAUSAL relationships: CAUSES, LEADS_TO, ENABLES, REQUIRES
- FUNCTIONAL relationships: USES, CREATES, IMPLEMENTS, DEPENDS_ON
- ORGANIZATIONAL relationships: EMPLOYS, MANAGES, OWNS, FOUNDED_BY, LOCATED_IN
- STRUCTURAL relationships: PART_OF, CONTAINS, INSTANCE_OF, TYPE_OF
- TEMPORAL relationships: PRECEDES, FOLLOWS
- SEMANTIC relationships: SIMILAR_TO, ASSOCIATED_WITH

CRITICAL: For each pair of related entities, try to find AT LEAST ONE relationship.
If two entities appear in the same sentence or context, they likely have a relationship.

CRITICAL OUTPUT INSTRUCTIONS:
- You MUST return ONLY a valid JSON array
- Do NOT include any explanatory text before or after the JSON array
- Do NOT use markdown code fences
- If there are NO missing relationships, return an empty array: []

Required JSON format:
[
  {"source": "Entity1", "target": "Entity2", "type": "RELATIONSHIP_TYPE", "description": "One sentence description"}
]

Output (JSON array only):"#;

/// Research planner decomposition prompt.
pub const PLANNER_PROMPT: &str = r#"Create a research plan to answer this question: "{text}"

Generate 3-5 specific search queries that will help find information to answer this question.
Each query should focus on a different aspect or approach.

Format your response as a numbered list:
1. [First search query]
2. [Second search query]
3. [Third search query]
etc.

Research plan:"#;

/// Research synthesis prompt; `{text}` is the question, `{entities}` the
/// formatted findings.
pub const SYNTHESIS_PROMPT: &str = r#"You are a research assistant synthesizing information to answer a question.

Question: {text}

Research Findings:
{entities}

Task:
Synthesize the above research findings into a comprehensive, well-structured answer.
- Start with a direct answer to the question
- Provide supporting details from the research
- Cite specific sources using [Source #N] notation (e.g., "According to [Source #1], ...")
- Maintain accuracy - only state what is supported by the findings
- If the findings don't fully answer the question, acknowledge this
- Structure your answer with clear paragraphs

Comprehensive Answer:"#;

/// Fill `{key}` placeholders in a template. Unknown placeholders are left
/// in place; unused pairs are ignored.
pub fn fill(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in pairs {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

/// The active (entity, relation) prompt pair
#[derive(Debug, Clone)]
pub struct PromptPair {
    pub entity_prompt: String,
    pub relation_prompt: String,
}

/// Resolves the active prompt pair for a domain.
pub struct PromptResolver {
    use_dspy_prompts: bool,
    domain_repository: Option<std::sync::Arc<dyn DomainRepository>>,
}

impl PromptResolver {
    pub fn new(
        use_dspy_prompts: bool,
        domain_repository: Option<std::sync::Arc<dyn DomainRepository>>,
    ) -> Self {
        Self {
            use_dspy_prompts,
            domain_repository,
        }
    }

    /// Resolve the prompt pair for a domain.
    ///
    /// Priority: trained domain prompts, then the DSPy pair (when enabled),
    /// then the legacy generic pair. Any repository failure falls back
    /// silently.
    pub async fn resolve(&self, domain: Option<&str>) -> PromptPair {
        if let (Some(repo), Some(domain)) = (&self.domain_repository, domain) {
            match repo.get_domain(domain).await {
                Ok(Some(config)) => {
                    if let (Some(entity), Some(relation)) =
                        (config.entity_prompt.clone(), config.relation_prompt.clone())
                    {
                        debug!(domain, status = %config.status, "using_domain_specific_prompts");
                        return PromptPair {
                            entity_prompt: entity,
                            relation_prompt: relation,
                        };
                    }
                    debug!(domain, "domain_has_no_trained_prompts");
                }
                Ok(None) => {
                    debug!(domain, "domain_not_found");
                }
                Err(e) => {
                    warn!(domain, error = %e, "domain_prompt_lookup_failed_using_fallback");
                }
            }
        }

        if self.use_dspy_prompts {
            debug!(domain = domain.unwrap_or("technical"), "using_dspy_optimized_prompts");
            PromptPair {
                entity_prompt: DSPY_ENTITY_PROMPT.to_string(),
                relation_prompt: DSPY_RELATION_PROMPT.to_string(),
            }
        } else {
            debug!("using_generic_prompts");
            PromptPair {
                entity_prompt: GENERIC_ENTITY_PROMPT.to_string(),
                relation_prompt: GENERIC_RELATION_PROMPT.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExtractError;
    use crate::traits::DomainConfig;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedRepo {
        config: Option<DomainConfig>,
        fail: bool,
    }

    #[async_trait]
    impl DomainRepository for FixedRepo {
        async fn get_domain(&self, _name: &str) -> Result<Option<DomainConfig>, ExtractError> {
            if self.fail {
                return Err(ExtractError::Internal("repo down".into()));
            }
            Ok(self.config.clone())
        }
    }

    #[test]
    fn test_fill_replaces_placeholders() {
        let out = fill("Hello {name}, domain {domain}", &[("name", "world"), ("domain", "tech")]);
        assert_eq!(out, "Hello world, domain tech");
    }

    #[test]
    fn test_fill_unused_placeholder_is_not_an_error() {
        let out = fill("no placeholders here", &[("text", "x")]);
        assert_eq!(out, "no placeholders here");
    }

    #[test]
    fn test_templates_carry_expected_placeholders() {
        assert!(DSPY_ENTITY_PROMPT.contains("{text}"));
        assert!(DSPY_ENTITY_PROMPT.contains("{domain}"));
        assert!(DSPY_RELATION_PROMPT.contains("{entities}"));
        assert!(ENTITY_ENRICHMENT_PROMPT.contains("{entities}"));
        assert!(RELATION_FROM_ENTITIES_PROMPT.contains("{text}"));
        assert!(PLANNER_PROMPT.contains("{text}"));
    }

    #[tokio::test]
    async fn test_resolver_prefers_trained_domain_prompts() {
        let repo = Arc::new(FixedRepo {
            config: Some(DomainConfig {
                name: "legal".into(),
                entity_prompt: Some("custom entity {text}".into()),
                relation_prompt: Some("custom relation {text}".into()),
                status: "trained".into(),
            }),
            fail: false,
        });
        let resolver = PromptResolver::new(true, Some(repo));
        let pair = resolver.resolve(Some("legal")).await;
        assert_eq!(pair.entity_prompt, "custom entity {text}");
    }

    #[tokio::test]
    async fn test_resolver_dspy_default() {
        let resolver = PromptResolver::new(true, None);
        let pair = resolver.resolve(Some("anything")).await;
        assert_eq!(pair.entity_prompt, DSPY_ENTITY_PROMPT);
        assert_eq!(pair.relation_prompt, DSPY_RELATION_PROMPT);
    }

    #[tokio::test]
    async fn test_resolver_legacy_pair_when_dspy_disabled() {
        let resolver = PromptResolver::new(false, None);
        let pair = resolver.resolve(None).await;
        assert_eq!(pair.entity_prompt, GENERIC_ENTITY_PROMPT);
    }

    #[tokio::test]
    async fn test_resolver_falls_back_silently_on_repo_failure() {
        let repo = Arc::new(FixedRepo {
            config: None,
            fail: true,
        });
        let resolver = PromptResolver::new(true, Some(repo));
        let pair = resolver.resolve(Some("legal")).await;
        assert_eq!(pair.entity_prompt, DSPY_ENTITY_PROMPT);
    }

    #[tokio::test]
    async fn test_resolver_untrained_domain_falls_through() {
        let repo = Arc::new(FixedRepo {
            config: Some(DomainConfig {
                name: "new".into(),
                entity_prompt: None,
                relation_prompt: None,
                status: "pending".into(),
            }),
            fail: false,
        });
        let resolver = PromptResolver::new(false, Some(repo));
        let pair = resolver.resolve(Some("new")).await;
        assert_eq!(pair.entity_prompt, GENERIC_ENTITY_PROMPT);
    }
}
