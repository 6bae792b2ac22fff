//! Extraction configuration: feature flags, cascade ranks, pipeline stages
//!
//! Behavior toggles are a typed struct loaded once at startup and threaded
//! explicitly through constructors; tests override by passing an alternate
//! config, never by mutating the environment.

use crate::errors::ConfigError;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extraction method for a cascade rank or pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Pure LLM extraction (entities + relations)
    LlmOnly,
    /// NER entities + LLM relations
    HybridNerLlm,
    /// Stage 1: NER entities only
    SpacyNerOnly,
    /// Stage 2: LLM adds missing entities
    LlmEntityEnrichment,
    /// Stage 3: LLM extracts relations from known entities
    LlmRelationOnly,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExtractionMethod::LlmOnly => "llm_only",
            ExtractionMethod::HybridNerLlm => "hybrid_ner_llm",
            ExtractionMethod::SpacyNerOnly => "spacy_ner_only",
            ExtractionMethod::LlmEntityEnrichment => "llm_entity_enrichment",
            ExtractionMethod::LlmRelationOnly => "llm_relation_only",
        };
        write!(f, "{}", s)
    }
}

/// Configuration for a single legacy cascade rank
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeRankConfig {
    /// Rank number (1-3, lower is preferred)
    pub rank: u8,
    /// LLM model name for this rank
    pub model: String,
    /// Extraction method
    pub method: ExtractionMethod,
    /// Timeout for entity extraction in seconds
    pub entity_timeout_s: u64,
    /// Timeout for relation extraction in seconds
    pub relation_timeout_s: u64,
    /// Maximum retry attempts on failure
    pub max_retries: u32,
    /// Exponential backoff multiplier in seconds
    pub retry_backoff_multiplier: u64,
}

impl CascadeRankConfig {
    /// Validate rank invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3).contains(&self.rank) {
            return Err(ConfigError::InvalidValue {
                field: "rank".into(),
                reason: format!("must be 1-3, got {}", self.rank),
            });
        }
        if self.entity_timeout_s == 0 {
            return Err(ConfigError::InvalidValue {
                field: "entity_timeout_s".into(),
                reason: "must be positive".into(),
            });
        }
        if self.relation_timeout_s == 0 {
            return Err(ConfigError::InvalidValue {
                field: "relation_timeout_s".into(),
                reason: "must be positive".into(),
            });
        }
        if self.retry_backoff_multiplier == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry_backoff_multiplier".into(),
                reason: "must be >= 1".into(),
            });
        }
        Ok(())
    }
}

/// Configuration for a single pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStageConfig {
    /// Stage number (1-3)
    pub stage: u8,
    /// Human-readable stage name
    pub name: String,
    /// Extraction method for this stage
    pub method: ExtractionMethod,
    /// LLM model name (None for NER stages)
    pub model: Option<String>,
    /// Timeout in seconds
    pub timeout_s: u64,
    /// Maximum retry attempts on failure
    pub max_retries: u32,
    /// Fall back to LLM-only entity extraction on NER failure
    /// (only meaningful for stage 1)
    pub fallback_to_llm: bool,
}

/// Default 3-rank cascade: small local model, large local model, then
/// hybrid NER + large model with doubled relation timeout.
pub fn default_cascade() -> Vec<CascadeRankConfig> {
    vec![
        CascadeRankConfig {
            rank: 1,
            model: "nemotron-3-nano:latest".to_string(),
            method: ExtractionMethod::LlmOnly,
            entity_timeout_s: 300,
            relation_timeout_s: 300,
            max_retries: 3,
            retry_backoff_multiplier: 1,
        },
        CascadeRankConfig {
            rank: 2,
            model: "gpt-oss:20b".to_string(),
            method: ExtractionMethod::LlmOnly,
            entity_timeout_s: 300,
            relation_timeout_s: 300,
            max_retries: 3,
            retry_backoff_multiplier: 1,
        },
        CascadeRankConfig {
            rank: 3,
            model: "gpt-oss:20b".to_string(),
            method: ExtractionMethod::HybridNerLlm,
            // NER is synchronous, no real timeout needed
            entity_timeout_s: 9999,
            relation_timeout_s: 600,
            max_retries: 3,
            retry_backoff_multiplier: 1,
        },
    ]
}

/// Default NER-first pipeline: deterministic NER baseline, mandatory LLM
/// entity enrichment, then LLM relation extraction.
pub fn default_pipeline() -> Vec<PipelineStageConfig> {
    vec![
        PipelineStageConfig {
            stage: 1,
            name: "NER Entities".to_string(),
            method: ExtractionMethod::SpacyNerOnly,
            model: None,
            timeout_s: 60,
            max_retries: 1,
            fallback_to_llm: true,
        },
        PipelineStageConfig {
            stage: 2,
            name: "LLM Entity Enrichment".to_string(),
            method: ExtractionMethod::LlmEntityEnrichment,
            model: Some("nemotron-3-nano:latest".to_string()),
            timeout_s: 120,
            max_retries: 2,
            fallback_to_llm: false,
        },
        PipelineStageConfig {
            stage: 3,
            name: "LLM Relation Extraction".to_string(),
            method: ExtractionMethod::LlmRelationOnly,
            model: Some("nemotron-3-nano:latest".to_string()),
            timeout_s: 180,
            max_retries: 3,
            fallback_to_llm: false,
        },
    ]
}

/// Process-wide extraction configuration, immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Select the NER-first pipeline (true, default) or the legacy cascade
    pub use_spacy_first_pipeline: bool,
    /// Select the DSPy-optimized prompt pair (true, default) or the legacy
    /// generic pair
    pub use_dspy_prompts: bool,
    /// Resolve pronouns to antecedents before extraction
    pub use_coreference: bool,
    /// Use sliding sentence windows for relation extraction on long texts
    pub use_cross_sentence: bool,
    /// Apply the entity quality filter to NER output
    pub use_entity_filter: bool,
    /// Gleaning rounds after initial extraction (0 disables)
    pub gleaning_steps: u32,
    /// Bound on concurrently processed documents
    pub max_concurrent_documents: usize,
    /// LLM temperature for extraction
    pub temperature: f32,
    /// Max tokens for extraction responses
    pub max_tokens: u32,
    /// Legacy cascade ranks
    pub cascade: Vec<CascadeRankConfig>,
    /// Pipeline stages
    pub pipeline: Vec<PipelineStageConfig>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            use_spacy_first_pipeline: true,
            use_dspy_prompts: true,
            use_coreference: true,
            use_cross_sentence: true,
            use_entity_filter: true,
            gleaning_steps: 0,
            max_concurrent_documents: 4,
            temperature: 0.1,
            max_tokens: 4096,
            cascade: default_cascade(),
            pipeline: default_pipeline(),
        }
    }
}

impl ExtractionConfig {
    /// Load configuration from an optional YAML file and `KGFORGE_`-prefixed
    /// environment variables.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            ExtractionConfig::default(),
        ));

        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Yaml::file(path));
            } else {
                return Err(ConfigError::File(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
        }

        figment = figment.merge(Env::prefixed("KGFORGE_"));

        let config: ExtractionConfig = figment
            .extract()
            .map_err(|e| ConfigError::File(format!("failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all cascade ranks and invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        for rank in &self.cascade {
            rank.validate()?;
        }
        if self.cascade.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cascade".into(),
                reason: "at least one rank required".into(),
            });
        }
        if self.pipeline.len() != 3 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline".into(),
                reason: format!("expected 3 stages, got {}", self.pipeline.len()),
            });
        }
        if self.max_concurrent_documents == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_documents".into(),
                reason: "must be >= 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ExtractionConfig::default();
        assert!(config.use_spacy_first_pipeline);
        assert!(config.use_dspy_prompts);
        assert_eq!(config.gleaning_steps, 0);
        assert_eq!(config.cascade.len(), 3);
        assert_eq!(config.pipeline.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_cascade_shape() {
        let cascade = default_cascade();
        assert_eq!(cascade[0].rank, 1);
        assert_eq!(cascade[0].entity_timeout_s, 300);
        assert_eq!(cascade[2].method, ExtractionMethod::HybridNerLlm);
        assert_eq!(cascade[2].relation_timeout_s, 600);
        for rank in &cascade {
            assert!(rank.validate().is_ok());
        }
    }

    #[test]
    fn test_rank_validation_rejects_bad_values() {
        let mut rank = default_cascade().remove(0);
        rank.rank = 4;
        assert!(rank.validate().is_err());

        let mut rank = default_cascade().remove(0);
        rank.entity_timeout_s = 0;
        assert!(rank.validate().is_err());

        let mut rank = default_cascade().remove(0);
        rank.retry_backoff_multiplier = 0;
        assert!(rank.validate().is_err());
    }

    #[test]
    fn test_pipeline_stage1_falls_back_to_llm() {
        let pipeline = default_pipeline();
        assert!(pipeline[0].fallback_to_llm);
        assert!(!pipeline[1].fallback_to_llm);
        assert_eq!(pipeline[1].method, ExtractionMethod::LlmEntityEnrichment);
        assert_eq!(pipeline[2].method, ExtractionMethod::LlmRelationOnly);
    }

    #[test]
    fn test_config_from_yaml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "use_spacy_first_pipeline: false").unwrap();
        writeln!(file, "gleaning_steps: 2").unwrap();

        let config = ExtractionConfig::load(Some(file.path())).unwrap();
        assert!(!config.use_spacy_first_pipeline);
        assert_eq!(config.gleaning_steps, 2);
        // Untouched fields keep defaults
        assert!(config.use_coreference);
    }

    #[test]
    fn test_config_missing_file_errors() {
        let result = ExtractionConfig::load(Some(Path::new("/nonexistent/kgforge.yaml")));
        assert!(result.is_err());
    }
}
