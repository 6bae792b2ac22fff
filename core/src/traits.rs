//! Core traits defining the collaborator seams for KgForge
//!
//! The extraction pipeline and the research supervisor consume external
//! systems exclusively through these traits: the LLM gateway, the hybrid
//! retriever, the graph store, the embedding service and the domain
//! repository.

use crate::errors::{ExtractError, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of work a gateway task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Extraction,
    Generation,
    Classification,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Extraction => write!(f, "extraction"),
            TaskKind::Generation => write!(f, "generation"),
            TaskKind::Classification => write!(f, "classification"),
        }
    }
}

/// Task complexity hint used for backend routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Quality requirement hint used for backend routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Low,
    Balanced,
    Medium,
    High,
}

/// A single request to the LLM gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmTask {
    pub task_kind: TaskKind,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub complexity: Complexity,
    pub quality: Quality,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Explicit model override; when unset the gateway resolves the model
    /// through the registry by use case
    pub model_override: Option<String>,
}

impl LlmTask {
    /// Create an extraction task with the defaults the pipeline uses
    pub fn extraction(prompt: impl Into<String>) -> Self {
        Self {
            task_kind: TaskKind::Extraction,
            prompt: prompt.into(),
            system_prompt: None,
            complexity: Complexity::High,
            quality: Quality::High,
            max_tokens: 4096,
            temperature: 0.1,
            model_override: None,
        }
    }

    /// Create a generation task
    pub fn generation(prompt: impl Into<String>) -> Self {
        Self {
            task_kind: TaskKind::Generation,
            prompt: prompt.into(),
            system_prompt: None,
            complexity: Complexity::Medium,
            quality: Quality::Balanced,
            max_tokens: 1500,
            temperature: 0.3,
            model_override: None,
        }
    }

    /// Set the model override
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set complexity and quality hints
    pub fn with_routing(mut self, complexity: Complexity, quality: Quality) -> Self {
        self.complexity = complexity;
        self.quality = quality;
        self
    }
}

/// Result of a gateway call, carrying usage accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResult {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

/// Uniform facade over LLM backends.
///
/// Fails with `ExtractError::Llm` when the backend is unreachable or returns
/// a non-successful status. Deadlines are enforced by the caller (the stage
/// executor); the gateway does not parse or validate content.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn generate(&self, task: LlmTask) -> Result<LlmResult, ExtractError>;
}

/// Hybrid retriever consumed by the research searcher
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve contexts for a query. `intent` is always "hybrid" for
    /// research traffic.
    async fn retrieve(
        &self,
        query: &str,
        namespace: &str,
        intent: &str,
    ) -> Result<Vec<crate::types::RetrievedContext>, ExtractError>;
}

/// A single row returned by a graph store read
pub type StoreRow = HashMap<String, serde_json::Value>;

/// Graph store seam used by the hygiene layer for store-assisted fixes
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Execute a read query with parameters
    async fn read(
        &self,
        query: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<StoreRow>, StoreError>;

    /// Execute a write query with parameters
    async fn write(
        &self,
        query: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<StoreRow>, StoreError>;

    /// Whether a vector index over entity embeddings is available
    async fn has_vector_index(&self) -> bool {
        false
    }
}

/// Optional embedding service used for semantic entity deduplication
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExtractError>;
}

/// Domain configuration with optionally trained custom prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    pub entity_prompt: Option<String>,
    pub relation_prompt: Option<String>,
    pub status: String,
}

/// Repository of trained domains, consulted by the prompt resolver
#[async_trait]
pub trait DomainRepository: Send + Sync {
    /// Look up a domain; `Ok(None)` when the domain is unknown
    async fn get_domain(&self, name: &str) -> Result<Option<DomainConfig>, ExtractError>;
}

/// Cosine similarity between two embedding vectors.
///
/// Returns 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_task_defaults() {
        let task = LlmTask::extraction("extract this");
        assert_eq!(task.task_kind, TaskKind::Extraction);
        assert_eq!(task.max_tokens, 4096);
        assert!(task.model_override.is_none());
    }

    #[test]
    fn test_task_builder() {
        let task = LlmTask::generation("plan")
            .with_model("nemotron-3-nano:latest")
            .with_max_tokens(500)
            .with_temperature(0.7);
        assert_eq!(task.model_override.as_deref(), Some("nemotron-3-nano:latest"));
        assert_eq!(task.max_tokens, 500);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let c = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &c).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0]), 0.0);
    }
}
