//! API models for the research endpoints

use chrono::{DateTime, Utc};
use kgforge_core::types::{ExecutionStep, RetrievedContext, StepStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request to start a deep research session
#[derive(Debug, Clone, Deserialize)]
pub struct DeepResearchRequest {
    pub query: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_step_timeout_seconds")]
    pub step_timeout_seconds: u64,
}

fn default_namespace() -> String {
    "default".to_string()
}
fn default_max_iterations() -> u32 {
    3
}
fn default_timeout_seconds() -> u64 {
    180
}
fn default_step_timeout_seconds() -> u64 {
    60
}

impl DeepResearchRequest {
    /// Validate bounds; the message names the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must be non-empty".to_string());
        }
        if !(1..=5).contains(&self.max_iterations) {
            return Err(format!(
                "max_iterations must be within [1, 5], got {}",
                self.max_iterations
            ));
        }
        if !(30..=300).contains(&self.timeout_seconds) {
            return Err(format!(
                "timeout_seconds must be within [30, 300], got {}",
                self.timeout_seconds
            ));
        }
        if !(10..=120).contains(&self.step_timeout_seconds) {
            return Err(format!(
                "step_timeout_seconds must be within [10, 120], got {}",
                self.step_timeout_seconds
            ));
        }
        Ok(())
    }
}

/// A source document used in the research answer
#[derive(Debug, Clone, Serialize)]
pub struct SourceModel {
    pub text: String,
    pub score: f64,
    pub source_type: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub entities: Vec<String>,
    pub relationships: Vec<String>,
}

impl From<&RetrievedContext> for SourceModel {
    fn from(ctx: &RetrievedContext) -> Self {
        Self {
            text: ctx.text.clone(),
            score: ctx.score,
            source_type: if ctx.source_channel.is_empty() {
                "unknown".to_string()
            } else {
                ctx.source_channel.clone()
            },
            metadata: ctx.metadata.clone(),
            entities: ctx.entities.clone(),
            relationships: ctx.relationships.clone(),
        }
    }
}

/// Execution step as exposed over the API
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStepModel {
    pub step_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: StepStatus,
    pub result: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
}

impl From<&ExecutionStep> for ExecutionStepModel {
    fn from(step: &ExecutionStep) -> Self {
        Self {
            step_name: step.step_name.clone(),
            started_at: step.started_at,
            completed_at: step.completed_at,
            duration_ms: step.duration_ms,
            status: step.status,
            result: step.result.clone(),
            error: step.error.clone(),
        }
    }
}

/// Partial result for one sub-question
#[derive(Debug, Clone, Serialize)]
pub struct IntermediateAnswer {
    pub sub_question: String,
    pub answer: String,
    pub contexts_count: usize,
    pub sources: Vec<SourceModel>,
    pub confidence: f64,
}

/// Full deep research response
#[derive(Debug, Clone, Serialize)]
pub struct DeepResearchResponse {
    pub id: String,
    pub query: String,
    pub status: String,
    pub sub_questions: Vec<String>,
    pub intermediate_answers: Vec<IntermediateAnswer>,
    pub final_answer: String,
    pub sources: Vec<SourceModel>,
    pub execution_steps: Vec<ExecutionStepModel>,
    pub total_time_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status response for polling
#[derive(Debug, Clone, Serialize)]
pub struct DeepResearchStatusResponse {
    pub id: String,
    pub status: String,
    pub current_step: String,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<u64>,
    pub execution_steps: Vec<ExecutionStepModel>,
}

/// Cancellation request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelResearchRequest {
    pub reason: Option<String>,
}

/// Request body for the streaming research variant
#[derive(Debug, Clone, Deserialize)]
pub struct StreamResearchRequest {
    pub query: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl StreamResearchRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must be non-empty".to_string());
        }
        if !(1..=5).contains(&self.max_iterations) {
            return Err(format!(
                "max_iterations must be within [1, 5], got {}",
                self.max_iterations
            ));
        }
        Ok(())
    }
}

/// Error payload for all non-2xx responses
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            timestamp: Utc::now(),
        }
    }
}
