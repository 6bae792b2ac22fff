//! Research planner: query decomposition
//!
//! Asks the model for 3-5 targeted sub-queries and parses them with a
//! precedence of numbered list, then bulleted list, then bare lines longer
//! than 10 characters. Callers fall back to `[original_query]` on failure.

use crate::errors::ResearchError;
use crate::prompts::{fill, PLANNER_PROMPT};
use crate::registry::ModelUseCase;
use crate::research::graph::ResearchDeps;
use crate::traits::LlmTask;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

/// Upper bound on generated sub-queries
pub const MAX_SUB_QUERIES: usize = 5;

static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+\.\s*(.+)$").unwrap());
static BULLETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-*•]\s*(.+)$").unwrap());

/// Parse a plan text into sub-queries.
pub fn parse_plan(plan_text: &str) -> Vec<String> {
    let mut queries: Vec<String> = plan_text
        .lines()
        .filter_map(|line| NUMBERED.captures(line.trim()))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|q| !q.is_empty())
        .collect();

    if queries.is_empty() {
        queries = plan_text
            .lines()
            .filter_map(|line| BULLETED.captures(line.trim()))
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim().to_string()))
            .filter(|q| !q.is_empty())
            .collect();
    }

    if queries.is_empty() {
        queries = plan_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && line.len() > 10)
            .map(str::to_string)
            .collect();
    }

    debug!(num_queries = queries.len(), "plan_parsed");
    queries
}

/// Generate a research plan: 1-5 sub-queries for the question.
pub async fn plan(deps: &ResearchDeps, query: &str) -> Result<Vec<String>, ResearchError> {
    info!(query, "planning_research");

    let prompt = fill(PLANNER_PROMPT, &[("text", query)]);
    let model = deps.model_registry.model_for(ModelUseCase::Planner).await;
    let task = LlmTask::generation(prompt)
        .with_model(model)
        .with_max_tokens(500)
        .with_temperature(0.7);

    let result = deps
        .gateway
        .generate(task)
        .await
        .map_err(|e| ResearchError::Planning(e.to_string()))?;

    let mut queries = parse_plan(&result.content);
    queries.truncate(MAX_SUB_QUERIES);

    if queries.is_empty() {
        return Err(ResearchError::Planning("empty plan".to_string()));
    }

    info!(num_queries = queries.len(), "research_plan_created");
    Ok(queries)
}
