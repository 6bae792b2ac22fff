//! Deep research handlers: start, status, result, cancel, export

use crate::models::{
    ApiError, CancelResearchRequest, DeepResearchRequest, DeepResearchResponse,
    DeepResearchStatusResponse, ExecutionStepModel, IntermediateAnswer, SourceModel,
};
use crate::sessions::{ResearchSession, SessionStatus};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use kgforge_core::research::run_research;
use kgforge_core::types::{CurrentStep, ResearchState, RetrievedContext};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type HandlerError = (StatusCode, Json<ApiError>);

fn not_found(research_id: &str) -> HandlerError {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(format!("Research {} not found", research_id))),
    )
}

/// POST /api/v1/research/deep
pub async fn start_deep_research(
    State(state): State<AppState>,
    Json(request): Json<DeepResearchRequest>,
) -> Result<(StatusCode, Json<DeepResearchResponse>), HandlerError> {
    if let Err(message) = request.validate() {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, Json(ApiError::new(message))));
    }

    state.sessions.evict_expired(state.config.session_retention).await;

    let session = ResearchSession::new(&request.query, request.max_iterations, &request.namespace);
    info!(session_id = %session.id, query = %request.query, "start_deep_research");

    let deps = state.research_deps();
    let task_session = Arc::clone(&session);
    let timeout = Duration::from_secs(request.timeout_seconds);
    let step_timeout = Duration::from_secs(request.step_timeout_seconds);

    let handle = tokio::spawn(async move {
        let run = run_research(
            &deps,
            Arc::clone(&task_session.state),
            step_timeout,
            None,
        );
        match tokio::time::timeout(timeout, run).await {
            Ok(()) => {
                let (error, synthesis_empty) = {
                    let research_state = task_session.state.read().await;
                    (research_state.error.clone(), research_state.synthesis.is_empty())
                };
                // The supervisor records errors without raising; a recorded
                // error with a produced answer still completes
                match error {
                    Some(error) if synthesis_empty => task_session.mark_error(error).await,
                    _ => task_session.mark_complete().await,
                }
            }
            Err(_) => {
                warn!(session_id = %task_session.id, "deep_research_timeout");
                {
                    let mut research_state = task_session.state.write().await;
                    research_state.current_step = CurrentStep::Error;
                }
                task_session
                    .mark_error(format!("Research timeout after {}s", timeout.as_secs()))
                    .await;
            }
        }
    });
    *session.task.lock().await = Some(handle);

    state.sessions.insert(Arc::clone(&session)).await;

    let response = DeepResearchResponse {
        id: session.id.clone(),
        query: request.query,
        status: "pending".to_string(),
        sub_questions: Vec::new(),
        intermediate_answers: Vec::new(),
        final_answer: String::new(),
        sources: Vec::new(),
        execution_steps: Vec::new(),
        total_time_ms: 0,
        created_at: session.created_at,
        completed_at: None,
        error: None,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

async fn reported_status(session: &ResearchSession) -> (String, CurrentStep) {
    let meta = session.meta.read().await;
    let step = session.state.read().await.current_step;
    let status = match meta.status {
        SessionStatus::Pending => step.to_string(),
        other => other.to_string(),
    };
    (status, step)
}

/// GET /api/v1/research/deep/{id}/status
pub async fn get_research_status(
    State(state): State<AppState>,
    Path(research_id): Path<String>,
) -> Result<Json<DeepResearchStatusResponse>, HandlerError> {
    let session = state
        .sessions
        .get(&research_id)
        .await
        .ok_or_else(|| not_found(&research_id))?;

    let (status, current_step) = reported_status(&session).await;
    let research_state = session.state.read().await.clone();
    let progress_percent = current_step.progress_percent();

    // Linear extrapolation from elapsed time and progress
    let estimated_time_remaining_ms = {
        let meta = session.meta.read().await;
        if meta.status == SessionStatus::Pending && progress_percent > 0 {
            let elapsed_ms = (Utc::now() - session.created_at).num_milliseconds().max(0) as f64;
            let total_estimated = elapsed_ms / (progress_percent as f64 / 100.0);
            Some((total_estimated - elapsed_ms).max(0.0) as u64)
        } else {
            None
        }
    };

    Ok(Json(DeepResearchStatusResponse {
        id: research_id,
        status,
        current_step: current_step.to_string(),
        progress_percent,
        estimated_time_remaining_ms,
        execution_steps: research_state
            .execution_steps
            .iter()
            .map(ExecutionStepModel::from)
            .collect(),
    }))
}

/// Group contexts per sub-query and score a confidence:
/// `0.7 * avg_score + 0.3 * min(contexts/5, 1)`.
fn intermediate_answers(research_state: &ResearchState) -> Vec<IntermediateAnswer> {
    research_state
        .sub_queries
        .iter()
        .map(|sub_query| {
            let contexts: Vec<&RetrievedContext> = research_state
                .all_contexts
                .iter()
                .filter(|ctx| ctx.research_query.as_deref() == Some(sub_query.as_str()))
                .collect();

            let confidence = if contexts.is_empty() {
                0.0
            } else {
                let avg_score =
                    contexts.iter().map(|c| c.score).sum::<f64>() / contexts.len() as f64;
                let coverage = (contexts.len() as f64 / 5.0).min(1.0);
                avg_score * 0.7 + coverage * 0.3
            };

            let answer = research_state
                .intermediate_answers
                .get(sub_query)
                .cloned()
                .unwrap_or_else(|| format!("Searching... ({} contexts found)", contexts.len()));

            IntermediateAnswer {
                sub_question: sub_query.clone(),
                answer,
                contexts_count: contexts.len(),
                sources: contexts.iter().take(5).map(|c| SourceModel::from(*c)).collect(),
                confidence,
            }
        })
        .collect()
}

fn top_sources(research_state: &ResearchState, limit: usize) -> Vec<SourceModel> {
    let mut sources: Vec<SourceModel> = research_state
        .all_contexts
        .iter()
        .map(SourceModel::from)
        .collect();
    sources.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    sources.truncate(limit);
    sources
}

async fn full_response(session: &ResearchSession) -> DeepResearchResponse {
    let meta = session.meta.read().await.clone();
    let research_state = session.state.read().await.clone();
    let (status, _) = reported_status(session).await;

    DeepResearchResponse {
        id: session.id.clone(),
        query: session.query.clone(),
        status,
        sub_questions: research_state.sub_queries.clone(),
        intermediate_answers: intermediate_answers(&research_state),
        final_answer: research_state.synthesis.clone(),
        sources: top_sources(&research_state, 20),
        execution_steps: research_state
            .execution_steps
            .iter()
            .map(ExecutionStepModel::from)
            .collect(),
        total_time_ms: meta.total_time_ms,
        created_at: session.created_at,
        completed_at: meta.completed_at,
        error: meta.error,
    }
}

/// GET /api/v1/research/deep/{id}
pub async fn get_research_result(
    State(state): State<AppState>,
    Path(research_id): Path<String>,
) -> Result<Json<DeepResearchResponse>, HandlerError> {
    let session = state
        .sessions
        .get(&research_id)
        .await
        .ok_or_else(|| not_found(&research_id))?;
    Ok(Json(full_response(&session).await))
}

/// POST /api/v1/research/deep/{id}/cancel
pub async fn cancel_research(
    State(state): State<AppState>,
    Path(research_id): Path<String>,
    body: Option<Json<CancelResearchRequest>>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let session = state
        .sessions
        .get(&research_id)
        .await
        .ok_or_else(|| not_found(&research_id))?;

    let reason = body.and_then(|Json(request)| request.reason);
    session.cancel(reason.as_deref()).await;

    Ok(Json(serde_json::json!({
        "status": "cancelled",
        "message": "Research cancelled successfully",
    })))
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub include_sources: bool,
    #[serde(default)]
    pub include_intermediate: bool,
}

fn default_format() -> String {
    "markdown".to_string()
}
fn default_true() -> bool {
    true
}

/// Deterministic markdown rendering of a finished session.
pub fn render_markdown(
    response: &DeepResearchResponse,
    include_sources: bool,
    include_intermediate: bool,
) -> String {
    let mut lines: Vec<String> = vec![
        format!("# Deep Research: {}", response.query),
        String::new(),
        format!("**Research ID:** `{}`", response.id),
        format!("**Status:** {}", response.status),
        format!("**Created:** {}", response.created_at.to_rfc3339()),
        String::new(),
        "## Final Answer".to_string(),
        String::new(),
        if response.final_answer.is_empty() {
            "No answer available yet.".to_string()
        } else {
            response.final_answer.clone()
        },
        String::new(),
    ];

    if include_intermediate && !response.intermediate_answers.is_empty() {
        lines.push("## Intermediate Findings".to_string());
        lines.push(String::new());
        for ia in &response.intermediate_answers {
            lines.push(format!("### {}", ia.sub_question));
            lines.push(String::new());
            lines.push(format!("**Confidence:** {:.1}%", ia.confidence * 100.0));
            lines.push(format!("**Contexts:** {}", ia.contexts_count));
            lines.push(String::new());
            lines.push(ia.answer.clone());
            lines.push(String::new());
        }
    }

    if include_sources && !response.sources.is_empty() {
        lines.push("## Sources".to_string());
        lines.push(String::new());
        for (idx, source) in response.sources.iter().enumerate() {
            lines.push(format!(
                "**[{}]** _{}_ (Score: {:.3})",
                idx + 1,
                source.source_type,
                source.score
            ));
            lines.push(String::new());
            let text: String = source.text.chars().take(500).collect();
            let suffix = if source.text.chars().count() > 500 { "..." } else { "" };
            lines.push(format!("{}{}", text, suffix));
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

/// GET /api/v1/research/deep/{id}/export?format=markdown|pdf
pub async fn export_research(
    State(state): State<AppState>,
    Path(research_id): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Response, HandlerError> {
    let session = state
        .sessions
        .get(&research_id)
        .await
        .ok_or_else(|| not_found(&research_id))?;

    match params.format.as_str() {
        "markdown" => {
            let response = full_response(&session).await;
            let markdown =
                render_markdown(&response, params.include_sources, params.include_intermediate);

            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/markdown".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=research_{}.md", research_id),
                    ),
                ],
                markdown,
            )
                .into_response())
        }
        "pdf" => Err((
            StatusCode::NOT_IMPLEMENTED,
            Json(ApiError::new("PDF export not yet implemented")),
        )),
        other => Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(format!(
                "Invalid format: {}. Use 'markdown' or 'pdf'",
                other
            ))),
        )),
    }
}
