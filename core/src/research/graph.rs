//! The research graph runner
//!
//! A straightforward loop over the four fixed nodes rather than a generic
//! graph engine: planner, searcher, supervisor, synthesizer. The state
//! lives behind a shared handle so status polls observe consistent
//! snapshots; every node runs under the step timeout, and progress events
//! are emitted for the streaming front-end.

use crate::errors::ResearchError;
use crate::registry::ModelRegistry;
use crate::research::{planner, searcher, supervisor, synthesizer};
use crate::traits::{LlmGateway, Retriever};
use crate::types::{CurrentStep, ExecutionStep, ResearchState};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

/// Collaborators the research graph depends on
pub struct ResearchDeps {
    pub gateway: Arc<dyn LlmGateway>,
    pub retriever: Arc<dyn Retriever>,
    pub model_registry: Arc<ModelRegistry>,
}

/// Phases emitted over the streaming front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchPhase {
    Start,
    Plan,
    Search,
    Evaluate,
    Synthesize,
}

/// A progress event for the streaming research variant
#[derive(Debug, Clone, Serialize)]
pub struct ResearchEvent {
    pub phase: ResearchPhase,
    pub message: String,
    pub iteration: u32,
    pub metadata: HashMap<String, serde_json::Value>,
}

fn emit(
    events: &Option<mpsc::UnboundedSender<ResearchEvent>>,
    phase: ResearchPhase,
    message: impl Into<String>,
    iteration: u32,
) {
    if let Some(sender) = events {
        let _ = sender.send(ResearchEvent {
            phase,
            message: message.into(),
            iteration,
            metadata: HashMap::new(),
        });
    }
}

async fn write_back(handle: &Arc<RwLock<ResearchState>>, state: &ResearchState) {
    *handle.write().await = state.clone();
}

/// Run the research workflow to completion, mutating the shared state
/// handle as each node finishes.
///
/// Termination: at most `max_iterations` searcher invocations and exactly
/// one synthesizer invocation, regardless of quality. The synthesizer
/// always yields a non-empty answer, so the state reaches `complete` (with
/// `error` recorded when applicable).
pub async fn run_research(
    deps: &ResearchDeps,
    handle: Arc<RwLock<ResearchState>>,
    step_timeout: Duration,
    events: Option<mpsc::UnboundedSender<ResearchEvent>>,
) {
    let mut state = handle.read().await.clone();
    let namespace = state.namespace();

    emit(&events, ResearchPhase::Start, "Research started", 0);

    // --- planner ---
    state.current_step = CurrentStep::Decomposing;
    write_back(&handle, &state).await;

    let step = ExecutionStep::start("decompose_query");
    let planned = tokio::time::timeout(step_timeout, planner::plan(deps, &state.original_query)).await;
    match planned {
        Ok(Ok(sub_queries)) => {
            state.sub_queries = sub_queries;
            state.execution_steps.push(step.complete(HashMap::from([(
                "num_queries".to_string(),
                serde_json::json!(state.sub_queries.len()),
            )])));
        }
        Ok(Err(e)) => {
            warn!(error = %e, "planner_failed_falling_back_to_original_query");
            state.sub_queries = vec![state.original_query.clone()];
            state.execution_steps.push(step.fail(e.to_string()));
            state.error = Some(format!("Planning failed: {}", e));
        }
        Err(_) => {
            warn!("planner_timed_out_falling_back_to_original_query");
            state.sub_queries = vec![state.original_query.clone()];
            state
                .execution_steps
                .push(step.fail(ResearchError::Timeout(step_timeout.as_secs()).to_string()));
        }
    }
    state.iteration = 0;
    emit(
        &events,
        ResearchPhase::Plan,
        format!("Planned {} sub-queries", state.sub_queries.len()),
        0,
    );
    write_back(&handle, &state).await;

    // --- searcher / supervisor loop ---
    loop {
        state.current_step = CurrentStep::Retrieving;
        write_back(&handle, &state).await;

        let step = ExecutionStep::start("retrieve_context");
        let retrieved = tokio::time::timeout(
            step_timeout,
            searcher::execute_queries(deps.retriever.as_ref(), &state.sub_queries, &namespace),
        )
        .await;

        match retrieved {
            Ok(new_contexts) => {
                let found = new_contexts.len();
                state.all_contexts.extend(new_contexts);
                state.all_contexts = searcher::deduplicate_contexts(std::mem::take(&mut state.all_contexts));
                state.execution_steps.push(step.complete(HashMap::from([(
                    "contexts".to_string(),
                    serde_json::json!(found),
                )])));
            }
            Err(_) => {
                state.execution_steps.push(step.fail("retrieval step timed out"));
                state.error = Some(format!("Search timed out after {}s", step_timeout.as_secs()));
            }
        }
        state.iteration += 1;
        emit(
            &events,
            ResearchPhase::Search,
            format!("Iteration {}: {} contexts", state.iteration, state.all_contexts.len()),
            state.iteration,
        );
        write_back(&handle, &state).await;

        // --- supervisor ---
        state.current_step = CurrentStep::Analyzing;
        state.should_continue = supervisor::should_continue(&state);
        emit(
            &events,
            ResearchPhase::Evaluate,
            if state.should_continue {
                "Continuing research"
            } else {
                "Sufficient context collected"
            },
            state.iteration,
        );
        write_back(&handle, &state).await;

        if !state.should_continue {
            break;
        }
    }

    // --- synthesizer (exactly once) ---
    state.current_step = CurrentStep::Synthesizing;
    write_back(&handle, &state).await;
    emit(&events, ResearchPhase::Synthesize, "Synthesizing answer", state.iteration);

    let step = ExecutionStep::start("synthesize_answer");
    let synthesized = tokio::time::timeout(
        step_timeout,
        synthesizer::synthesize(deps, &state.original_query, &state.all_contexts),
    )
    .await;

    match synthesized {
        Ok(Ok(answer)) => {
            state.synthesis = answer;
            state.execution_steps.push(step.complete(HashMap::from([(
                "answer_length".to_string(),
                serde_json::json!(state.synthesis.len()),
            )])));
        }
        Ok(Err(e)) => {
            warn!(error = %e, "synthesizer_failed_using_fallback");
            state.synthesis =
                synthesizer::fallback_synthesis(&state.original_query, &state.all_contexts);
            state.execution_steps.push(step.fail(e.to_string()));
            state.error = Some(format!("Synthesis failed: {}", e));
        }
        Err(_) => {
            warn!("synthesizer_timed_out_using_fallback");
            state.synthesis =
                synthesizer::fallback_synthesis(&state.original_query, &state.all_contexts);
            state.execution_steps.push(step.fail("synthesis step timed out"));
        }
    }

    // Intermediate answers: group contexts per sub-query
    for sub_query in &state.sub_queries {
        let count = state
            .all_contexts
            .iter()
            .filter(|c| c.research_query.as_deref() == Some(sub_query.as_str()))
            .count();
        state
            .intermediate_answers
            .entry(sub_query.clone())
            .or_insert_with(|| format!("{} contexts found", count));
    }

    state.current_step = CurrentStep::Complete;
    state.should_continue = false;
    write_back(&handle, &state).await;

    info!(
        iterations = state.iteration,
        contexts = state.all_contexts.len(),
        answer_length = state.synthesis.len(),
        "research_complete"
    );
}
