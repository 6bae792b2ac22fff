//! Streaming research handler
//!
//! The streaming variant runs the same supervisor core as the polling
//! endpoint but is sessionless: progress is pushed as SSE frames
//! (`data: <json>\n\n`) with phases start/plan/search/evaluate/synthesize,
//! followed by a final result frame and `data: [DONE]\n\n`.

use crate::models::{ApiError, SourceModel, StreamResearchRequest};
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    response::Json,
};
use futures::stream::Stream;
use kgforge_core::research::run_research;
use kgforge_core::types::ResearchState;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

const PHASE_TIMEOUT: Duration = Duration::from_secs(60);

/// Final frame of a streaming research run
#[derive(Debug, Serialize)]
struct StreamResult {
    query: String,
    synthesis: String,
    sources: Vec<SourceModel>,
    iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// POST /api/v1/research, streaming research over SSE
pub async fn stream_research(
    State(state): State<AppState>,
    Json(request): Json<StreamResearchRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ApiError>)> {
    if let Err(message) = request.validate() {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, Json(ApiError::new(message))));
    }

    info!(query = %request.query, "stream_research_started");

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Event>();

    let deps = state.research_deps();
    let handle = Arc::new(RwLock::new(ResearchState::new(
        &request.query,
        request.max_iterations,
        &request.namespace,
    )));

    // Forward progress events as SSE frames; signal once drained so the
    // final frames cannot overtake queued progress
    let forward_tx = frame_tx.clone();
    let (drained_tx, drained_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let mut event_rx = event_rx;
        while let Some(event) = event_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                let _ = forward_tx.send(Event::default().data(json));
            }
        }
        let _ = drained_tx.send(());
    });

    // Run the supervisor, then emit the final frame and the terminator
    let run_handle = Arc::clone(&handle);
    tokio::spawn(async move {
        run_research(&deps, Arc::clone(&run_handle), PHASE_TIMEOUT, Some(event_tx)).await;
        let _ = drained_rx.await;

        let final_state = run_handle.read().await.clone();
        let result = StreamResult {
            query: final_state.original_query.clone(),
            synthesis: final_state.synthesis.clone(),
            sources: final_state
                .all_contexts
                .iter()
                .map(SourceModel::from)
                .collect(),
            iterations: final_state.iteration,
            error: final_state.error.clone(),
        };
        if let Ok(json) = serde_json::to_string(&result) {
            let _ = frame_tx.send(Event::default().data(json));
        }
        let _ = frame_tx.send(Event::default().data("[DONE]"));
    });

    let stream = futures::stream::unfold(frame_rx, |mut frame_rx| async move {
        frame_rx
            .recv()
            .await
            .map(|event| (Ok::<Event, Infallible>(event), frame_rx))
    });

    Ok(Sse::new(stream))
}
