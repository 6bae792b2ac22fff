//! Research supervisor node: continue or synthesize
//!
//! Stops the loop when an error is recorded, the iteration bound is
//! reached, or the accumulated contexts satisfy the sufficiency rule.

use crate::research::searcher::evaluate_quality;
use crate::types::ResearchState;
use tracing::info;

/// Decide whether the loop should continue searching.
pub fn should_continue(state: &ResearchState) -> bool {
    if let Some(error) = &state.error {
        info!(error = %error, "supervisor_stopping_due_to_error");
        return false;
    }

    if state.iteration >= state.max_iterations {
        info!(iteration = state.iteration, "supervisor_stopping_max_iterations");
        return false;
    }

    let quality = evaluate_quality(&state.all_contexts);
    info!(
        quality = quality.quality,
        num_results = quality.num_results,
        sufficient = quality.sufficient,
        "supervisor_quality_check"
    );

    !quality.sufficient
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RetrievedContext;

    fn state_with(iteration: u32, max_iterations: u32, contexts: usize, score: f64) -> ResearchState {
        let mut state = ResearchState::new("q", max_iterations, "default");
        state.iteration = iteration;
        state.all_contexts = (0..contexts)
            .map(|_| RetrievedContext {
                text: "context".into(),
                score,
                ..Default::default()
            })
            .collect();
        state
    }

    #[test]
    fn test_stops_on_error() {
        let mut state = state_with(0, 3, 0, 0.0);
        state.error = Some("search failed".into());
        assert!(!should_continue(&state));
    }

    #[test]
    fn test_stops_at_max_iterations() {
        let state = state_with(3, 3, 1, 0.1);
        assert!(!should_continue(&state));
    }

    #[test]
    fn test_stops_when_sufficient() {
        let state = state_with(1, 3, 6, 0.8);
        assert!(!should_continue(&state));
    }

    #[test]
    fn test_continues_when_insufficient() {
        let state = state_with(1, 3, 2, 0.4);
        assert!(should_continue(&state));
    }
}
