//! Research synthesizer: cited answer generation
//!
//! Formats the accumulated contexts into a compact prompt under a
//! character budget and asks the model for an answer citing
//! `[Source #N]`. When the model fails, a deterministic concatenation of
//! the top-3 contexts stands in, so a non-empty answer is always produced.

use crate::errors::ResearchError;
use crate::prompts::{fill, SYNTHESIS_PROMPT};
use crate::registry::ModelUseCase;
use crate::research::graph::ResearchDeps;
use crate::traits::LlmTask;
use crate::types::RetrievedContext;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

/// Default character budget for the findings block
pub const DEFAULT_CONTEXT_BUDGET: usize = 4000;

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Format contexts as `[<Source> #N | Score: X.XX]` blocks within the
/// budget; the entry that would overflow is truncated if reasonable space
/// remains, then formatting stops.
pub fn format_contexts(contexts: &[RetrievedContext], max_length: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current_length = 0usize;

    for (idx, ctx) in contexts.iter().enumerate() {
        let text = ctx.text.trim();
        if text.is_empty() {
            continue;
        }
        let source = if ctx.source_channel.is_empty() {
            "unknown".to_string()
        } else {
            ctx.source_channel.clone()
        };

        let line = format!(
            "[{} #{} | Score: {:.2}]\n{}\n",
            capitalize(&source),
            idx + 1,
            ctx.score,
            text
        );

        if current_length + line.len() > max_length {
            let remaining = max_length.saturating_sub(current_length);
            if remaining > 100 {
                let cut = remaining.saturating_sub(50).min(text.len());
                let boundary = text
                    .char_indices()
                    .take_while(|(i, _)| *i <= cut)
                    .last()
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                let truncated = format!(
                    "[{} #{} | Score: {:.2}]\n{}...\n",
                    capitalize(&source),
                    idx + 1,
                    ctx.score,
                    &text[..boundary]
                );
                lines.push(truncated);
            }
            break;
        }

        current_length += line.len();
        lines.push(line);
    }

    lines.join("\n")
}

/// Ask the model for a cited answer over the contexts.
pub async fn synthesize(
    deps: &ResearchDeps,
    query: &str,
    contexts: &[RetrievedContext],
) -> Result<String, ResearchError> {
    if contexts.is_empty() {
        return Ok("No information found to answer the query.".to_string());
    }

    let findings = format_contexts(contexts, DEFAULT_CONTEXT_BUDGET);
    let prompt = fill(
        SYNTHESIS_PROMPT,
        &[("text", query), ("entities", findings.as_str())],
    );

    let model = deps.model_registry.model_for(ModelUseCase::Synthesis).await;
    let task = LlmTask::generation(prompt)
        .with_model(model)
        .with_max_tokens(1500)
        .with_temperature(0.3);

    let result = deps
        .gateway
        .generate(task)
        .await
        .map_err(|e| ResearchError::Synthesis(e.to_string()))?;

    info!(answer_length = result.content.len(), "synthesis_completed");
    Ok(result.content.trim().to_string())
}

/// Deterministic fallback: the top-3 contexts by score, concatenated.
/// Always non-empty.
pub fn fallback_synthesis(query: &str, contexts: &[RetrievedContext]) -> String {
    warn!("using_fallback_synthesis");

    let mut sorted: Vec<&RetrievedContext> = contexts.iter().filter(|c| !c.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    sorted.truncate(3);

    if sorted.is_empty() {
        return "No information available.".to_string();
    }

    let mut parts = vec![format!("Information found for: {}\n", query)];
    for (idx, ctx) in sorted.iter().enumerate() {
        let source = if ctx.source_channel.is_empty() {
            "unknown"
        } else {
            ctx.source_channel.as_str()
        };
        parts.push(format!("\n{}. [From {}]\n{}", idx + 1, source, ctx.text.trim()));
    }

    parts.join("\n")
}

static CITATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[Source #(\d+)\]").unwrap());

/// Extract cited source numbers from a synthesized answer.
pub fn extract_citations(synthesis: &str) -> Vec<usize> {
    let mut cited: Vec<usize> = CITATION
        .captures_iter(synthesis)
        .filter_map(|cap| cap.get(1)?.as_str().parse().ok())
        .collect();
    cited.sort_unstable();
    cited.dedup();
    cited
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(text: &str, score: f64, channel: &str) -> RetrievedContext {
        RetrievedContext {
            text: text.to_string(),
            score,
            source_channel: channel.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_contexts_shape() {
        let contexts = vec![ctx("First finding.", 0.91, "vector"), ctx("Second finding.", 0.5, "graph")];
        let formatted = format_contexts(&contexts, 4000);
        assert!(formatted.contains("[Vector #1 | Score: 0.91]"));
        assert!(formatted.contains("[Graph #2 | Score: 0.50]"));
        assert!(formatted.contains("First finding."));
    }

    #[test]
    fn test_format_respects_budget() {
        let long = "x".repeat(3000);
        let contexts = vec![ctx(&long, 0.9, "vector"), ctx(&long, 0.8, "vector"), ctx(&long, 0.7, "vector")];
        let formatted = format_contexts(&contexts, 4000);
        assert!(formatted.len() <= 4200, "formatted length {}", formatted.len());
        // Second entry gets truncated with an ellipsis, third never appears
        assert!(formatted.contains("..."));
        assert!(!formatted.contains("#3"));
    }

    #[test]
    fn test_fallback_takes_top_three_by_score() {
        let contexts = vec![
            ctx("low", 0.1, "vector"),
            ctx("high", 0.9, "graph"),
            ctx("mid", 0.5, "vector"),
            ctx("highest", 0.95, "bm25"),
        ];
        let fallback = fallback_synthesis("what?", &contexts);
        assert!(fallback.contains("highest"));
        assert!(fallback.contains("high"));
        assert!(fallback.contains("mid"));
        assert!(!fallback.contains("\nlow"));
        assert!(fallback.starts_with("Information found for: what?"));
    }

    #[test]
    fn test_fallback_never_empty() {
        assert!(!fallback_synthesis("q", &[]).is_empty());
    }

    #[test]
    fn test_extract_citations() {
        let citations =
            extract_citations("According to [Source #2], X. Also [Source #1] and [Source #2].");
        assert_eq!(citations, vec![1, 2]);
        assert!(extract_citations("no citations").is_empty());
    }
}
