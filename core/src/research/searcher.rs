//! Research searcher: sub-query execution over the hybrid retriever
//!
//! Each sub-query goes to the retriever once with intent "hybrid"; results
//! are tagged with the producing query and its 1-based index, then
//! deduplicated by the lower-cased first 200 characters of text. Failed
//! queries are skipped, not fatal.

use crate::traits::Retriever;
use crate::types::RetrievedContext;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Execute all sub-queries and return deduplicated contexts.
pub async fn execute_queries(
    retriever: &dyn Retriever,
    queries: &[String],
    namespace: &str,
) -> Vec<RetrievedContext> {
    info!(num_queries = queries.len(), namespace, "executing_research_queries");

    let mut all_contexts: Vec<RetrievedContext> = Vec::new();

    for (idx, query) in queries.iter().enumerate() {
        match retriever.retrieve(query, namespace, "hybrid").await {
            Ok(contexts) => {
                debug!(query_num = idx + 1, contexts_retrieved = contexts.len(), "research_query_completed");
                for mut ctx in contexts {
                    ctx.research_query = Some(query.clone());
                    ctx.query_index = Some(idx + 1);
                    all_contexts.push(ctx);
                }
            }
            Err(e) => {
                warn!(query_num = idx + 1, query = %query, error = %e, "research_query_failed");
            }
        }
    }

    let unique = deduplicate_contexts(all_contexts);
    info!(unique_contexts = unique.len(), "research_queries_completed");
    unique
}

/// Remove duplicate contexts by the lower-cased first 200 characters.
pub fn deduplicate_contexts(contexts: Vec<RetrievedContext>) -> Vec<RetrievedContext> {
    let mut seen: HashSet<String> = HashSet::new();
    contexts
        .into_iter()
        .filter(|ctx| {
            let key = ctx.dedup_key();
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}

/// Quality assessment of the accumulated contexts
#[derive(Debug, Clone, Serialize)]
pub struct SearchQuality {
    pub num_results: usize,
    pub avg_score: f64,
    pub sufficient: bool,
    pub quality: &'static str,
}

/// Evaluate search quality.
///
/// Sufficiency rule: at least 5 results with mean score above 0.5.
pub fn evaluate_quality(contexts: &[RetrievedContext]) -> SearchQuality {
    if contexts.is_empty() {
        return SearchQuality {
            num_results: 0,
            avg_score: 0.0,
            sufficient: false,
            quality: "poor",
        };
    }

    let num_results = contexts.len();
    let avg_score = contexts.iter().map(|c| c.score).sum::<f64>() / num_results as f64;

    let quality = if num_results >= 10 && avg_score > 0.7 {
        "excellent"
    } else if num_results >= 5 && avg_score > 0.5 {
        "good"
    } else if num_results >= 3 {
        "fair"
    } else {
        "poor"
    };

    SearchQuality {
        num_results,
        avg_score,
        sufficient: num_results >= 5 && avg_score > 0.5,
        quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExtractError;
    use async_trait::async_trait;

    fn ctx(text: &str, score: f64) -> RetrievedContext {
        RetrievedContext {
            text: text.to_string(),
            score,
            source_channel: "vector".to_string(),
            ..Default::default()
        }
    }

    struct FixedRetriever {
        per_query: Vec<RetrievedContext>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(
            &self,
            query: &str,
            _namespace: &str,
            intent: &str,
        ) -> Result<Vec<RetrievedContext>, ExtractError> {
            assert_eq!(intent, "hybrid");
            if self.fail_on.as_deref() == Some(query) {
                return Err(ExtractError::Llm("retriever down".into()));
            }
            Ok(self.per_query.clone())
        }
    }

    #[tokio::test]
    async fn test_contexts_tagged_with_query_and_index() {
        let retriever = FixedRetriever {
            per_query: vec![ctx("alpha context", 0.9)],
            fail_on: None,
        };
        let queries = vec!["q one".to_string(), "q two".to_string()];
        let results = execute_queries(&retriever, &queries, "default").await;

        // Identical text dedups to one entry, tagged by the first query
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].research_query.as_deref(), Some("q one"));
        assert_eq!(results[0].query_index, Some(1));
    }

    #[tokio::test]
    async fn test_failed_query_skipped() {
        let retriever = FixedRetriever {
            per_query: vec![ctx("result text", 0.8)],
            fail_on: Some("bad".to_string()),
        };
        let queries = vec!["bad".to_string(), "good".to_string()];
        let results = execute_queries(&retriever, &queries, "default").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].query_index, Some(2));
    }

    #[test]
    fn test_dedup_by_first_200_chars() {
        let long = "z".repeat(250);
        let contexts = vec![
            ctx(&long, 0.9),
            ctx(&format!("{}tail-difference", &long[..200]), 0.8),
            ctx("distinct", 0.7),
        ];
        let unique = deduplicate_contexts(contexts);
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn test_quality_labels() {
        let many_good: Vec<_> = (0..10).map(|_| ctx("t", 0.8)).collect();
        assert_eq!(evaluate_quality(&many_good).quality, "excellent");

        let five_ok: Vec<_> = (0..5).map(|_| ctx("t", 0.6)).collect();
        let q = evaluate_quality(&five_ok);
        assert_eq!(q.quality, "good");
        assert!(q.sufficient);

        let three: Vec<_> = (0..3).map(|_| ctx("t", 0.2)).collect();
        assert_eq!(evaluate_quality(&three).quality, "fair");

        assert_eq!(evaluate_quality(&[]).quality, "poor");
        assert!(!evaluate_quality(&[]).sufficient);
    }

    #[test]
    fn test_sufficiency_needs_both_count_and_score() {
        let many_weak: Vec<_> = (0..8).map(|_| ctx("t", 0.3)).collect();
        assert!(!evaluate_quality(&many_weak).sufficient);

        let few_strong: Vec<_> = (0..4).map(|_| ctx("t", 0.9)).collect();
        assert!(!evaluate_quality(&few_strong).sufficient);
    }
}
