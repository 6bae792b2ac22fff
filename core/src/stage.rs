//! Stage execution: timeouts, bounded retries, result caps
//!
//! Every extraction call runs under a deadline and a retry policy derived
//! from its rank or stage configuration. Retries apply only to retriable
//! failures (LLM, timeout, parse); backoff is exponential and clamped to
//! [1 s, 8 s].

use crate::config::{CascadeRankConfig, PipelineStageConfig};
use crate::errors::{ExtractError, ExtractResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum entities accepted from a single chunk
pub const MAX_ENTITIES_PER_CHUNK: usize = 50;
/// Maximum relations accepted from a single chunk
pub const MAX_RELATIONS_PER_CHUNK: usize = 100;

/// Retry policy for one rank or stage
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts (first try + retries); 0 behaves as 1
    pub max_attempts: u32,
    /// Exponential backoff multiplier in seconds
    pub backoff_multiplier: u64,
}

impl RetryPolicy {
    /// Backoff before attempt `i` (1-based retry index), clamped to
    /// [1 s, 8 s]: `multiplier · 2^(i−1)`.
    pub fn delay(&self, retry_index: u32) -> Duration {
        let exp = retry_index.saturating_sub(1).min(16);
        let secs = self.backoff_multiplier.saturating_mul(1u64 << exp);
        Duration::from_secs(secs.clamp(1, 8))
    }
}

impl From<&CascadeRankConfig> for RetryPolicy {
    fn from(rank: &CascadeRankConfig) -> Self {
        Self {
            max_attempts: rank.max_retries.max(1),
            backoff_multiplier: rank.retry_backoff_multiplier,
        }
    }
}

impl From<&PipelineStageConfig> for RetryPolicy {
    fn from(stage: &PipelineStageConfig) -> Self {
        Self {
            max_attempts: stage.max_retries.max(1),
            backoff_multiplier: 1,
        }
    }
}

/// Run an async operation under a deadline; a breach maps to
/// `ExtractError::Timeout`.
pub async fn with_timeout<T, F>(timeout_s: u64, fut: F) -> ExtractResult<T>
where
    F: Future<Output = ExtractResult<T>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_s), fut).await {
        Ok(result) => result,
        Err(_) => Err(ExtractError::Timeout(timeout_s)),
    }
}

/// Retry an operation under a policy.
///
/// Only retriable errors are retried; the final error is returned after the
/// attempt budget is spent.
pub async fn retry_async<T, F, Fut>(policy: RetryPolicy, mut op: F) -> ExtractResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExtractResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error: Option<ExtractError> = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retriable() || attempt == attempts {
                    return Err(e);
                }
                let delay = policy.delay(attempt);
                warn!(
                    attempt,
                    max_attempts = attempts,
                    reason = e.kind(),
                    delay_s = delay.as_secs(),
                    "extraction_attempt_failed_retrying"
                );
                last_error = Some(e);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ExtractError::Internal("retry budget exhausted".into())))
}

/// Truncate a result list to its per-chunk cap
pub fn cap_results<T>(mut items: Vec<T>, cap: usize, what: &str) -> Vec<T> {
    if items.len() > cap {
        warn!(count = items.len(), max_allowed = cap, what, "per_chunk_cap_exceeded");
        items.truncate(cap);
    } else {
        debug!(count = items.len(), what, "results_within_cap");
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_schedule_clamped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_multiplier: 1,
        };
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        // Clamped at 8s
        assert_eq!(policy.delay(5), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_multiplier() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 3,
        };
        assert_eq!(policy.delay(1), Duration::from_secs(3));
        assert_eq!(policy.delay(2), Duration::from_secs(6));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 1,
        };
        let result = retry_async(policy, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ExtractError::Llm("unreachable".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 1,
        };
        let result: ExtractResult<()> = retry_async(policy, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExtractError::Timeout(10))
            }
        })
        .await;

        assert!(matches!(result, Err(ExtractError::Timeout(10))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retriable_errors_fail_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 1,
        };
        let result: ExtractResult<()> = retry_async(policy, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExtractError::Validation("bad input".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ExtractError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_extract_error() {
        let result: ExtractResult<()> = with_timeout(1, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ExtractError::Timeout(1))));
    }

    #[test]
    fn test_cap_results_truncates() {
        let items: Vec<u32> = (0..120).collect();
        let capped = cap_results(items, MAX_RELATIONS_PER_CHUNK, "relations");
        assert_eq!(capped.len(), 100);
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(cap_results(items, MAX_ENTITIES_PER_CHUNK, "entities").len(), 10);
    }
}
