//! LLM usage cost ledger
//!
//! Append-only ledger with per-month aggregates keyed by
//! `(provider, model, task_kind)`. Writes are serialized behind a mutex.

use crate::traits::{LlmResult, TaskKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Aggregate usage for one (provider, model, task_kind) in one month
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub calls: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost_usd: f64,
}

/// Ledger key within a month
pub type UsageKey = (String, String, TaskKind);

/// Month-keyed cost ledger.
#[derive(Debug, Default)]
pub struct CostLedger {
    months: Mutex<HashMap<String, HashMap<UsageKey, UsageAggregate>>>,
}

/// Month bucket (`YYYY-MM`) for a timestamp
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one gateway result under the current month
    pub fn record(&self, task_kind: TaskKind, result: &LlmResult) {
        self.record_at(task_kind, result, Utc::now());
    }

    /// Record one gateway result under an explicit timestamp
    pub fn record_at(&self, task_kind: TaskKind, result: &LlmResult, at: DateTime<Utc>) {
        let mut months = self.months.lock().expect("cost ledger poisoned");
        let entry = months
            .entry(month_key(at))
            .or_default()
            .entry((result.provider.clone(), result.model.clone(), task_kind))
            .or_default();
        entry.calls += 1;
        entry.tokens_input += result.tokens_input as u64;
        entry.tokens_output += result.tokens_output as u64;
        entry.cost_usd += result.cost_usd;

        debug!(
            provider = %result.provider,
            model = %result.model,
            task_kind = %task_kind,
            tokens_input = result.tokens_input,
            tokens_output = result.tokens_output,
            cost_usd = result.cost_usd,
            "llm_usage_recorded"
        );
    }

    /// Snapshot of a month's aggregates
    pub fn month(&self, key: &str) -> HashMap<UsageKey, UsageAggregate> {
        self.months
            .lock()
            .expect("cost ledger poisoned")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Total cost across a month
    pub fn month_total_usd(&self, key: &str) -> f64 {
        self.month(key).values().map(|a| a.cost_usd).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result(provider: &str, model: &str, cost: f64) -> LlmResult {
        LlmResult {
            content: String::new(),
            provider: provider.into(),
            model: model.into(),
            tokens_input: 100,
            tokens_output: 50,
            cost_usd: cost,
            latency_ms: 10,
        }
    }

    #[test]
    fn test_record_aggregates_by_key() {
        let ledger = CostLedger::new();
        let at = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        ledger.record_at(TaskKind::Extraction, &result("ollama", "m1", 0.0), at);
        ledger.record_at(TaskKind::Extraction, &result("ollama", "m1", 0.0), at);
        ledger.record_at(TaskKind::Generation, &result("openai", "m2", 0.5), at);

        let month = ledger.month("2026-03");
        let key = ("ollama".to_string(), "m1".to_string(), TaskKind::Extraction);
        assert_eq!(month[&key].calls, 2);
        assert_eq!(month[&key].tokens_input, 200);
        assert!((ledger.month_total_usd("2026-03") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_months_are_separate_buckets() {
        let ledger = CostLedger::new();
        let march = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        ledger.record_at(TaskKind::Extraction, &result("a", "m", 1.0), march);
        ledger.record_at(TaskKind::Extraction, &result("a", "m", 2.0), april);

        assert!((ledger.month_total_usd("2026-03") - 1.0).abs() < 1e-9);
        assert!((ledger.month_total_usd("2026-04") - 2.0).abs() < 1e-9);
        assert_eq!(ledger.month_total_usd("2026-05"), 0.0);
    }

    #[test]
    fn test_month_key_format() {
        let at = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(month_key(at), "2026-12");
    }
}
