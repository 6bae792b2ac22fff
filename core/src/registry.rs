//! Model registry: use-case to model resolution with a TTL cache
//!
//! Read-mostly, process-wide. Entries are cached for a TTL (default 60 s)
//! and refreshed from the backing resolver on expiry or explicit admin
//! invalidation.

use crate::errors::ExtractError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Use cases a model can be configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelUseCase {
    EntityExtraction,
    RelationExtraction,
    Planner,
    Synthesis,
    Classifier,
}

impl ModelUseCase {
    /// Built-in default model for a use case, used when no resolver entry
    /// exists
    pub fn default_model(&self) -> &'static str {
        match self {
            ModelUseCase::EntityExtraction | ModelUseCase::RelationExtraction => {
                "nemotron-3-nano:latest"
            }
            ModelUseCase::Planner | ModelUseCase::Classifier => "nemotron-3-nano:latest",
            ModelUseCase::Synthesis => "gpt-oss:20b",
        }
    }
}

/// Backing source of model assignments (admin config service)
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(&self, use_case: ModelUseCase) -> Result<Option<String>, ExtractError>;
}

/// Static resolver over a fixed table; the default when no admin service is
/// wired in.
#[derive(Debug, Default)]
pub struct StaticModelResolver {
    assignments: HashMap<ModelUseCase, String>,
}

impl StaticModelResolver {
    pub fn new(assignments: HashMap<ModelUseCase, String>) -> Self {
        Self { assignments }
    }
}

#[async_trait]
impl ModelResolver for StaticModelResolver {
    async fn resolve(&self, use_case: ModelUseCase) -> Result<Option<String>, ExtractError> {
        Ok(self.assignments.get(&use_case).cloned())
    }
}

struct CachedEntry {
    model: String,
    fetched_at: Instant,
}

/// TTL-cached registry handle.
pub struct ModelRegistry {
    resolver: Box<dyn ModelResolver>,
    ttl: Duration,
    cache: RwLock<HashMap<ModelUseCase, CachedEntry>>,
}

impl ModelRegistry {
    /// Create a registry with the default 60 s TTL
    pub fn new(resolver: Box<dyn ModelResolver>) -> Self {
        Self::with_ttl(resolver, Duration::from_secs(60))
    }

    pub fn with_ttl(resolver: Box<dyn ModelResolver>, ttl: Duration) -> Self {
        Self {
            resolver,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Model name for a use case; cached reads, guarded refresh.
    pub async fn model_for(&self, use_case: ModelUseCase) -> String {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&use_case) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return entry.model.clone();
                }
            }
        }

        let resolved = self
            .resolver
            .resolve(use_case)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| use_case.default_model().to_string());

        let mut cache = self.cache.write().await;
        cache.insert(
            use_case,
            CachedEntry {
                model: resolved.clone(),
                fetched_at: Instant::now(),
            },
        );
        debug!(?use_case, model = %resolved, "model_registry_refreshed");
        resolved
    }

    /// Drop all cached entries (admin invalidation)
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
        debug!("model_registry_invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingResolver {
        calls: Arc<AtomicU32>,
        model: Option<String>,
    }

    #[async_trait]
    impl ModelResolver for CountingResolver {
        async fn resolve(&self, _use_case: ModelUseCase) -> Result<Option<String>, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.model.clone())
        }
    }

    #[tokio::test]
    async fn test_cached_within_ttl() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ModelRegistry::new(Box::new(CountingResolver {
            calls: Arc::clone(&calls),
            model: Some("qwen3:32b".into()),
        }));

        assert_eq!(registry.model_for(ModelUseCase::EntityExtraction).await, "qwen3:32b");
        assert_eq!(registry.model_for(ModelUseCase::EntityExtraction).await, "qwen3:32b");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ModelRegistry::new(Box::new(CountingResolver {
            calls: Arc::clone(&calls),
            model: Some("qwen3:32b".into()),
        }));

        registry.model_for(ModelUseCase::Planner).await;
        registry.invalidate().await;
        registry.model_for(ModelUseCase::Planner).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_assignment_falls_back_to_default() {
        let registry = ModelRegistry::new(Box::new(CountingResolver {
            calls: Arc::new(AtomicU32::new(0)),
            model: None,
        }));
        assert_eq!(
            registry.model_for(ModelUseCase::Synthesis).await,
            ModelUseCase::Synthesis.default_model()
        );
    }
}
