//! In-memory adapters for local runs and tests
//!
//! [`InMemoryGraphStore`] keeps entities and edges in RwLock-guarded maps
//! and executes the hygiene query shapes against them; every executed query
//! is logged for assertions. [`InMemoryRetriever`] serves seeded contexts
//! per namespace with deterministic token-overlap scoring.

use async_trait::async_trait;
use kgforge_core::errors::{ExtractError, StoreError};
use kgforge_core::traits::{GraphStore, Retriever, StoreRow};
use kgforge_core::types::RetrievedContext;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// An edge between two named entities
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEdge {
    pub source: String,
    pub target: String,
    pub relation_type: String,
}

#[derive(Debug, Default)]
struct GraphData {
    /// entity name -> namespace
    entities: HashMap<String, Option<String>>,
    edges: Vec<StoredEdge>,
}

/// In-memory graph store executing the hygiene query shapes.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    data: RwLock<GraphData>,
    query_log: RwLock<Vec<String>>,
    vector_index: bool,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the (simulated) vector index
    pub fn with_vector_index(mut self) -> Self {
        self.vector_index = true;
        self
    }

    /// Seed an entity
    pub async fn add_entity(&self, name: impl Into<String>, namespace: Option<&str>) {
        self.data
            .write()
            .await
            .entities
            .insert(name.into(), namespace.map(str::to_string));
    }

    /// Seed an edge
    pub async fn add_edge(
        &self,
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
    ) {
        self.data.write().await.edges.push(StoredEdge {
            source: source.into(),
            target: target.into(),
            relation_type: relation_type.into(),
        });
    }

    /// All executed queries, in order
    pub async fn executed_queries(&self) -> Vec<String> {
        self.query_log.read().await.clone()
    }

    /// Current edges snapshot
    pub async fn edges(&self) -> Vec<StoredEdge> {
        self.data.read().await.edges.clone()
    }

    /// Current entity names snapshot
    pub async fn entity_names(&self) -> Vec<String> {
        self.data.read().await.entities.keys().cloned().collect()
    }

    fn param_str(params: &HashMap<String, serde_json::Value>, key: &str) -> Option<String> {
        params.get(key).and_then(|v| v.as_str()).map(str::to_string)
    }

    async fn execute(
        &self,
        query: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<StoreRow>, StoreError> {
        self.query_log.write().await.push(query.to_string());
        debug!(query_preview = &query[..query.len().min(60)], "in_memory_store_execute");

        let mut data = self.data.write().await;

        // Self-loop deletion
        if query.contains("DELETE r") && query.contains("->(e)") {
            let before = data.edges.len();
            data.edges
                .retain(|edge| edge.source.to_lowercase() != edge.target.to_lowercase());
            let deleted = before - data.edges.len();
            let mut row = StoreRow::new();
            row.insert("deleted".to_string(), serde_json::json!(deleted));
            return Ok(vec![row]);
        }

        // Name-similarity duplicate candidates
        if query.contains("CONTAINS toLower") {
            let names: Vec<String> = data.entities.keys().cloned().collect();
            let mut rows = Vec::new();
            for i in 0..names.len() {
                for j in 0..names.len() {
                    if i == j {
                        continue;
                    }
                    let (a, b) = (&names[i], &names[j]);
                    let (la, lb) = (a.to_lowercase(), b.to_lowercase());
                    if la < lb && (la.contains(&lb) || lb.contains(&la)) {
                        let mut row = StoreRow::new();
                        row.insert("entity1".to_string(), serde_json::json!(a));
                        row.insert("entity2".to_string(), serde_json::json!(b));
                        row.insert("similarity".to_string(), serde_json::json!(1.0));
                        rows.push(row);
                    }
                }
            }
            return Ok(rows);
        }

        // Vector duplicates need a real index; none here
        if query.contains("db.index.vector.queryNodes") {
            return Err(StoreError::VectorIndexUnavailable(
                "no vector index in memory".to_string(),
            ));
        }

        // Edge transfer during a merge
        if query.contains("CREATE (keep)-[r2:RELATES_TO]->(target)")
            || query.contains("CREATE (source)-[r2:RELATES_TO]->(keep)")
        {
            let keep = Self::param_str(&params, "keep_name").unwrap_or_default();
            let remove = Self::param_str(&params, "remove_name").unwrap_or_default();
            let outgoing = query.contains("->(target)");

            for edge in data.edges.iter_mut() {
                if outgoing && edge.source == remove {
                    edge.source = keep.clone();
                } else if !outgoing && edge.target == remove {
                    edge.target = keep.clone();
                }
            }
            // Keep edges unique per (source, target, type)
            let mut seen = std::collections::HashSet::new();
            data.edges
                .retain(|e| seen.insert((e.source.clone(), e.target.clone(), e.relation_type.clone())));
            return Ok(Vec::new());
        }

        // Entity deletion at the end of a merge
        if query.contains("DETACH DELETE remove") {
            let remove = Self::param_str(&params, "remove_name").unwrap_or_default();
            data.entities.remove(&remove);
            data.edges.retain(|e| e.source != remove && e.target != remove);
            return Ok(Vec::new());
        }

        Ok(Vec::new())
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn read(
        &self,
        query: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<StoreRow>, StoreError> {
        self.execute(query, params).await
    }

    async fn write(
        &self,
        query: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<StoreRow>, StoreError> {
        self.execute(query, params).await
    }

    async fn has_vector_index(&self) -> bool {
        self.vector_index
    }
}

/// In-memory retriever serving seeded contexts per namespace.
#[derive(Debug, Default)]
pub struct InMemoryRetriever {
    contexts: RwLock<HashMap<String, Vec<RetrievedContext>>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context into a namespace
    pub async fn add_context(&self, namespace: &str, text: impl Into<String>, score: f64) {
        let ctx = RetrievedContext {
            text: text.into(),
            score,
            source_channel: "vector".to_string(),
            ..Default::default()
        };
        self.contexts
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .push(ctx);
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn retrieve(
        &self,
        query: &str,
        namespace: &str,
        _intent: &str,
    ) -> Result<Vec<RetrievedContext>, ExtractError> {
        let contexts = self.contexts.read().await;
        let Some(seeded) = contexts.get(namespace) else {
            return Ok(Vec::new());
        };

        let query_terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        // Contexts sharing at least one query term, seeded score preserved
        let mut matched: Vec<RetrievedContext> = seeded
            .iter()
            .filter(|ctx| {
                let text = ctx.text.to_lowercase();
                query_terms.iter().any(|term| text.contains(term.as_str()))
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgforge_core::hygiene::KgHygieneService;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_store_self_loop_fix_via_hygiene_service() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.add_entity("X", None).await;
        store.add_entity("Y", None).await;
        store.add_edge("X", "x", "RELATED_TO").await;
        store.add_edge("X", "Y", "USES").await;

        let service = KgHygieneService::new(Some(store.clone() as Arc<dyn GraphStore>));
        let removed = service.remove_self_loops_in_store(None).await;
        assert_eq!(removed, 1);
        assert_eq!(store.edges().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_candidates_by_name_similarity() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.add_entity("GitHub", None).await;
        store.add_entity("GitHub Actions", None).await;
        store.add_entity("Rust", None).await;

        let service = KgHygieneService::new(Some(store.clone() as Arc<dyn GraphStore>));
        let duplicates = service.find_duplicate_entities(0.9, None, 10).await;
        assert_eq!(duplicates.len(), 1);
        assert!(duplicates[0].0.to_lowercase().contains("github"));
    }

    #[tokio::test]
    async fn test_merge_transfers_edges_and_deletes_loser() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.add_entity("GitHub", None).await;
        store.add_entity("github", None).await;
        store.add_entity("Microsoft", None).await;
        store.add_edge("Microsoft", "github", "OWNS").await;
        store.add_edge("github", "Microsoft", "PART_OF").await;

        let service = KgHygieneService::new(Some(store.clone() as Arc<dyn GraphStore>));
        let merged = service.merge_duplicate_entities("GitHub", "github").await;
        assert!(merged);

        let names = store.entity_names().await;
        assert!(!names.contains(&"github".to_string()));

        let edges = store.edges().await;
        assert!(edges.iter().any(|e| e.source == "Microsoft" && e.target == "GitHub"));
        assert!(edges.iter().any(|e| e.source == "GitHub" && e.target == "Microsoft"));
    }

    #[tokio::test]
    async fn test_retriever_matches_on_terms() {
        let retriever = InMemoryRetriever::new();
        retriever.add_context("default", "Rust is a systems language", 0.9).await;
        retriever.add_context("default", "Cooking pasta properly", 0.8).await;

        let results = retriever.retrieve("rust language", "default", "hybrid").await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].text.contains("Rust"));
    }

    #[tokio::test]
    async fn test_retriever_unknown_namespace_empty() {
        let retriever = InMemoryRetriever::new();
        let results = retriever.retrieve("anything", "missing", "hybrid").await.unwrap();
        assert!(results.is_empty());
    }
}
