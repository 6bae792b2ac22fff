//! Knowledge-graph hygiene: relation/entity validation, reports and fixes
//!
//! Validates a finished (entity set, relation set) pair against invariants
//! (no self-loops, evidence present, universal types, no orphan relations)
//! and optionally applies store-assisted fixes: self-loop deletion and
//! duplicate-entity merges via a vector index or name-similarity fallback.
//! Store failures downgrade fixes to no-ops.

use crate::traits::GraphStore;
use crate::types::{
    Entity, Relation, RELATION_TYPE_ALIASES, UNIVERSAL_ENTITY_TYPES, UNIVERSAL_RELATION_TYPES,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Violation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single hygiene rule violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HygieneViolation {
    pub rule: String,
    pub subject: String,
    pub description: String,
    pub severity: Severity,
    pub auto_fixable: bool,
}

/// Report of a hygiene analysis pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HygieneReport {
    pub total_entities: usize,
    pub total_relations: usize,
    pub self_loops: usize,
    pub missing_evidence: usize,
    pub invalid_types: usize,
    pub orphan_relations: usize,
    pub duplicate_entities: usize,
    pub violations: Vec<HygieneViolation>,
}

impl HygieneReport {
    /// Healthy ⇔ no self-loops, no orphans, no invalid types
    pub fn is_healthy(&self) -> bool {
        self.self_loops == 0 && self.orphan_relations == 0 && self.invalid_types == 0
    }

    /// Health score 0-100 over the relation count
    pub fn health_score(&self) -> f64 {
        if self.total_relations == 0 {
            return 100.0;
        }
        let issues = (self.self_loops + self.orphan_relations + self.invalid_types) as f64;
        (100.0 - issues / self.total_relations as f64 * 100.0).max(0.0)
    }
}

fn is_known_relation_type(raw: &str) -> bool {
    let upper = raw.trim().to_uppercase();
    UNIVERSAL_RELATION_TYPES.contains(&upper.as_str())
        || RELATION_TYPE_ALIASES.contains_key(upper.as_str())
}

/// Validate a relation against the hygiene rules.
///
/// Self-loops and (when required) missing evidence fail; an unknown
/// relation type is a warning only.
pub fn validate_relation(relation: &Relation, require_evidence: bool) -> (bool, String) {
    if relation.is_self_loop() {
        return (
            false,
            format!("Self-loop: {} -> {}", relation.source, relation.target),
        );
    }

    if require_evidence && relation.evidence_span.trim().is_empty() {
        return (false, "Missing evidence_span".to_string());
    }

    if !relation.relation_type.is_empty() && !is_known_relation_type(&relation.relation_type) {
        warn!(r#type = %relation.relation_type, "unknown_relation_type");
    }

    (true, "valid".to_string())
}

/// Analyze a finished extraction for hygiene issues.
pub fn analyze(entities: &[Entity], relations: &[Relation]) -> HygieneReport {
    let mut report = HygieneReport {
        total_entities: entities.len(),
        total_relations: relations.len(),
        ..Default::default()
    };

    let entity_names: HashSet<String> = entities.iter().map(|e| e.dedup_key()).collect();

    for relation in relations {
        if relation.is_self_loop() {
            report.self_loops += 1;
            report.violations.push(HygieneViolation {
                rule: "no_self_loops".to_string(),
                subject: relation.source.clone(),
                description: format!(
                    "Relation '{}' loops back onto '{}'",
                    relation.relation_type, relation.source
                ),
                severity: Severity::Error,
                auto_fixable: true,
            });
        }

        if relation.evidence_span.trim().is_empty() {
            report.missing_evidence += 1;
        }

        if !is_known_relation_type(&relation.relation_type) {
            report.invalid_types += 1;
            report.violations.push(HygieneViolation {
                rule: "valid_relation_type".to_string(),
                subject: relation.relation_type.clone(),
                description: format!("Unknown relation type '{}'", relation.relation_type),
                severity: Severity::Warning,
                auto_fixable: false,
            });
        }

        let source_known = entity_names.contains(&relation.source.trim().to_lowercase());
        let target_known = entity_names.contains(&relation.target.trim().to_lowercase());
        if !source_known || !target_known {
            report.orphan_relations += 1;
            report.violations.push(HygieneViolation {
                rule: "no_orphan_relations".to_string(),
                subject: format!("{} -> {}", relation.source, relation.target),
                description: "Relation references an entity missing from the set".to_string(),
                severity: Severity::Error,
                auto_fixable: true,
            });
        }
    }

    // Near-duplicate entities: equal lower-cased names or substring
    // containment between distinct entries
    let keys: Vec<String> = entities.iter().map(|e| e.dedup_key()).collect();
    for i in 0..keys.len() {
        for j in (i + 1)..keys.len() {
            let (a, b) = (&keys[i], &keys[j]);
            if a == b || a.contains(b.as_str()) || b.contains(a.as_str()) {
                report.duplicate_entities += 1;
            }
        }
    }

    // Entity-side rules
    for entity in entities {
        if entity.name.trim().is_empty() {
            report.violations.push(HygieneViolation {
                rule: "entity_name_nonempty".to_string(),
                subject: entity.id.clone(),
                description: "Entity name empty after trim".to_string(),
                severity: Severity::Error,
                auto_fixable: false,
            });
        }
        if !UNIVERSAL_ENTITY_TYPES.contains(&entity.entity_type.to_uppercase().as_str()) {
            report.violations.push(HygieneViolation {
                rule: "valid_entity_type".to_string(),
                subject: entity.name.clone(),
                description: format!("Entity type '{}' is not universal", entity.entity_type),
                severity: Severity::Warning,
                auto_fixable: false,
            });
        }
    }

    info!(
        total_entities = report.total_entities,
        total_relations = report.total_relations,
        self_loops = report.self_loops,
        orphan_relations = report.orphan_relations,
        invalid_types = report.invalid_types,
        is_healthy = report.is_healthy(),
        health_score = format!("{:.1}", report.health_score()),
        "graph_hygiene_analysis_complete"
    );

    report
}

/// Counters from a fix pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HygieneFixes {
    pub self_loops_removed: usize,
    pub duplicates_merged: usize,
}

const REMOVE_SELF_LOOPS_QUERY: &str = r#"
MATCH (e:base)-[r:RELATES_TO]->(e)
WHERE e.entity_name IS NOT NULL AND ($namespace IS NULL OR e.namespace_id = $namespace)
DELETE r
RETURN count(r) AS deleted
"#;

const VECTOR_DUPLICATES_QUERY: &str = r#"
MATCH (e1:base)
WHERE e1.embedding IS NOT NULL AND ($namespace IS NULL OR e1.namespace_id = $namespace)
CALL db.index.vector.queryNodes('entity_embedding_index', 10, e1.embedding)
YIELD node AS e2, score
WHERE e1 <> e2 AND score >= $threshold
RETURN e1.entity_name AS entity1, e2.entity_name AS entity2, score AS similarity
ORDER BY score DESC
LIMIT $limit
"#;

const NAME_DUPLICATES_QUERY: &str = r#"
MATCH (e1:base), (e2:base)
WHERE e1 <> e2
  AND ($namespace IS NULL OR e1.namespace_id = $namespace)
  AND toLower(e1.entity_name) < toLower(e2.entity_name)
  AND (toLower(e1.entity_name) CONTAINS toLower(e2.entity_name)
       OR toLower(e2.entity_name) CONTAINS toLower(e1.entity_name))
RETURN e1.entity_name AS entity1, e2.entity_name AS entity2, 1.0 AS similarity
ORDER BY entity1
LIMIT $limit
"#;

const TRANSFER_OUTGOING_QUERY: &str = r#"
MATCH (remove:base {entity_name: $remove_name})-[r:RELATES_TO]->(target:base)
MATCH (keep:base {entity_name: $keep_name})
WHERE NOT (keep)-[:RELATES_TO {relation_type: r.relation_type}]->(target)
CREATE (keep)-[r2:RELATES_TO]->(target)
SET r2 = properties(r)
DELETE r
"#;

const TRANSFER_INCOMING_QUERY: &str = r#"
MATCH (source:base)-[r:RELATES_TO]->(remove:base {entity_name: $remove_name})
MATCH (keep:base {entity_name: $keep_name})
WHERE NOT (source)-[:RELATES_TO {relation_type: r.relation_type}]->(keep)
CREATE (source)-[r2:RELATES_TO]->(keep)
SET r2 = properties(r)
DELETE r
"#;

const DELETE_ENTITY_QUERY: &str = r#"
MATCH (remove:base {entity_name: $remove_name})
DETACH DELETE remove
"#;

/// Hygiene service with optional store-assisted fixes.
pub struct KgHygieneService {
    store: Option<Arc<dyn GraphStore>>,
}

impl KgHygieneService {
    pub fn new(store: Option<Arc<dyn GraphStore>>) -> Self {
        Self { store }
    }

    /// Remove self-loop relations from an in-memory set.
    pub fn remove_self_loops(relations: Vec<Relation>) -> (Vec<Relation>, usize) {
        let before = relations.len();
        let kept: Vec<Relation> = relations.into_iter().filter(|r| !r.is_self_loop()).collect();
        let removed = before - kept.len();
        if removed > 0 {
            info!(count = removed, "self_loops_removed");
        }
        (kept, removed)
    }

    /// Delete self-loops in the graph store; a store failure is a logged
    /// no-op returning 0.
    pub async fn remove_self_loops_in_store(&self, namespace: Option<&str>) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let params = namespace_params(namespace);
        match store.write(REMOVE_SELF_LOOPS_QUERY, params).await {
            Ok(rows) => {
                let deleted = rows
                    .first()
                    .and_then(|row| row.get("deleted"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize;
                info!(count = deleted, "store_self_loops_removed");
                deleted
            }
            Err(e) => {
                warn!(error = %e, "remove_self_loops_failed");
                0
            }
        }
    }

    /// Find duplicate-entity candidates: vector index first, name
    /// similarity as fallback. Failures yield an empty list.
    pub async fn find_duplicate_entities(
        &self,
        similarity_threshold: f64,
        namespace: Option<&str>,
        limit: usize,
    ) -> Vec<(String, String, f64)> {
        let Some(store) = &self.store else {
            return Vec::new();
        };

        let mut params = namespace_params(namespace);
        params.insert("threshold".to_string(), serde_json::json!(similarity_threshold));
        params.insert("limit".to_string(), serde_json::json!(limit));

        if store.has_vector_index().await {
            match store.read(VECTOR_DUPLICATES_QUERY, params.clone()).await {
                Ok(rows) => {
                    debug!(count = rows.len(), "duplicate_detection_used_vector_index");
                    return parse_duplicate_rows(rows);
                }
                Err(e) => {
                    warn!(error = %e, "vector_index_query_failed_using_name_similarity");
                }
            }
        }

        match store.read(NAME_DUPLICATES_QUERY, params).await {
            Ok(rows) => {
                debug!(count = rows.len(), "duplicate_detection_used_name_similarity");
                parse_duplicate_rows(rows)
            }
            Err(e) => {
                warn!(error = %e, "find_duplicate_entities_failed");
                Vec::new()
            }
        }
    }

    /// Merge two duplicate entities, transferring incoming and outgoing
    /// edges (unique per neighbor and type) onto the kept entity, then
    /// deleting the loser. Returns false on any store failure.
    pub async fn merge_duplicate_entities(&self, keep_name: &str, remove_name: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        let mut params = HashMap::new();
        params.insert("keep_name".to_string(), serde_json::json!(keep_name));
        params.insert("remove_name".to_string(), serde_json::json!(remove_name));

        for query in [TRANSFER_OUTGOING_QUERY, TRANSFER_INCOMING_QUERY, DELETE_ENTITY_QUERY] {
            if let Err(e) = store.write(query, params.clone()).await {
                warn!(
                    keep = keep_name,
                    remove = remove_name,
                    error = %e,
                    "merge_duplicate_entities_failed"
                );
                return false;
            }
        }

        info!(keep = keep_name, removed = remove_name, "entities_merged");
        true
    }

    /// Run automatic fixes over an in-memory relation set and, when a store
    /// is wired in, the persisted graph.
    pub async fn run_hygiene_fixes(
        &self,
        relations: Vec<Relation>,
        namespace: Option<&str>,
        fix_self_loops: bool,
        merge_duplicates: bool,
        similarity_threshold: f64,
    ) -> (Vec<Relation>, HygieneFixes) {
        let mut fixes = HygieneFixes::default();

        let relations = if fix_self_loops {
            let (kept, removed) = Self::remove_self_loops(relations);
            fixes.self_loops_removed = removed;
            fixes.self_loops_removed += self.remove_self_loops_in_store(namespace).await;
            kept
        } else {
            relations
        };

        if merge_duplicates {
            let duplicates = self
                .find_duplicate_entities(similarity_threshold, namespace, 50)
                .await;
            for (entity1, entity2, _similarity) in duplicates {
                if self.merge_duplicate_entities(&entity1, &entity2).await {
                    fixes.duplicates_merged += 1;
                }
            }
        }

        info!(
            self_loops_removed = fixes.self_loops_removed,
            duplicates_merged = fixes.duplicates_merged,
            "hygiene_fixes_complete"
        );

        (relations, fixes)
    }
}

fn namespace_params(namespace: Option<&str>) -> HashMap<String, serde_json::Value> {
    let mut params = HashMap::new();
    params.insert(
        "namespace".to_string(),
        namespace.map(|n| serde_json::json!(n)).unwrap_or(serde_json::Value::Null),
    );
    params
}

fn parse_duplicate_rows(rows: Vec<HashMap<String, serde_json::Value>>) -> Vec<(String, String, f64)> {
    rows.into_iter()
        .filter_map(|row| {
            let entity1 = row.get("entity1")?.as_str()?.to_string();
            let entity2 = row.get("entity2")?.as_str()?.to_string();
            let similarity = row.get("similarity")?.as_f64()?;
            Some((entity1, entity2, similarity))
        })
        .collect()
}
