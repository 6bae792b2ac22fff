//! Core data types for KgForge

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The 15 universal entity types. Every entity leaving the pipeline carries
/// one of these; anything else is alias-mapped or folded into `CONCEPT`.
pub const UNIVERSAL_ENTITY_TYPES: [&str; 15] = [
    "PERSON",
    "ORGANIZATION",
    "LOCATION",
    "TEMPORAL",
    "QUANTITY",
    "EVENT",
    "DOCUMENT",
    "CONCEPT",
    "TECHNOLOGY",
    "PRODUCT",
    "MODEL",
    "ARCHITECTURE",
    "PROCESS",
    "LANGUAGE",
    "REGULATION",
];

/// The 22 universal relation types:
/// structural (4), organizational (5), causal (4), temporal (2),
/// functional (4), semantic (2), fallback (1).
pub const UNIVERSAL_RELATION_TYPES: [&str; 22] = [
    // Structural
    "PART_OF",
    "CONTAINS",
    "INSTANCE_OF",
    "TYPE_OF",
    // Organizational
    "EMPLOYS",
    "MANAGES",
    "FOUNDED_BY",
    "OWNS",
    "LOCATED_IN",
    // Causal
    "CAUSES",
    "ENABLES",
    "REQUIRES",
    "LEADS_TO",
    // Temporal
    "PRECEDES",
    "FOLLOWS",
    // Functional
    "USES",
    "CREATES",
    "IMPLEMENTS",
    "DEPENDS_ON",
    // Semantic
    "SIMILAR_TO",
    "ASSOCIATED_WITH",
    // Fallback
    "RELATED_TO",
];

/// Aliases produced by NER labels and LLM free-typing, mapped onto the
/// universal entity set.
pub static ENTITY_TYPE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // Organizations
        ("COMPANY", "ORGANIZATION"),
        ("CORPORATION", "ORGANIZATION"),
        ("INSTITUTION", "ORGANIZATION"),
        ("UNIVERSITY", "ORGANIZATION"),
        ("AGENCY", "ORGANIZATION"),
        ("ORG", "ORGANIZATION"),
        ("NORP", "ORGANIZATION"),
        // Locations
        ("PLACE", "LOCATION"),
        ("CITY", "LOCATION"),
        ("COUNTRY", "LOCATION"),
        ("GPE", "LOCATION"),
        ("FAC", "LOCATION"),
        ("LOC", "LOCATION"),
        // People
        ("PER", "PERSON"),
        ("PEOPLE", "PERSON"),
        // Technology
        ("TOOL", "TECHNOLOGY"),
        ("SOFTWARE", "TECHNOLOGY"),
        ("FRAMEWORK", "TECHNOLOGY"),
        ("PROGRAMMING_LANGUAGE", "TECHNOLOGY"),
        ("PLATFORM", "TECHNOLOGY"),
        // Documents
        ("PAPER", "DOCUMENT"),
        ("PUBLICATION", "DOCUMENT"),
        ("BENCHMARK", "DOCUMENT"),
        ("WORK_OF_ART", "CONCEPT"),
        // Regulations
        ("LAW", "REGULATION"),
        ("POLICY", "REGULATION"),
        // Temporal
        ("DATE", "TEMPORAL"),
        ("TIME", "TEMPORAL"),
        ("YEAR", "TEMPORAL"),
        // Quantities
        ("CARDINAL", "QUANTITY"),
        ("MONEY", "QUANTITY"),
        ("PERCENT", "QUANTITY"),
        ("NUMBER", "QUANTITY"),
        // Processes
        ("ALGORITHM", "PROCESS"),
        ("METHOD", "PROCESS"),
        // Models
        ("AI_MODEL", "MODEL"),
        ("ML_MODEL", "MODEL"),
        // Misc
        ("THEORY", "CONCEPT"),
        ("IDEA", "CONCEPT"),
    ])
});

/// Aliases for relation types, folding free-form LLM output onto the
/// universal relation set.
pub static RELATION_TYPE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("RELATES_TO", "RELATED_TO"),
        ("ASSOCIATED", "ASSOCIATED_WITH"),
        ("COLLABORATES_WITH", "ASSOCIATED_WITH"),
        ("PARTNERS_WITH", "ASSOCIATED_WITH"),
        ("WORKS_WITH", "ASSOCIATED_WITH"),
        // Creation
        ("DEVELOPED", "CREATES"),
        ("CREATED", "CREATES"),
        ("CREATED_BY", "CREATES"),
        ("INVENTED", "CREATES"),
        ("PRODUCED", "CREATES"),
        ("BUILT", "CREATES"),
        ("WROTE", "CREATES"),
        ("DESIGNED", "CREATES"),
        // Founding / ownership
        ("FOUNDED", "FOUNDED_BY"),
        ("ACQUIRED", "OWNS"),
        ("ACQUIRED_BY", "OWNS"),
        ("CONTROLS", "MANAGES"),
        ("LEADS", "MANAGES"),
        // Employment
        ("WORKS_AT", "EMPLOYS"),
        ("WORKS_FOR", "EMPLOYS"),
        ("MEMBER_OF", "EMPLOYS"),
        // Location
        ("BASED_IN", "LOCATED_IN"),
        ("HEADQUARTERED_IN", "LOCATED_IN"),
        ("OPERATES_IN", "LOCATED_IN"),
        ("BORN_IN", "LOCATED_IN"),
        // Structure
        ("BELONGS_TO", "PART_OF"),
        ("SUBSIDIARY_OF", "PART_OF"),
        ("DIVISION_OF", "PART_OF"),
        ("IS_A", "INSTANCE_OF"),
        ("EXTENDS", "TYPE_OF"),
        ("VARIANT_OF", "TYPE_OF"),
        // Functional
        ("INTEGRATES", "USES"),
        ("RUNS_ON", "USES"),
        ("BUILT_WITH", "USES"),
        ("SUPPORTS", "ENABLES"),
        ("BASED_ON", "DEPENDS_ON"),
        ("DERIVED_FROM", "DEPENDS_ON"),
        // Causal
        ("RESULTS_IN", "LEADS_TO"),
        ("TRIGGERS", "LEADS_TO"),
        ("INFLUENCES", "LEADS_TO"),
    ])
});

/// Validate an entity type against the universal set.
///
/// Uppercases, applies the alias map, and falls back to `CONCEPT` for
/// anything unknown (including empty input).
pub fn validate_entity_type(raw: &str) -> &'static str {
    let upper = raw.trim().to_uppercase();
    if let Some(t) = UNIVERSAL_ENTITY_TYPES.iter().find(|t| **t == upper).copied() {
        return t;
    }
    ENTITY_TYPE_ALIASES.get(upper.as_str()).copied().unwrap_or("CONCEPT")
}

/// Validate a relation type against the universal set; unknown types fall
/// back to `RELATED_TO`.
pub fn validate_relation_type(raw: &str) -> &'static str {
    let upper = raw.trim().to_uppercase();
    if let Some(t) = UNIVERSAL_RELATION_TYPES.iter().find(|t| **t == upper).copied() {
        return t;
    }
    RELATION_TYPE_ALIASES.get(upper.as_str()).copied().unwrap_or("RELATED_TO")
}

/// An extracted entity.
///
/// `name` is the canonical surface form as it appears in text. Provenance
/// (NER label, char offsets, origin stage) travels in `properties`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Opaque identifier, unique within an extraction session
    pub id: String,
    /// Canonical surface form
    pub name: String,
    /// Entity type from the universal set (post alias-mapping)
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Short description (at most one sentence)
    #[serde(default)]
    pub description: String,
    /// Opaque source document identifier
    #[serde(default)]
    pub source_document: Option<String>,
    /// Confidence score (0.0 to 1.0)
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Provenance bag: NER label, char offsets, origin stage
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

fn default_confidence() -> f64 {
    1.0
}

impl Entity {
    /// Create a new entity with a generated id
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            entity_type: entity_type.into(),
            description: String::new(),
            source_document: None,
            confidence: 1.0,
            properties: HashMap::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the source document
    pub fn with_source_document(mut self, document_id: impl Into<String>) -> Self {
        self.source_document = Some(document_id.into());
        self
    }

    /// Set the confidence score (clamped to [0.0, 1.0])
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Add a single provenance property
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Lower-cased trimmed name used as deduplication key
    pub fn dedup_key(&self) -> String {
        self.name.trim().to_lowercase()
    }
}

/// An extracted relation between two entities (referenced by name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Opaque identifier, unique within an extraction session
    pub id: String,
    /// Source entity name
    pub source: String,
    /// Target entity name
    pub target: String,
    /// Relation type from the universal set (post alias-mapping)
    #[serde(rename = "type")]
    pub relation_type: String,
    /// One-sentence description of why the entities are related
    #[serde(default)]
    pub description: String,
    /// Substring of the input supporting the relation (may be empty)
    #[serde(default)]
    pub evidence_span: String,
    /// Opaque source document identifier
    #[serde(default)]
    pub source_document: Option<String>,
    /// Confidence score (0.0 to 1.0)
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Strength 1-10: 10 = explicit statement, 7 = strong implication,
    /// 4 = weak inference
    #[serde(default = "default_strength")]
    pub strength: u8,
}

fn default_strength() -> u8 {
    5
}

impl Relation {
    /// Create a new relation with a generated id
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            target: target.into(),
            relation_type: relation_type.into(),
            description: String::new(),
            evidence_span: String::new(),
            source_document: None,
            confidence: 1.0,
            strength: 5,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the evidence span
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence_span = evidence.into();
        self
    }

    /// Set the source document
    pub fn with_source_document(mut self, document_id: impl Into<String>) -> Self {
        self.source_document = Some(document_id.into());
        self
    }

    /// Set the strength (clamped to 1-10)
    pub fn with_strength(mut self, strength: u8) -> Self {
        self.strength = strength.clamp(1, 10);
        self
    }

    /// Case-insensitive `(source, target, TYPE)` triple used for
    /// cross-window deduplication
    pub fn triple_key(&self) -> (String, String, String) {
        (
            self.source.trim().to_lowercase(),
            self.target.trim().to_lowercase(),
            self.relation_type.trim().to_uppercase(),
        )
    }

    /// Whether the relation loops back onto its own source (case-insensitive)
    pub fn is_self_loop(&self) -> bool {
        !self.source.is_empty() && self.source.to_lowercase() == self.target.to_lowercase()
    }
}

/// Result of a full document extraction: validated entities and relations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// A single retrieval result used by the research supervisor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievedContext {
    /// Text content of the retrieved chunk
    pub text: String,
    /// Relevance score (0-1)
    pub score: f64,
    /// Retrieval channel that produced the result (vector, graph, bm25, ...)
    #[serde(default)]
    pub source_channel: String,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Entities attached by graph retrieval
    #[serde(default)]
    pub entities: Vec<String>,
    /// Relationships attached by graph retrieval
    #[serde(default)]
    pub relationships: Vec<String>,
    /// Sub-query that produced this context (set by the searcher)
    #[serde(default)]
    pub research_query: Option<String>,
    /// 1-based index of the sub-query (set by the searcher)
    #[serde(default)]
    pub query_index: Option<usize>,
}

impl RetrievedContext {
    /// Deduplication key: lower-cased first 200 characters of text
    pub fn dedup_key(&self) -> String {
        let mut key: String = self.text.chars().take(200).collect();
        key = key.trim().to_lowercase();
        key
    }
}

/// Current step of a research session, driving the progress table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrentStep {
    Pending,
    Decomposing,
    Retrieving,
    Analyzing,
    Synthesizing,
    Complete,
    Error,
}

impl CurrentStep {
    /// Fixed step-to-percent table used by the status endpoint
    pub fn progress_percent(&self) -> u8 {
        match self {
            CurrentStep::Pending => 0,
            CurrentStep::Decomposing => 20,
            CurrentStep::Retrieving => 40,
            CurrentStep::Analyzing => 60,
            CurrentStep::Synthesizing => 80,
            CurrentStep::Complete => 100,
            CurrentStep::Error => 0,
        }
    }
}

impl std::fmt::Display for CurrentStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CurrentStep::Pending => "pending",
            CurrentStep::Decomposing => "decomposing",
            CurrentStep::Retrieving => "retrieving",
            CurrentStep::Analyzing => "analyzing",
            CurrentStep::Synthesizing => "synthesizing",
            CurrentStep::Complete => "complete",
            CurrentStep::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Status of an execution step record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

/// Single execution step in the research workflow, with timing and results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: StepStatus,
    #[serde(default)]
    pub result: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
}

impl ExecutionStep {
    /// Start a new step record
    pub fn start(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            status: StepStatus::Running,
            result: HashMap::new(),
            error: None,
        }
    }

    /// Mark the step completed with a result payload
    pub fn complete(mut self, result: HashMap<String, serde_json::Value>) -> Self {
        let now = Utc::now();
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        self.completed_at = Some(now);
        self.status = StepStatus::Completed;
        self.result = result;
        self
    }

    /// Mark the step failed
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        let now = Utc::now();
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        self.completed_at = Some(now);
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self
    }
}

/// State for the research supervisor workflow.
///
/// Created at `start_deep_research`, mutated only by the supervisor nodes,
/// destroyed on cancel, completion timeout, or eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    pub original_query: String,
    pub sub_queries: Vec<String>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub all_contexts: Vec<RetrievedContext>,
    pub synthesis: String,
    pub should_continue: bool,
    pub current_step: CurrentStep,
    pub execution_steps: Vec<ExecutionStep>,
    /// Map of sub-question to intermediate answer
    pub intermediate_answers: HashMap<String, String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
}

impl ResearchState {
    /// Create the initial state for a research run
    pub fn new(query: impl Into<String>, max_iterations: u32, namespace: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(
            "namespace".to_string(),
            serde_json::Value::String(namespace.into()),
        );
        Self {
            original_query: query.into(),
            sub_queries: Vec::new(),
            iteration: 0,
            max_iterations,
            all_contexts: Vec::new(),
            synthesis: String::new(),
            should_continue: true,
            current_step: CurrentStep::Pending,
            execution_steps: Vec::new(),
            intermediate_answers: HashMap::new(),
            metadata,
            error: None,
        }
    }

    /// Namespace the session searches in
    pub fn namespace(&self) -> String {
        self.metadata
            .get("namespace")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string()
    }
}
