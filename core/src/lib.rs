//! # KgForge Core
//!
//! Core types, traits, and extraction logic for the KgForge knowledge graph
//! engine. This crate provides the fundamental abstractions that all
//! connectors, adapters and presentation layers build on, plus the full
//! extraction pipeline: preprocessing, NER baseline, LLM enrichment,
//! consolidation, relation extraction, gleaning and hygiene.

pub mod config;
pub mod consolidate;
pub mod cost;
pub mod driver;
pub mod errors;
pub mod gleaning;
pub mod hygiene;
pub mod ner;
pub mod parser;
pub mod preprocess;
pub mod prompts;
pub mod quality;
pub mod registry;
pub mod research;
pub mod stage;
pub mod traits;
pub mod types;

// Re-export commonly used types and traits
pub use errors::{ConfigError, CoreError, ExtractError, ResearchError, StoreError};
pub use traits::{DomainRepository, EmbeddingService, GraphStore, LlmGateway, Retriever};
pub use types::{Entity, Relation};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::*;
    pub use crate::errors::*;
    pub use crate::traits::*;
    pub use crate::types::*;
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use uuid::Uuid;
}
