//! Error types for KgForge core operations

use thiserror::Error;

/// Main error type for KgForge core operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Graph storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors surfaced by the extraction pipeline and the LLM gateway.
///
/// The retry layer treats `Llm`, `Timeout` and `Parse` as retriable;
/// `Validation` and `Cancelled` are terminal.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("LLM backend error: {0}")]
    Llm(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("Failed to parse LLM response (strategy: {strategy}): {preview}")]
    Parse { strategy: String, preview: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal extraction error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Whether the stage executor may retry this failure.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ExtractError::Llm(_) | ExtractError::Timeout(_) | ExtractError::Parse { .. }
        )
    }

    /// Short kind tag used in `cascade_fallback` log events.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::Llm(_) => "LLMError",
            ExtractError::Timeout(_) => "TimeoutError",
            ExtractError::Parse { .. } => "ParseError",
            ExtractError::Validation(_) => "ValidationError",
            ExtractError::Cancelled(_) => "Cancelled",
            ExtractError::Internal(_) => "Internal",
        }
    }
}

/// Errors related to graph and vector store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Vector index unavailable: {0}")]
    VectorIndexUnavailable(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Errors surfaced by the research supervisor.
///
/// These never reach HTTP callers directly; terminal failures become
/// `status=error` on the session with `error` populated.
#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Research timeout after {0}s")]
    Timeout(u64),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration file error: {0}")]
    File(String),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type alias for extraction operations
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_kinds() {
        assert!(ExtractError::Llm("boom".into()).is_retriable());
        assert!(ExtractError::Timeout(300).is_retriable());
        assert!(ExtractError::Parse {
            strategy: "code_fence".into(),
            preview: "[".into()
        }
        .is_retriable());
        assert!(!ExtractError::Validation("bad".into()).is_retriable());
        assert!(!ExtractError::Cancelled("user".into()).is_retriable());
    }

    #[test]
    fn test_error_kind_tags() {
        assert_eq!(ExtractError::Timeout(1).kind(), "TimeoutError");
        assert_eq!(ExtractError::Llm("x".into()).kind(), "LLMError");
        assert_eq!(
            ExtractError::Parse {
                strategy: "regex_array".into(),
                preview: String::new()
            }
            .kind(),
            "ParseError"
        );
    }
}
