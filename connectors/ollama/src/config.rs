//! Configuration for the Ollama connector

use serde::{Deserialize, Serialize};

/// Ollama single-host model runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL of the Ollama server
    pub base_url: String,
    /// Model used when a task carries no override
    pub default_model: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl OllamaConfig {
    /// Create a config pointing at a base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_model: "nemotron-3-nano:latest".to_string(),
            timeout_ms: 600_000,
        }
    }

    /// Set the default model
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::new("http://localhost:11434")
    }
}
