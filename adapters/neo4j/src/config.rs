//! Configuration for the Neo4j adapter

use serde::{Deserialize, Serialize};

/// Neo4j HTTP transaction endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    /// Server base URL
    pub uri: String,
    /// Database name
    pub database: String,
    pub username: String,
    pub password: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Neo4jConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: "neo4j".to_string(),
            username: "neo4j".to_string(),
            password: String::new(),
            timeout_ms: 30_000,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self::new("http://localhost:7474")
    }
}
