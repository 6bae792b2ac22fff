//! Neo4j adapter for KgForge
//!
//! Implements the `GraphStore` seam over the Neo4j HTTP transaction
//! endpoint. Hygiene Cypher lives in the core; this adapter executes
//! arbitrary parameterised statements and answers the vector-index probe
//! (cached for process lifetime after the first check).

use async_trait::async_trait;
use kgforge_core::errors::StoreError;
use kgforge_core::traits::{GraphStore, StoreRow};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

mod config;

pub use config::Neo4jConfig;

const VECTOR_INDEX_PROBE: &str =
    "SHOW INDEXES YIELD name, type WHERE name = 'entity_embedding_index' RETURN name";

#[derive(Debug, Deserialize)]
struct TxResponse {
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    columns: Vec<String>,
    data: Vec<TxDatum>,
}

#[derive(Debug, Deserialize)]
struct TxDatum {
    row: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// Neo4j implementation of the graph store
pub struct Neo4jStore {
    client: Client,
    config: Neo4jConfig,
    vector_index: OnceCell<bool>,
}

impl Neo4jStore {
    /// Create a new store handle
    pub fn new(config: Neo4jConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StoreError::ConnectionFailed(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            vector_index: OnceCell::new(),
        })
    }

    fn tx_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.uri.trim_end_matches('/'),
            self.config.database
        )
    }

    async fn execute(
        &self,
        query: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<StoreRow>, StoreError> {
        let body = serde_json::json!({
            "statements": [{
                "statement": query,
                "parameters": params,
            }]
        });

        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::QueryFailed(format!("HTTP {}: {}", status, text)));
        }

        let tx: TxResponse = response
            .json()
            .await
            .map_err(|e| StoreError::QueryFailed(format!("malformed response: {}", e)))?;

        if let Some(error) = tx.errors.first() {
            return Err(StoreError::QueryFailed(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        let mut rows = Vec::new();
        if let Some(result) = tx.results.first() {
            for datum in &result.data {
                let mut row = StoreRow::new();
                for (column, value) in result.columns.iter().zip(datum.row.iter()) {
                    row.insert(column.clone(), value.clone());
                }
                rows.push(row);
            }
        }

        debug!(rows = rows.len(), "neo4j_query_complete");
        Ok(rows)
    }

    async fn probe_vector_index(&self) -> bool {
        match self.execute(VECTOR_INDEX_PROBE, HashMap::new()).await {
            Ok(rows) => !rows.is_empty(),
            Err(e) => {
                warn!(error = %e, "vector_index_probe_failed");
                false
            }
        }
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
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
        *self
            .vector_index
            .get_or_init(|| self.probe_vector_index())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tx_body(columns: Vec<&str>, rows: Vec<Vec<serde_json::Value>>) -> serde_json::Value {
        json!({
            "results": [{
                "columns": columns,
                "data": rows.into_iter().map(|row| json!({"row": row})).collect::<Vec<_>>(),
            }],
            "errors": []
        })
    }

    #[tokio::test]
    async fn test_read_maps_columns_to_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/commit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tx_body(
                vec!["entity1", "entity2", "similarity"],
                vec![vec![json!("GitHub"), json!("github"), json!(0.97)]],
            )))
            .mount(&server)
            .await;

        let store = Neo4jStore::new(Neo4jConfig::new(server.uri())).unwrap();
        let rows = store
            .read("MATCH (n) RETURN n", HashMap::new())
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["entity1"], json!("GitHub"));
        assert_eq!(rows[0]["similarity"], json!(0.97));
    }

    #[tokio::test]
    async fn test_parameters_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/commit"))
            .and(body_partial_json(json!({
                "statements": [{"parameters": {"remove_name": "github"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(tx_body(vec![], vec![])))
            .mount(&server)
            .await;

        let store = Neo4jStore::new(Neo4jConfig::new(server.uri())).unwrap();
        let mut params = HashMap::new();
        params.insert("remove_name".to_string(), json!("github"));
        let result = store.write("MATCH ...", params).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cypher_error_surfaces_as_store_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/commit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [],
                "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad cypher"}]
            })))
            .mount(&server)
            .await;

        let store = Neo4jStore::new(Neo4jConfig::new(server.uri())).unwrap();
        let result = store.read("NOT CYPHER", HashMap::new()).await;
        match result {
            Err(StoreError::QueryFailed(message)) => assert!(message.contains("SyntaxError")),
            other => panic!("expected QueryFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let store = Neo4jStore::new(
            Neo4jConfig::new("http://127.0.0.1:9").with_timeout(500),
        )
        .unwrap();
        let result = store.read("RETURN 1", HashMap::new()).await;
        assert!(matches!(result, Err(StoreError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_vector_index_probe_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/commit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tx_body(
                vec!["name"],
                vec![vec![json!("entity_embedding_index")]],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let store = Neo4jStore::new(Neo4jConfig::new(server.uri())).unwrap();
        assert!(store.has_vector_index().await);
        // Second call answers from the cache; the mock allows one request
        assert!(store.has_vector_index().await);
    }
}
