//! Ollama connector for KgForge LLM operations
//!
//! Local single-host HTTP model runner backend. Local inference carries no
//! per-token cost; the gateway still reports token counts for the ledger.

use async_trait::async_trait;
use kgforge_core::errors::ExtractError;
use kgforge_core::traits::{LlmGateway, LlmResult, LlmTask};
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, info};

mod config;
mod models;

pub use config::OllamaConfig;
use models::*;

/// Ollama implementation of the LLM gateway
pub struct OllamaConnector {
    client: Client,
    config: OllamaConfig,
}

impl OllamaConnector {
    /// Create a new Ollama connector
    pub fn new(config: OllamaConfig) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ExtractError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn model_for(&self, task: &LlmTask) -> String {
        task.model_override
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone())
    }
}

#[async_trait]
impl LlmGateway for OllamaConnector {
    async fn generate(&self, task: LlmTask) -> Result<LlmResult, ExtractError> {
        let model = self.model_for(&task);
        debug!(model = %model, task_kind = %task.task_kind, "ollama_generate_start");
        let start_time = Instant::now();

        let request = GenerateRequest {
            model: model.clone(),
            prompt: task.prompt,
            system: task.system_prompt,
            stream: false,
            options: GenerateOptions {
                temperature: task.temperature,
                num_predict: task.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.base_url.trim_end_matches('/')))
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::Llm(format!("Ollama request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExtractError::Llm(format!(
                "Ollama API error {}: {}",
                status, error_text
            )));
        }

        let generate_response: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Llm(format!("Failed to parse Ollama response: {}", e)))?;

        let latency = start_time.elapsed();
        info!(
            model = %model,
            latency_ms = latency.as_millis() as u64,
            "ollama_generate_complete"
        );

        Ok(LlmResult {
            content: generate_response.response,
            provider: "ollama".to_string(),
            model,
            tokens_input: generate_response.prompt_eval_count.unwrap_or(0),
            tokens_output: generate_response.eval_count.unwrap_or(0),
            cost_usd: 0.0,
            latency_ms: latency.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "[{\"name\": \"Rust\", \"type\": \"TECHNOLOGY\"}]",
                "prompt_eval_count": 42,
                "eval_count": 17
            })))
            .mount(&server)
            .await;

        let connector = OllamaConnector::new(OllamaConfig::new(server.uri())).unwrap();
        let result = connector
            .generate(LlmTask::extraction("extract entities"))
            .await
            .unwrap();

        assert!(result.content.contains("Rust"));
        assert_eq!(result.provider, "ollama");
        assert_eq!(result.tokens_input, 42);
        assert_eq!(result.tokens_output, 17);
        assert_eq!(result.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_model_override_wins() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({"model": "gpt-oss:20b"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "ok"})))
            .mount(&server)
            .await;

        let connector = OllamaConnector::new(OllamaConfig::new(server.uri())).unwrap();
        let result = connector
            .generate(LlmTask::extraction("x").with_model("gpt-oss:20b"))
            .await
            .unwrap();
        assert_eq!(result.model, "gpt-oss:20b");
    }

    #[tokio::test]
    async fn test_api_error_maps_to_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let connector = OllamaConnector::new(OllamaConfig::new(server.uri())).unwrap();
        let result = connector.generate(LlmTask::extraction("x")).await;
        match result {
            Err(ExtractError::Llm(message)) => assert!(message.contains("500")),
            other => panic!("expected LlmError, got {:?}", other.map(|r| r.content)),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_maps_to_llm_error() {
        let connector =
            OllamaConnector::new(OllamaConfig::new("http://127.0.0.1:9").with_timeout(1000)).unwrap();
        let result = connector.generate(LlmTask::extraction("x")).await;
        assert!(matches!(result, Err(ExtractError::Llm(_))));
    }
}
