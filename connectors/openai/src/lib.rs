//! OpenAI connector for KgForge LLM operations
//!
//! Cloud backend over the chat completions API. Usage cost is estimated
//! from token counts and a per-model pricing table.

use async_trait::async_trait;
use kgforge_core::errors::ExtractError;
use kgforge_core::traits::{LlmGateway, LlmResult, LlmTask};
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, info};

mod config;
mod models;

pub use config::OpenAiConfig;
use models::*;

/// OpenAI implementation of the LLM gateway
pub struct OpenAiConnector {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiConnector {
    /// Create a new OpenAI connector
    pub fn new(config: OpenAiConfig) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ExtractError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Estimate cost in USD from token usage
    fn calculate_cost(model: &str, usage: &Usage) -> f64 {
        let (input_per_1k, output_per_1k) = match model {
            "gpt-4" => (0.03, 0.06),
            "gpt-4-turbo" | "gpt-4o" => (0.01, 0.03),
            "gpt-4o-mini" => (0.00015, 0.0006),
            "gpt-3.5-turbo" => (0.001, 0.002),
            _ => (0.01, 0.03),
        };
        (usage.prompt_tokens as f64 / 1000.0) * input_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * output_per_1k
    }
}

#[async_trait]
impl LlmGateway for OpenAiConnector {
    async fn generate(&self, task: LlmTask) -> Result<LlmResult, ExtractError> {
        let model = task
            .model_override
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        debug!(model = %model, task_kind = %task.task_kind, "openai_generate_start");
        let start_time = Instant::now();

        let mut messages = Vec::new();
        if let Some(system) = task.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: task.prompt,
        });

        let request = ChatCompletionRequest {
            model: model.clone(),
            messages,
            max_tokens: task.max_tokens,
            temperature: task.temperature,
        };

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.api_base.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::Llm(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ExtractError::Llm(format!(
                "OpenAI API error {}: {}",
                status, error_text
            )));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Llm(format!("Failed to parse response: {}", e)))?;

        let content = chat_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| ExtractError::Llm("No content in response".to_string()))?;

        let latency = start_time.elapsed();
        let (tokens_input, tokens_output, cost_usd) = match &chat_response.usage {
            Some(usage) => (
                usage.prompt_tokens,
                usage.completion_tokens,
                Self::calculate_cost(&model, usage),
            ),
            None => (0, 0, 0.0),
        };

        info!(
            model = %model,
            latency_ms = latency.as_millis() as u64,
            tokens_input,
            tokens_output,
            "openai_generate_complete"
        );

        Ok(LlmResult {
            content,
            provider: "openai".to_string(),
            model,
            tokens_input,
            tokens_output,
            cost_usd,
            latency_ms: latency.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(content: &str) -> serde_json::Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 1000, "completion_tokens": 500}
        })
    }

    #[tokio::test]
    async fn test_generate_success_with_cost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("[]")))
            .mount(&server)
            .await;

        let config = OpenAiConfig::new("test-key")
            .with_api_base(server.uri())
            .with_default_model("gpt-4");
        let connector = OpenAiConnector::new(config).unwrap();

        let result = connector.generate(LlmTask::extraction("extract")).await.unwrap();
        assert_eq!(result.provider, "openai");
        assert_eq!(result.tokens_input, 1000);
        // gpt-4: 1000 input tokens at $0.03/1k + 500 output at $0.06/1k
        assert!((result.cost_usd - 0.06).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_system_prompt_included() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(wiremock::matchers::body_partial_json(json!({
                "messages": [{"role": "system", "content": "be terse"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .mount(&server)
            .await;

        let config = OpenAiConfig::new("k").with_api_base(server.uri());
        let connector = OpenAiConnector::new(config).unwrap();

        let mut task = LlmTask::extraction("extract");
        task.system_prompt = Some("be terse".to_string());
        let result = connector.generate(task).await.unwrap();
        assert_eq!(result.content, "ok");
    }

    #[tokio::test]
    async fn test_api_error_maps_to_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let config = OpenAiConfig::new("k").with_api_base(server.uri());
        let connector = OpenAiConnector::new(config).unwrap();
        let result = connector.generate(LlmTask::extraction("x")).await;
        match result {
            Err(ExtractError::Llm(message)) => {
                assert!(message.contains("429"));
            }
            other => panic!("expected LlmError, got {:?}", other.map(|r| r.content)),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let config = OpenAiConfig::new("k").with_api_base(server.uri());
        let connector = OpenAiConnector::new(config).unwrap();
        let result = connector.generate(LlmTask::extraction("x")).await;
        assert!(matches!(result, Err(ExtractError::Llm(_))));
    }
}
