//! Ollama provider for locally served models.
//!
//! Uses the non-streaming `/api/generate` endpoint. No credential is needed.

use super::{factory::ProviderFactory, http, CompletionResponse, LlmProvider, ProviderError, TokenUsage};
use async_trait::async_trait;
use ensemble_core::GenerationParams;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug)]
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http::build_client()?,
        })
    }

    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        Self::new(config["base_url"].as_str().unwrap_or(DEFAULT_BASE_URL))
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions<'a> {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = GenerateRequest {
            model: &params.provider_model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
                top_p: params.top_p,
                stop: &params.stop,
                seed: params.seed,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(params.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::send_error(e, params.timeout))?;

        let body: GenerateResponse = http::decode(response, params.timeout).await?;

        Ok(CompletionResponse {
            text: body.response,
            model: body.model,
            usage: TokenUsage {
                prompt_tokens: body.prompt_eval_count,
                completion_tokens: body.eval_count,
            },
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Factory for Ollama providers.
///
/// ## Configuration Format
/// ```json
/// { "base_url": "http://localhost:11434" }
/// ```
pub struct OllamaProviderFactory;

impl ProviderFactory for OllamaProviderFactory {
    fn provider_type(&self) -> &'static str {
        "ollama"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OllamaProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        http::validate_base_url(config, "base_url")
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": DEFAULT_BASE_URL })
    }

    fn description(&self) -> &'static str {
        "Ollama local model server"
    }
}
