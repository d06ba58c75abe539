//! OpenRouter chat-completions provider.
//!
//! OpenRouter fronts many hosted models behind one OpenAI-compatible API,
//! which makes it the usual backend for mixed-vendor ensembles.
//!
//! ## Security
//!
//! The API key is held as an [`ApiCredential`] and only exposed when the
//! `Authorization` header is built.

use super::{
    factory::ProviderFactory,
    http,
    secrets::{ApiCredential, CredentialSource},
    CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use ensemble_core::GenerationParams;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const OPENROUTER_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            credential: ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "OpenRouter API key",
            ),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: http::build_client()?,
        })
    }

    /// `api_key` from config, falling back to `OPENROUTER_API_KEY`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            OPENROUTER_API_KEY_ENV,
            "OpenRouter API key",
        )?;

        let base_url = config["base_url"]
            .as_str()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            credential,
            base_url,
            client: http::build_client()?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = ChatRequest {
            model: &params.provider_model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            stop: &params.stop,
            seed: params.seed,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(params.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::send_error(e, params.timeout))?;

        let body: ChatResponse = http::decode(response, params.timeout).await?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Transport("response has no choices".to_string()))?;

        let usage = body
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            model: body.model,
            usage,
        })
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

/// Factory for OpenRouter providers.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-or-...",                       // Optional, falls back to OPENROUTER_API_KEY
///   "base_url": "https://openrouter.ai/api/v1"   // Optional
/// }
/// ```
pub struct OpenRouterProviderFactory;

impl ProviderFactory for OpenRouterProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openrouter"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenRouterProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", OPENROUTER_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenRouter API key required: set 'api_key' in provider_config or {} env",
                OPENROUTER_API_KEY_ENV
            )));
        }
        http::validate_base_url(config, "base_url")
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": DEFAULT_BASE_URL })
    }

    fn description(&self) -> &'static str {
        "OpenRouter OpenAI-compatible chat completions"
    }
}
