//! Hugging Face text-generation provider.
//!
//! Talks to the hosted Inference API or to a dedicated endpoint
//! (`endpoint_url`). The token is optional; public models work without one.

use super::{
    factory::ProviderFactory, http, secrets::ApiCredential, CompletionResponse, LlmProvider,
    ProviderError, TokenUsage,
};
use async_trait::async_trait;
use ensemble_core::GenerationParams;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const HF_TOKEN_ENV: &str = "HF_TOKEN";
const INFERENCE_API: &str = "https://api-inference.huggingface.co/models";

pub struct HuggingFaceProvider {
    credential: Option<ApiCredential>,
    endpoint_url: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HuggingFaceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceProvider")
            .field("credential", &self.credential)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

impl HuggingFaceProvider {
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        Ok(Self {
            credential: ApiCredential::lookup(config, "api_key", HF_TOKEN_ENV, "Hugging Face token"),
            endpoint_url: config["endpoint_url"].as_str().map(str::to_string),
            client: http::build_client()?,
        })
    }

    fn url(&self, params: &GenerationParams) -> String {
        match &self.endpoint_url {
            Some(url) => url.clone(),
            None => format!("{}/{}", INFERENCE_API, params.provider_model),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateParameters<'a> {
    max_new_tokens: u32,
    return_full_text: bool,
    do_sample: bool,
    /// Rejected by the API when sampling is off.
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Generation {
    generated_text: String,
}

#[async_trait]
impl LlmProvider for HuggingFaceProvider {
    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<CompletionResponse, ProviderError> {
        let sampling = params.temperature > 0.0;
        let request = GenerateRequest {
            inputs: prompt,
            parameters: GenerateParameters {
                max_new_tokens: params.max_tokens,
                return_full_text: false,
                do_sample: sampling,
                temperature: sampling.then_some(params.temperature),
                top_p: params.top_p,
                stop: &params.stop,
                seed: params.seed,
            },
        };

        let mut builder = self
            .client
            .post(self.url(params))
            .timeout(params.timeout)
            .json(&request);
        if let Some(credential) = &self.credential {
            builder = builder.bearer_auth(credential.expose());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| http::send_error(e, params.timeout))?;

        let body: Vec<Generation> = http::decode(response, params.timeout).await?;
        let text = body
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| ProviderError::Transport("empty generation list".to_string()))?;

        Ok(CompletionResponse {
            text,
            model: Some(params.provider_model.clone()),
            usage: TokenUsage::default(),
        })
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}

/// Factory for Hugging Face providers.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "hf_...",                          // Optional, falls back to HF_TOKEN
///   "endpoint_url": "https://xyz.endpoints..."    // Optional dedicated endpoint
/// }
/// ```
pub struct HuggingFaceProviderFactory;

impl ProviderFactory for HuggingFaceProviderFactory {
    fn provider_type(&self) -> &'static str {
        "huggingface"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(HuggingFaceProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        http::validate_base_url(config, "endpoint_url")
    }

    fn description(&self) -> &'static str {
        "Hugging Face Inference API and dedicated endpoints"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, token: Option<&str>) -> HuggingFaceProvider {
        let mut config = serde_json::json!({ "endpoint_url": format!("{}/generate", server.uri()) });
        if let Some(token) = token {
            config["api_key"] = JsonValue::String(token.to_string());
        }
        HuggingFaceProvider::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_greedy_request_omits_temperature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(header("authorization", "Bearer hf_test"))
            .and(body_json(serde_json::json!({
                "inputs": "grade it",
                "parameters": {
                    "max_new_tokens": 256,
                    "return_full_text": false,
                    "do_sample": false
                }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{"generated_text": "{\"O\": 0}"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let params = GenerationParams::new("mistral", "huggingface");
        let response = provider(&server, Some("hf_test"))
            .complete("grade it", &params)
            .await
            .unwrap();
        assert_eq!(response.text, "{\"O\": 0}");
    }

    #[tokio::test]
    async fn test_sampling_sends_temperature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "inputs": "x",
                "parameters": {
                    "max_new_tokens": 256,
                    "return_full_text": false,
                    "do_sample": true,
                    "temperature": 0.5
                }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([{"generated_text": "ok"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut params = GenerationParams::new("mistral", "huggingface");
        params.temperature = 0.5;
        let response = provider(&server, None).complete("x", &params).await.unwrap();
        assert_eq!(response.text, "ok");
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = provider(&server, None)
            .complete("x", &GenerationParams::new("m", "huggingface"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }

    #[test]
    fn test_default_url_uses_provider_model() {
        let provider = HuggingFaceProvider::from_config(&serde_json::json!({})).unwrap();
        let mut params = GenerationParams::new("m", "huggingface");
        params.provider_model = "org/model".to_string();
        assert_eq!(
            provider.url(&params),
            "https://api-inference.huggingface.co/models/org/model"
        );
    }
}
