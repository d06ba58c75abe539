//! Provider abstractions: "send a rendered prompt, receive raw text".
//!
//! Each adapter maps its transport failures onto the small [`ProviderError`]
//! taxonomy so that retry policy can be decided without knowing which
//! provider produced the error.
//!
//! ## Security
//!
//! All HTTP providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use ensemble_core::GenerationParams;

mod factory;
pub mod secrets;

#[cfg(any(feature = "openrouter", feature = "ollama", feature = "huggingface"))]
mod http;

#[cfg(feature = "huggingface")]
mod huggingface;
#[cfg(feature = "ollama")]
mod ollama;
#[cfg(feature = "openrouter")]
mod openrouter;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "huggingface")]
pub use huggingface::{HuggingFaceProvider, HuggingFaceProviderFactory};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaProvider, OllamaProviderFactory};
#[cfg(feature = "openrouter")]
pub use openrouter::{OpenRouterProvider, OpenRouterProviderFactory};

/// Errors from LLM providers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {status} - {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Stable name used in `provider_error:<kind>` warnings.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "Timeout",
            ProviderError::RateLimited { .. } => "RateLimited",
            ProviderError::Transport(_) => "TransportError",
            ProviderError::Auth(_) => "AuthError",
            ProviderError::InvalidRequest { .. } => "InvalidRequest",
            ProviderError::NotConfigured(_) => "NotConfigured",
        }
    }

    /// Whether another attempt could succeed. Auth and request-shape
    /// failures will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_) | ProviderError::RateLimited { .. } | ProviderError::Transport(_)
        )
    }
}

/// Token usage from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Raw reply from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    /// Generated text, unparsed.
    pub text: String,

    /// Model name reported by the provider, if any.
    pub model: Option<String>,

    pub usage: TokenUsage,
}

impl CompletionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            usage: TokenUsage::default(),
        }
    }
}

/// A model backend.
///
/// This is the ONLY place network calls to models are made. Retries,
/// timeouts and backoff live one layer up, in
/// [`ProviderClient`](crate::resilience::ProviderClient).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one prompt and return the raw completion text.
    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Cheap readiness check, no model call.
    async fn health_check(&self) -> bool {
        true
    }

    /// Provider name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Transport("reset".into()).is_retryable());
        assert!(!ProviderError::Auth("bad key".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!ProviderError::NotConfigured("x".into()).is_retryable());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ProviderError::RateLimited { retry_after: None }.kind(), "RateLimited");
        assert_eq!(ProviderError::Transport(String::new()).kind(), "TransportError");
        assert_eq!(ProviderError::Auth(String::new()).kind(), "AuthError");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }
}
