//! Provider registration by type name.
//!
//! Run configs name a provider type per model (`provider: ollama`); the
//! registry turns that name plus the model's `provider_config` into a live
//! [`LlmProvider`]. New backends register a factory instead of extending
//! an enum.
//!
//! ## Usage
//!
//! ```ignore
//! let mut registry = ProviderRegistry::new();
//! registry.register(Arc::new(OllamaProviderFactory));
//!
//! let provider = registry.create("ollama", &json!({"base_url": "http://gpu-box:11434"}))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Creates providers of one type from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Unique identifier, e.g. `"openrouter"`, `"ollama"`.
    fn provider_type(&self) -> &'static str;

    /// Create a provider instance from JSON configuration.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Validate configuration without creating a provider.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    /// Defaults merged underneath the user's configuration.
    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    fn description(&self) -> &'static str {
        "LLM provider"
    }
}

/// Registry of available provider factories.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider factory, replacing any with the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }

    /// Create a provider. `config` is layered over the factory defaults.
    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let factory = self.factory(provider_type)?;
        let merged = merge_config(factory.default_config(), config);
        factory.validate_config(&merged)?;
        factory.create(&merged)
    }

    /// Validate configuration for a provider type.
    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        let factory = self.factory(provider_type)?;
        factory.validate_config(&merge_config(factory.default_config(), config))
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    pub fn get_factory(&self, provider_type: &str) -> Option<&Arc<dyn ProviderFactory>> {
        self.factories.get(provider_type)
    }

    /// Create a registry with every provider compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "openrouter")]
        registry.register(Arc::new(super::OpenRouterProviderFactory));
        #[cfg(feature = "ollama")]
        registry.register(Arc::new(super::OllamaProviderFactory));
        #[cfg(feature = "huggingface")]
        registry.register(Arc::new(super::HuggingFaceProviderFactory));
        registry
    }
}

/// Shallow merge: top-level keys in `overrides` win. Non-object overrides are ignored.
fn merge_config(defaults: JsonValue, overrides: &JsonValue) -> JsonValue {
    match (defaults, overrides) {
        (JsonValue::Object(mut base), JsonValue::Object(extra)) => {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
            JsonValue::Object(base)
        }
        (JsonValue::Object(base), _) => JsonValue::Object(base),
        (_, JsonValue::Object(extra)) => JsonValue::Object(extra.clone()),
        _ => serde_json::json!({}),
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CompletionResponse;
    use async_trait::async_trait;
    use ensemble_core::GenerationParams;

    struct EchoProvider {
        name: String,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse::text(prompt))
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct EchoProviderFactory;

    impl ProviderFactory for EchoProviderFactory {
        fn provider_type(&self) -> &'static str {
            "echo"
        }

        fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            let name = config["name"].as_str().unwrap_or("echo").to_string();
            Ok(Arc::new(EchoProvider { name }))
        }

        fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
            match config.get("name") {
                Some(JsonValue::String(_)) | None => Ok(()),
                Some(_) => Err(ProviderError::NotConfigured("name must be a string".into())),
            }
        }

        fn default_config(&self) -> JsonValue {
            serde_json::json!({"name": "default-echo"})
        }
    }

    #[test]
    fn test_registry_register_and_create() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProviderFactory));

        assert!(registry.has_provider("echo"));
        assert!(!registry.has_provider("unknown"));

        let provider = registry
            .create("echo", &serde_json::json!({"name": "custom"}))
            .unwrap();
        assert_eq!(provider.name(), "custom");
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProviderFactory));

        let provider = registry.create("echo", &JsonValue::Null).unwrap();
        assert_eq!(provider.name(), "default-echo");
    }

    #[test]
    fn test_create_validates_first() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProviderFactory));

        let result = registry.create("echo", &serde_json::json!({"name": 7}));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn test_registry_unknown_provider() {
        let registry = ProviderRegistry::new();
        match registry.create("unknown", &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => {
                assert!(msg.contains("Unknown provider type"));
            }
            _ => panic!("Expected NotConfigured error"),
        }
    }

    #[test]
    fn test_merge_config() {
        let merged = merge_config(
            serde_json::json!({"a": 1, "b": 2}),
            &serde_json::json!({"b": 3, "c": 4}),
        );
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 3, "c": 4}));
    }

    #[cfg(feature = "all-providers")]
    #[test]
    fn test_with_defaults_registers_builtins() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(
            registry.available_types(),
            vec!["huggingface", "ollama", "openrouter"]
        );
    }
}
