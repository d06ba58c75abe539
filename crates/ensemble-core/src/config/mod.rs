//! Run configuration: which models to ask, which prompt format to use and
//! how to combine the answers.
//!
//! Loading goes YAML → JSON value → schema check → typed struct → semantic
//! checks. Anything that would make a run inconsistent is a
//! [`ConfigurationError`] raised before any provider is contacted.

pub mod duration;
mod schema;

pub use schema::validate_run_config;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::types::{BackoffPolicy, GenerationParams, LabelSpace, Pricing};

/// Fatal problems with a run's configuration.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Config validation failed: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown prompt format '{name}'. Available: {available:?}")]
    UnknownFormat { name: String, available: Vec<String> },

    #[error("Unknown aggregation strategy '{name}'. Available: {available:?}")]
    UnknownStrategy { name: String, available: Vec<String> },

    #[error("Invalid aggregation params for '{strategy}': {message}")]
    StrategyParams { strategy: String, message: String },

    #[error("Invalid prompt template for '{format}': {message}")]
    Template { format: String, message: String },

    #[error("Provider for model '{model_id}' is not usable: {message}")]
    Provider { model_id: String, message: String },
}

/// The prompt-format bundle: one name selects both builder and parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatConfig {
    pub name: String,

    /// Bundle-specific switches, e.g. `{ role: true, aspects: false }`.
    #[serde(default)]
    pub options: JsonValue,

    /// Replacement template text. Placeholders are checked at load time.
    #[serde(default)]
    pub template: Option<String>,
}

impl FormatConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: JsonValue::Null,
            template: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,

    #[serde(default)]
    pub params: JsonValue,
}

fn default_strategy() -> String {
    "weighted_majority".to_string()
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            params: JsonValue::Null,
        }
    }
}

/// One ensemble member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub model_id: String,

    /// Registered provider type (`openrouter`, `ollama`, `huggingface`, ...).
    pub provider: String,

    /// Name the provider knows the model by; defaults to `model_id`.
    #[serde(default)]
    pub provider_model: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    /// Vote weight in aggregation.
    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub top_p: Option<f32>,

    #[serde(default)]
    pub stop: Vec<String>,

    #[serde(default)]
    pub seed: Option<u64>,

    /// Per-attempt request timeout.
    #[serde(default = "default_timeout", with = "duration")]
    pub timeout: Duration,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    #[serde(default)]
    pub pricing: Option<Pricing>,

    /// Opaque settings handed to the provider factory (base_url, api_key, ...).
    #[serde(default)]
    pub provider_config: JsonValue,
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    256
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            provider: provider.into(),
            provider_model: None,
            version: None,
            weight: default_weight(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            top_p: None,
            stop: Vec::new(),
            seed: None,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            backoff: BackoffPolicy::default(),
            pricing: None,
            provider_config: JsonValue::Null,
        }
    }

    /// Freeze the call parameters for this model.
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            model_id: self.model_id.clone(),
            provider: self.provider.clone(),
            provider_model: self
                .provider_model
                .clone()
                .unwrap_or_else(|| self.model_id.clone()),
            version: self.version.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            stop: self.stop.clone(),
            seed: self.seed,
            timeout: self.timeout,
            max_retries: self.max_retries,
            backoff: self.backoff.clone(),
        }
    }
}

/// Everything needed to resolve one inference run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub format: FormatConfig,

    #[serde(default)]
    pub labels: LabelSpace,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Maximum provider calls in flight across all models.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Run-level deadline; pending items are cancelled when it expires.
    #[serde(default, with = "duration::option")]
    pub deadline: Option<Duration>,

    /// Ensemble members, in evaluation order.
    pub models: Vec<ModelConfig>,
}

fn default_concurrency() -> usize {
    4
}

/// Upper bound on `concurrency`; keeps semaphore permits and channel capacities sane.
pub const MAX_CONCURRENCY: usize = 1024;

impl RunConfig {
    /// Build a config programmatically; validated like a loaded one.
    pub fn new(format: FormatConfig, models: Vec<ModelConfig>) -> Result<Self, ConfigurationError> {
        let config = Self {
            format,
            labels: LabelSpace::default(),
            aggregation: AggregationConfig::default(),
            concurrency: default_concurrency(),
            deadline: None,
            models,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a run config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a run config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a run config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    fn from_value(value: JsonValue) -> Result<Self, ConfigurationError> {
        validate_run_config(&value).map_err(ConfigurationError::Schema)?;
        let config: RunConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.format.name.trim().is_empty() {
            return Err(ConfigurationError::MissingField("format.name".to_string()));
        }

        if self.models.is_empty() {
            return Err(ConfigurationError::MissingField("models".to_string()));
        }

        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigurationError::Validation(format!(
                "concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.concurrency
            )));
        }

        if self.labels.min > self.labels.max {
            return Err(ConfigurationError::Validation(format!(
                "labels.min ({}) exceeds labels.max ({})",
                self.labels.min, self.labels.max
            )));
        }

        if matches!(self.deadline, Some(d) if d.is_zero()) {
            return Err(ConfigurationError::Validation(
                "deadline must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.model_id.trim().is_empty() {
                return Err(ConfigurationError::MissingField("models[].model_id".to_string()));
            }

            if !seen.insert(model.model_id.as_str()) {
                return Err(ConfigurationError::Validation(format!(
                    "Duplicate model_id: {}",
                    model.model_id
                )));
            }

            self.validate_model(model)?;
        }

        Ok(())
    }

    fn validate_model(&self, model: &ModelConfig) -> Result<(), ConfigurationError> {
        let invalid = |message: String| {
            Err(ConfigurationError::Validation(format!(
                "model '{}': {}",
                model.model_id, message
            )))
        };

        if !model.weight.is_finite() || model.weight <= 0.0 {
            return invalid(format!("weight must be positive, got {}", model.weight));
        }

        if model.timeout.is_zero() {
            return invalid("timeout must be greater than zero".to_string());
        }

        if model.backoff.min_delay > model.backoff.max_delay {
            return invalid("backoff.min_delay exceeds backoff.max_delay".to_string());
        }

        if !model.backoff.factor.is_finite() || model.backoff.factor < 1.0 {
            return invalid(format!(
                "backoff.factor must be >= 1.0, got {}",
                model.backoff.factor
            ));
        }

        Ok(())
    }

    /// `(model_id, weight)` pairs in configured order.
    pub fn weights(&self) -> Vec<(String, f64)> {
        self.models
            .iter()
            .map(|m| (m.model_id.clone(), m.weight))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_RUN: &str = r#"
format:
  name: thomas-et-al
  options:
    aspects: true
labels: { min: 0, max: 2 }
aggregation:
  strategy: weighted_majority
  params:
    low_agreement_threshold: 0.6
concurrency: 8
deadline: 10m
models:
  - model_id: gpt-4o-mini
    provider: openrouter
    provider_model: openai/gpt-4o-mini
    weight: 2.0
    timeout: 45s
    max_retries: 5
    backoff:
      min_delay: 250ms
      max_delay: 5s
    pricing:
      input_per_million: 0.15
      output_per_million: 0.6
  - model_id: llama3
    provider: ollama
"#;

    #[test]
    fn test_parse_valid_run() {
        let config = RunConfig::from_yaml(VALID_RUN).unwrap();
        assert_eq!(config.format.name, "thomas-et-al");
        assert_eq!(config.format.options["aspects"], true);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.deadline, Some(Duration::from_secs(600)));
        assert_eq!(config.models.len(), 2);

        let first = &config.models[0];
        assert_eq!(first.weight, 2.0);
        assert_eq!(first.timeout, Duration::from_secs(45));
        assert_eq!(first.backoff.min_delay, Duration::from_millis(250));
        assert_eq!(first.backoff.factor, 2.0);

        let second = &config.models[1];
        assert_eq!(second.weight, 1.0);
        assert_eq!(second.max_retries, 3);
        assert_eq!(second.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_generation_params_defaults_provider_model() {
        let config = RunConfig::from_yaml(VALID_RUN).unwrap();
        let params = config.models[1].generation_params();
        assert_eq!(params.provider_model, "llama3");
        assert_eq!(params.provider, "ollama");

        let params = config.models[0].generation_params();
        assert_eq!(params.provider_model, "openai/gpt-4o-mini");
        assert_eq!(params.max_retries, 5);
    }

    #[test]
    fn test_duplicate_model_ids() {
        let yaml = r#"
format: { name: thomas-et-al }
models:
  - { model_id: m1, provider: ollama }
  - { model_id: m1, provider: openrouter }
"#;
        let result = RunConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigurationError::Validation(msg)) if msg.contains("Duplicate")));
    }

    #[test]
    fn test_schema_errors_surface_before_deserialization() {
        let yaml = r#"
format: { name: thomas-et-al }
models:
  - { model_id: m1, provider: ollama, weight: -1 }
"#;
        let result = RunConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigurationError::Schema(_))));
    }

    #[test]
    fn test_inverted_label_space() {
        let yaml = r#"
format: { name: thomas-et-al }
labels: { min: 3, max: 1 }
models:
  - { model_id: m1, provider: ollama }
"#;
        let result = RunConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigurationError::Validation(_))));
    }

    #[test]
    fn test_concurrency_upper_bound() {
        let yaml = r#"
format: { name: thomas-et-al }
concurrency: 4611686018427387904
models:
  - { model_id: m1, provider: ollama }
"#;
        let result = RunConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigurationError::Schema(_))));

        let mut config = RunConfig::new(
            FormatConfig::named("thomas-et-al"),
            vec![ModelConfig::new("m1", "stub")],
        )
        .unwrap();
        config.concurrency = MAX_CONCURRENCY + 1;
        assert!(matches!(config.validate(), Err(ConfigurationError::Validation(msg)) if msg.contains("concurrency")));

        config.concurrency = MAX_CONCURRENCY;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_bounds_checked() {
        let yaml = r#"
format: { name: thomas-et-al }
models:
  - model_id: m1
    provider: ollama
    backoff: { min_delay: 10s, max_delay: 1s }
"#;
        let result = RunConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigurationError::Validation(msg)) if msg.contains("backoff")));
    }

    #[test]
    fn test_programmatic_config_is_validated() {
        let result = RunConfig::new(FormatConfig::named("thomas-et-al"), Vec::new());
        assert!(matches!(result, Err(ConfigurationError::MissingField(_))));

        let config = RunConfig::new(
            FormatConfig::named("thomas-et-al"),
            vec![ModelConfig::new("a", "stub"), ModelConfig::new("b", "stub")],
        )
        .unwrap();
        assert_eq!(
            config.weights(),
            vec![("a".to_string(), 1.0), ("b".to_string(), 1.0)]
        );
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"format": {"name": "label-reasoning"}, "models": [{"model_id": "m", "provider": "p"}]}"#;
        let config = RunConfig::from_json(json).unwrap();
        assert_eq!(config.aggregation.strategy, "weighted_majority");
        assert_eq!(config.labels, LabelSpace::default());
    }
}
