//! Prompt formats.
//!
//! A format is a named bundle of a [`PromptBuilder`] and the
//! [`ResponseParser`] that understands replies to its prompts. The two are
//! only ever resolved together, through [`FormatRegistry::resolve`], so a
//! prompt asking for one answer shape can never be paired with a parser
//! expecting another.

mod label_reasoning;
mod patterns;
mod template;
mod thomas;

pub use label_reasoning::{LabelReasoningFormat, LabelReasoningParser};
pub use template::PromptTemplate;
pub use thomas::{ThomasFormat, ThomasParser};

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigurationError, FormatConfig};
use crate::types::{Example, Label, LabelSpace};

/// Failure to render a prompt for one example.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptBuildError {
    #[error("Example is missing required field: {0}")]
    MissingField(&'static str),
}

/// Warning codes emitted by parsers. Parsers never fail; they abstain with one of these.
pub mod parse_codes {
    pub const EMPTY_RESPONSE: &str = "parse:empty_response";
    pub const NO_JSON_OBJECT: &str = "parse:no_json_object";
    pub const INVALID_JSON: &str = "parse:invalid_json";
    pub const MISSING_FIELD: &str = "parse:missing_field";
    pub const NON_INTEGER_LABEL: &str = "parse:non_integer_label";
    pub const LABEL_OUT_OF_RANGE: &str = "parse:label_out_of_range";
    pub const NO_LABEL: &str = "parse:no_label";
    pub const FALLBACK_KEYWORD: &str = "parse:fallback_keyword";
    pub const CONFIDENCE_OUT_OF_RANGE: &str = "parse:confidence_out_of_range";
}

/// What a parser could extract from one raw reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedVerdict {
    pub label: Option<Label>,
    pub confidence: Option<f64>,
    pub rationale: Option<String>,
    pub warnings: Vec<String>,
}

impl ParsedVerdict {
    /// An abstention carrying a single warning.
    pub fn abstain(code: &str) -> Self {
        Self {
            warnings: vec![code.to_string()],
            ..Default::default()
        }
    }

    pub fn labeled(label: Label) -> Self {
        Self {
            label: Some(label),
            ..Default::default()
        }
    }
}

/// Renders an example into provider-ready prompt text. Pure, no I/O.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, example: &Example) -> Result<String, PromptBuildError>;
}

/// Extracts a verdict from raw model text. Pure, total, no I/O.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, raw_text: &str) -> ParsedVerdict;
}

/// A resolved builder/parser pair.
#[derive(Clone)]
pub struct FormatBundle {
    pub name: String,
    pub builder: Arc<dyn PromptBuilder>,
    pub parser: Arc<dyn ResponseParser>,
}

impl std::fmt::Debug for FormatBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatBundle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Creates a [`FormatBundle`] from its configuration.
pub trait FormatFactory: Send + Sync {
    /// Name used in `format.name`.
    fn name(&self) -> &'static str;

    /// Template variables this format can fill.
    fn variables(&self) -> &'static [&'static str];

    /// Validate options and the optional template override, then build the pair.
    fn create(
        &self,
        config: &FormatConfig,
        labels: LabelSpace,
    ) -> Result<FormatBundle, ConfigurationError>;

    fn description(&self) -> &'static str {
        "Prompt format"
    }
}

/// Registry of prompt formats by name.
#[derive(Default)]
pub struct FormatRegistry {
    factories: BTreeMap<String, Arc<dyn FormatFactory>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in formats.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ThomasFormat));
        registry.register(Arc::new(LabelReasoningFormat));
        registry
    }

    /// Register a format, replacing any previous one with the same name.
    pub fn register(&mut self, factory: Arc<dyn FormatFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    /// Resolve the bundle for a run. Called once, before dispatch.
    pub fn resolve(
        &self,
        config: &FormatConfig,
        labels: LabelSpace,
    ) -> Result<FormatBundle, ConfigurationError> {
        let factory = self.factories.get(&config.name).ok_or_else(|| {
            ConfigurationError::UnknownFormat {
                name: config.name.clone(),
                available: self.available().into_iter().map(String::from).collect(),
            }
        })?;

        let bundle = factory.create(config, labels)?;
        tracing::debug!(format = %bundle.name, "Resolved prompt format");
        Ok(bundle)
    }

    pub fn available(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FormatFactory>> {
        self.factories.get(name)
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.available())
            .finish()
    }
}

/// Read a boolean option, defaulting when absent.
pub(crate) fn bool_option(
    config: &FormatConfig,
    key: &str,
    default: bool,
) -> Result<bool, ConfigurationError> {
    match config.options.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ConfigurationError::Template {
            format: config.name.clone(),
            message: format!("option '{}' must be a boolean, got {}", key, other),
        }),
    }
}

/// Reject option keys the format does not understand.
pub(crate) fn check_option_keys(
    config: &FormatConfig,
    known: &[&str],
) -> Result<(), ConfigurationError> {
    match &config.options {
        serde_json::Value::Null => Ok(()),
        serde_json::Value::Object(map) => {
            if let Some(key) = map.keys().find(|k| !known.contains(&k.as_str())) {
                return Err(ConfigurationError::Template {
                    format: config.name.clone(),
                    message: format!("unknown option '{}'", key),
                });
            }
            Ok(())
        }
        other => Err(ConfigurationError::Template {
            format: config.name.clone(),
            message: format!("options must be a mapping, got {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults() {
        let registry = FormatRegistry::with_defaults();
        assert_eq!(registry.available(), vec!["label-reasoning", "thomas-et-al"]);
    }

    #[test]
    fn test_unknown_format_is_configuration_error() {
        let registry = FormatRegistry::with_defaults();
        let result = registry.resolve(&FormatConfig::named("nope"), LabelSpace::default());
        match result {
            Err(ConfigurationError::UnknownFormat { name, available }) => {
                assert_eq!(name, "nope");
                assert_eq!(available.len(), 2);
            }
            other => panic!("Expected UnknownFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_bundle_pairs_builder_with_parser() {
        let registry = FormatRegistry::with_defaults();
        let bundle = registry
            .resolve(&FormatConfig::named("thomas-et-al"), LabelSpace::default())
            .unwrap();
        assert_eq!(bundle.name, "thomas-et-al");

        let example = Example::new("q1", "d1").with_query("rust").with_doc("Rust is fast.");
        let prompt = bundle.builder.build(&example).unwrap();
        assert!(prompt.contains("Rust is fast."));
        assert_eq!(bundle.parser.parse(r#"{"O": 1}"#).label, Some(1));
    }

    #[test]
    fn test_options_must_be_mapping() {
        let mut config = FormatConfig::named("thomas-et-al");
        config.options = serde_json::json!(["aspects"]);
        let result = FormatRegistry::with_defaults().resolve(&config, LabelSpace::default());
        assert!(matches!(result, Err(ConfigurationError::Template { .. })));
    }
}
