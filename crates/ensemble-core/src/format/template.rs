//! Minimal `{{ variable }}` prompt templates.

use std::collections::BTreeMap;

use super::patterns::{placeholders, PLACEHOLDER};
use crate::config::ConfigurationError;

/// A prompt template whose placeholders were checked against what its
/// format can supply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    variables: Vec<String>,
}

impl PromptTemplate {
    /// Parse `source`, rejecting placeholders outside `allowed`.
    pub fn new(
        format: &str,
        source: impl Into<String>,
        allowed: &[&str],
    ) -> Result<Self, ConfigurationError> {
        let source = source.into();
        let variables: Vec<String> = placeholders(&source)
            .into_iter()
            .map(String::from)
            .collect();

        if let Some(unknown) = variables.iter().find(|v| !allowed.contains(&v.as_str())) {
            return Err(ConfigurationError::Template {
                format: format.to_string(),
                message: format!(
                    "unknown variable '{{{{ {} }}}}', available: {:?}",
                    unknown, allowed
                ),
            });
        }

        if source.contains("{{") && variables.is_empty() {
            return Err(ConfigurationError::Template {
                format: format.to_string(),
                message: "malformed placeholder".to_string(),
            });
        }

        Ok(Self { source, variables })
    }

    pub fn uses(&self, variable: &str) -> bool {
        self.variables.iter().any(|v| v == variable)
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitute every placeholder. Callers supply all used variables.
    pub fn render(&self, values: &BTreeMap<&str, &str>) -> String {
        PLACEHOLDER
            .replace_all(&self.source, |caps: &regex::Captures<'_>| {
                values
                    .get(&caps[1])
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            })
            .into_owned()
    }
}
