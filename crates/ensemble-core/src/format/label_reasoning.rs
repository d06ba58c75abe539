//! Plain-text verdict format: `LABEL:`, optional `CONFIDENCE:`, `REASONING:` lines.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::patterns::{keyword_grade, CONFIDENCE_LINE, LABEL_LINE, REASONING_BLOCK};
use super::{
    check_option_keys, parse_codes, FormatBundle, FormatFactory, ParsedVerdict, PromptBuildError,
    PromptBuilder, PromptTemplate, ResponseParser,
};
use crate::config::{ConfigurationError, FormatConfig};
use crate::types::{Example, LabelSpace};

pub const FORMAT_NAME: &str = "label-reasoning";

const VARIABLES: &[&str] = &["query", "document"];

const DEFAULT_TEMPLATE: &str = "You judge whether a document answers a search query.\n\n\
Query: {{ query }}\n\n\
Document:\n{{ document }}\n\n\
Respond in exactly this format:\n\
LABEL: relevant | partially | irrelevant\n\
CONFIDENCE: a number between 0 and 1\n\
REASONING: one or two sentences explaining the label\n";

/// Factory for the `label-reasoning` bundle. Takes no options.
pub struct LabelReasoningFormat;

impl FormatFactory for LabelReasoningFormat {
    fn name(&self) -> &'static str {
        FORMAT_NAME
    }

    fn variables(&self) -> &'static [&'static str] {
        VARIABLES
    }

    fn create(
        &self,
        config: &FormatConfig,
        labels: LabelSpace,
    ) -> Result<FormatBundle, ConfigurationError> {
        check_option_keys(config, &[])?;

        let source = config
            .template
            .clone()
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
        let template = PromptTemplate::new(FORMAT_NAME, source, VARIABLES)?;

        Ok(FormatBundle {
            name: FORMAT_NAME.to_string(),
            builder: Arc::new(LabelReasoningBuilder { template }),
            parser: Arc::new(LabelReasoningParser::new(labels)),
        })
    }

    fn description(&self) -> &'static str {
        "LABEL/CONFIDENCE/REASONING lines with keyword fallback"
    }
}

struct LabelReasoningBuilder {
    template: PromptTemplate,
}

impl PromptBuilder for LabelReasoningBuilder {
    fn build(&self, example: &Example) -> Result<String, PromptBuildError> {
        let mut values = BTreeMap::new();

        if self.template.uses("query") {
            let query = example
                .query_text
                .as_deref()
                .ok_or(PromptBuildError::MissingField("query_text"))?;
            values.insert("query", query);
        }

        if self.template.uses("document") {
            let doc = example
                .doc
                .as_deref()
                .ok_or(PromptBuildError::MissingField("doc"))?;
            values.insert("document", doc);
        }

        Ok(self.template.render(&values))
    }
}

/// Reads `LABEL:` (word or integer), falling back to relevance keywords
/// anywhere in the reply.
#[derive(Debug, Clone)]
pub struct LabelReasoningParser {
    labels: LabelSpace,
}

impl LabelReasoningParser {
    pub fn new(labels: LabelSpace) -> Self {
        Self { labels }
    }

    fn confidence(raw_text: &str, warnings: &mut Vec<String>) -> Option<f64> {
        let value: f64 = CONFIDENCE_LINE.captures(raw_text)?.get(1)?.as_str().parse().ok()?;
        if (0.0..=1.0).contains(&value) {
            Some(value)
        } else {
            warnings.push(parse_codes::CONFIDENCE_OUT_OF_RANGE.to_string());
            None
        }
    }

    fn rationale(raw_text: &str) -> Option<String> {
        REASONING_BLOCK
            .captures(raw_text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl ResponseParser for LabelReasoningParser {
    fn parse(&self, raw_text: &str) -> ParsedVerdict {
        if raw_text.trim().is_empty() {
            return ParsedVerdict::abstain(parse_codes::EMPTY_RESPONSE);
        }

        let mut warnings = Vec::new();
        let rationale = Self::rationale(raw_text);
        let confidence = Self::confidence(raw_text, &mut warnings);

        let labelled = LABEL_LINE
            .captures(raw_text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str());

        let grade = match labelled {
            Some(token) => token.parse::<i64>().ok().or_else(|| keyword_grade(token)),
            None => None,
        };

        let grade = match grade {
            Some(g) => Some(g),
            None => {
                let fallback = keyword_grade(raw_text);
                if fallback.is_some() {
                    warnings.push(parse_codes::FALLBACK_KEYWORD.to_string());
                }
                fallback
            }
        };

        let label = match grade {
            Some(g) => match self.labels.label(g) {
                Some(label) => Some(label),
                None => {
                    warnings.push(parse_codes::LABEL_OUT_OF_RANGE.to_string());
                    None
                }
            },
            None => {
                warnings.push(parse_codes::NO_LABEL.to_string());
                None
            }
        };

        ParsedVerdict {
            label,
            confidence,
            rationale,
            warnings,
        }
    }
}
