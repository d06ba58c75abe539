//! Search-quality-rater prompt in the style of Thomas et al., answered with
//! a JSON object whose `"O"` field carries the overall grade.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::patterns::OVERALL_OBJECT;
use super::{
    bool_option, check_option_keys, parse_codes, FormatBundle, FormatFactory, ParsedVerdict,
    PromptBuildError, PromptBuilder, PromptTemplate, ResponseParser,
};
use crate::config::{ConfigurationError, FormatConfig};
use crate::types::{Example, LabelSpace};

pub const FORMAT_NAME: &str = "thomas-et-al";

const VARIABLES: &[&str] = &["query", "page_text"];
const OPTIONS: &[&str] = &["role", "aspects"];

const ROLE_PREAMBLE: &str = "You are a search quality rater evaluating the relevance of web pages. \
Given a query and a web page, you must provide a score on an integer scale of 0 to 2 with the \
following meanings:\n\n\
2 = highly relevant, very helpful for this query\n\
1 = relevant, may be partly helpful but might contain other irrelevant content\n\
0 = not relevant, should never be shown for this query\n\n";

const TASK_INTRO: &str = "Assume that you are writing a report on the subject of the topic. \
If you would use any of the information contained in the web page in such a report, mark it 1. \
If the web page is primarily about the topic, or contains vital information about the topic, \
mark it 2. Otherwise, mark it 0.\n\n";

const BODY: &str = "Query\n\
A person has typed [{{ query }}] into a search engine.\n\n\
Result\n\
Consider the following web page.\n\
-----BEGIN WEB PAGE CONTENT-----\n\
{{ page_text }}\n\
-----END WEB PAGE CONTENT-----\n\n\
Instructions\n\
Split this problem into steps:\n\
Consider the underlying intent of the search.\n";

const ASPECT_STEPS: &str = "Measure how well the content matches a likely intent of the query (M).\n\
Measure how trustworthy the web page is (T).\n\
Consider the aspects above and the relative importance of each, and decide on a final score (O).\n\
Produce a JSON dictionary of scores without providing any reasoning. \
Example: {\"M\": 2, \"T\": 1, \"O\": 1}\n";

const SIMPLE_STEPS: &str = "Decide on a final score (O).\n\
Produce a single line of JSON without providing any reasoning. Example: {\"O\": 2}\n";

/// Factory for the `thomas-et-al` bundle.
///
/// Options: `role` (default `true`) prepends the rater role description;
/// `aspects` (default `false`) asks for M/T sub-scores before O.
pub struct ThomasFormat;

impl ThomasFormat {
    fn default_template(role: bool, aspects: bool) -> String {
        let mut text = String::new();
        if role {
            text.push_str(ROLE_PREAMBLE);
        }
        text.push_str(TASK_INTRO);
        text.push_str(BODY);
        text.push_str(if aspects { ASPECT_STEPS } else { SIMPLE_STEPS });
        text
    }
}

impl FormatFactory for ThomasFormat {
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
        check_option_keys(config, OPTIONS)?;
        let role = bool_option(config, "role", true)?;
        let aspects = bool_option(config, "aspects", false)?;

        let source = match &config.template {
            Some(text) => text.clone(),
            None => Self::default_template(role, aspects),
        };
        let template = PromptTemplate::new(FORMAT_NAME, source, VARIABLES)?;

        Ok(FormatBundle {
            name: FORMAT_NAME.to_string(),
            builder: Arc::new(ThomasBuilder { template }),
            parser: Arc::new(ThomasParser::new(labels)),
        })
    }

    fn description(&self) -> &'static str {
        "Search-quality-rater prompt answered with JSON {\"O\": grade}"
    }
}

struct ThomasBuilder {
    template: PromptTemplate,
}

impl PromptBuilder for ThomasBuilder {
    fn build(&self, example: &Example) -> Result<String, PromptBuildError> {
        let mut values = BTreeMap::new();

        if self.template.uses("query") {
            let query = example
                .query_text
                .as_deref()
                .ok_or(PromptBuildError::MissingField("query_text"))?;
            values.insert("query", query);
        }

        if self.template.uses("page_text") {
            let doc = example
                .doc
                .as_deref()
                .ok_or(PromptBuildError::MissingField("doc"))?;
            values.insert("page_text", doc);
        }

        Ok(self.template.render(&values))
    }
}

/// Parses the first flat JSON object carrying an `"O"` grade.
#[derive(Debug, Clone)]
pub struct ThomasParser {
    labels: LabelSpace,
}

impl ThomasParser {
    pub fn new(labels: LabelSpace) -> Self {
        Self { labels }
    }
}

impl ResponseParser for ThomasParser {
    fn parse(&self, raw_text: &str) -> ParsedVerdict {
        if raw_text.trim().is_empty() {
            return ParsedVerdict::abstain(parse_codes::EMPTY_RESPONSE);
        }

        let Some(found) = OVERALL_OBJECT.find(raw_text) else {
            return ParsedVerdict::abstain(parse_codes::NO_JSON_OBJECT);
        };

        let data: serde_json::Value = match serde_json::from_str(found.as_str()) {
            Ok(v) => v,
            Err(e) => {
                tracing::trace!(error = %e, "Overall-score object is not valid JSON");
                return ParsedVerdict::abstain(parse_codes::INVALID_JSON);
            }
        };

        let Some(overall) = data.get("O") else {
            return ParsedVerdict::abstain(parse_codes::MISSING_FIELD);
        };

        let Some(value) = overall.as_i64() else {
            return ParsedVerdict::abstain(parse_codes::NON_INTEGER_LABEL);
        };

        match self.labels.label(value) {
            Some(label) => ParsedVerdict::labeled(label),
            None => ParsedVerdict::abstain(parse_codes::LABEL_OUT_OF_RANGE),
        }
    }
}
