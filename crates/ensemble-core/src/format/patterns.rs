//! Regex patterns shared by prompt templates and response parsers.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `{{ name }}` template placeholder.
    pub static ref PLACEHOLDER: Regex = Regex::new(
        r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}"
    ).unwrap();

    /// Flat JSON object carrying an integer-looking `"O"` field, e.g. `{"M": 2, "T": 1, "O": 1}`.
    pub static ref OVERALL_OBJECT: Regex = Regex::new(
        r#"\{[^{}]*"O"\s*:\s*-?\d+(?:\.\d+)?[^{}]*\}"#
    ).unwrap();

    /// `LABEL: relevant` / `Label: 2`, tolerating markdown emphasis.
    pub static ref LABEL_LINE: Regex = Regex::new(
        r"(?i)LABEL\s*\**\s*:\s*\**\s*([a-z]+(?:[ _-][a-z]+)?|-?\d+)"
    ).unwrap();

    /// `CONFIDENCE: 0.8`
    pub static ref CONFIDENCE_LINE: Regex = Regex::new(
        r"(?i)CONFIDENCE\s*\**\s*:\s*\**\s*(-?\d+(?:\.\d+)?)"
    ).unwrap();

    /// `REASONING: ...` up to the next `LABEL:`/`CONFIDENCE:` line or the end.
    pub static ref REASONING_BLOCK: Regex = Regex::new(
        r"(?is)REASONING\s*\**\s*:\s*\**\s*(.+?)\s*(?:\n\s*\**\s*(?:LABEL|CONFIDENCE)\s*\**\s*:|\z)"
    ).unwrap();

    pub static ref IRRELEVANT_KEYWORD: Regex = Regex::new(
        r"(?i)\b(?:irrelevant|not\s+relevant|non-relevant)\b"
    ).unwrap();

    pub static ref PARTIAL_KEYWORD: Regex = Regex::new(
        r"(?i)\bpartially(?:\s+relevant)?\b"
    ).unwrap();

    pub static ref RELEVANT_KEYWORD: Regex = Regex::new(
        r"(?i)\b(?:highly\s+)?relevant\b"
    ).unwrap();
}

/// Names of all placeholders in a template, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        if let Some(name) = caps.get(1).map(|m| m.as_str()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Map a relevance keyword to a grade on the 0/1/2 scale.
///
/// Negative phrasing is checked first so "not relevant" never reads as relevant.
pub fn keyword_grade(text: &str) -> Option<i64> {
    if IRRELEVANT_KEYWORD.is_match(text) {
        Some(0)
    } else if PARTIAL_KEYWORD.is_match(text) {
        Some(1)
    } else if RELEVANT_KEYWORD.is_match(text) {
        Some(2)
    } else {
        None
    }
}
