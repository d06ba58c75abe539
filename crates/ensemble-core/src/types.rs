//! Record shapes shared by every stage of a run.
//!
//! Data flows strictly forward: [`Example`] → [`Judgement`] (one per model)
//! → [`EnsembleResult`] (one per example).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::config::duration;

/// A relevance grade. Always a member of the run's [`LabelSpace`].
pub type Label = u8;

/// Machine-readable warning codes attached to judgements and ensemble results.
pub mod codes {
    /// The prompt could not be rendered for the example.
    pub const PROMPT_BUILD_FAILED: &str = "prompt_build_failed";

    /// The run deadline expired before this item was judged.
    pub const RUN_CANCELLED: &str = "run_cancelled";

    /// A configured model had no judgement for the pair when re-aggregating.
    pub const MISSING_JUDGEMENT: &str = "missing_judgement";

    /// More than one label shared the highest vote weight.
    pub const TIE: &str = "tie";

    /// Not enough non-abstaining votes to produce a label.
    pub const NO_QUORUM: &str = "no_quorum";

    /// Every model abstained on the example.
    pub const ALL_ABSTAINED: &str = "all_abstained";

    /// The winning label holds less weight than the configured threshold.
    pub const LOW_AGREEMENT: &str = "low_agreement";

    /// Prefix for provider failures, followed by the error kind.
    pub const PROVIDER_ERROR_PREFIX: &str = "provider_error:";

    /// Warning code for a provider failure of the given kind.
    pub fn provider_error(kind: &str) -> String {
        format!("{PROVIDER_ERROR_PREFIX}{kind}")
    }
}

/// Inclusive, ordered range of valid labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSpace {
    pub min: Label,
    pub max: Label,
}

impl Default for LabelSpace {
    fn default() -> Self {
        Self { min: 0, max: 2 }
    }
}

impl LabelSpace {
    /// Create a label space, returning `None` when `min > max`.
    pub fn new(min: Label, max: Label) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    /// Check a raw integer against the space without narrowing it first.
    pub fn contains(&self, value: i64) -> bool {
        value >= i64::from(self.min) && value <= i64::from(self.max)
    }

    /// Narrow a raw integer to a label, rejecting anything outside the space.
    pub fn label(&self, value: i64) -> Option<Label> {
        if self.contains(value) {
            Label::try_from(value).ok()
        } else {
            None
        }
    }

    pub fn labels(&self) -> RangeInclusive<Label> {
        self.min..=self.max
    }

    pub fn len(&self) -> usize {
        usize::from(self.max - self.min) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Position of a label inside the space, for matrix indexing.
    pub fn index_of(&self, label: Label) -> Option<usize> {
        self.contains(i64::from(label))
            .then(|| usize::from(label - self.min))
    }

    /// Map a label onto `[0, 1]`.
    pub fn normalize(&self, label: Label) -> f64 {
        if self.max == self.min {
            1.0
        } else {
            f64::from(label - self.min) / f64::from(self.max - self.min)
        }
    }
}

/// One query/document pair to be judged. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    #[serde(default)]
    pub dataset: String,

    pub query_id: String,

    #[serde(default)]
    pub query_text: Option<String>,

    pub docid: String,

    #[serde(default)]
    pub doc: Option<String>,

    /// Human relevance grade, when known.
    #[serde(default, alias = "gold_relevance")]
    pub gold_label: Option<Label>,
}

impl Example {
    pub fn new(query_id: impl Into<String>, docid: impl Into<String>) -> Self {
        Self {
            dataset: String::new(),
            query_id: query_id.into(),
            query_text: None,
            docid: docid.into(),
            doc: None,
            gold_label: None,
        }
    }

    pub fn with_query(mut self, text: impl Into<String>) -> Self {
        self.query_text = Some(text.into());
        self
    }

    pub fn with_doc(mut self, text: impl Into<String>) -> Self {
        self.doc = Some(text.into());
        self
    }

    pub fn with_gold(mut self, label: Label) -> Self {
        self.gold_label = Some(label);
        self
    }
}

/// Exponential backoff bounds for retrying a provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffPolicy {
    #[serde(default = "default_min_delay", with = "duration")]
    pub min_delay: Duration,

    #[serde(default = "default_max_delay", with = "duration")]
    pub max_delay: Duration,

    #[serde(default = "default_factor")]
    pub factor: f32,

    /// Randomize each delay to avoid synchronized retries.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_min_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(20)
}

fn default_factor() -> f32 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            factor: default_factor(),
            jitter: default_jitter(),
        }
    }
}

/// Per-million-token prices used for cost estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (f64::from(prompt_tokens) / 1_000_000.0) * self.input_per_million
            + (f64::from(completion_tokens) / 1_000_000.0) * self.output_per_million
    }
}

/// Immutable per-model call parameters, shared by every request to that model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    /// Identity used in judgements and vote weighting.
    pub model_id: String,
    /// Registered provider type, e.g. `openrouter`.
    pub provider: String,
    /// Model name as the provider knows it.
    pub provider_model: String,
    pub version: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub seed: Option<u64>,
    #[serde(with = "duration")]
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl GenerationParams {
    /// Deterministic defaults for a model served by `provider`.
    pub fn new(model_id: impl Into<String>, provider: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            provider_model: model_id.clone(),
            model_id,
            provider: provider.into(),
            version: None,
            temperature: 0.0,
            max_tokens: 256,
            top_p: None,
            stop: Vec::new(),
            seed: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// One model's verdict on one example. Terminal: created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub model_id: String,
    pub provider: String,
    #[serde(default)]
    pub version: Option<String>,
    pub query_id: String,
    pub docid: String,

    /// `None` means the model abstained.
    pub label: Option<Label>,
    /// Label normalized onto `[0, 1]`.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale: Option<String>,

    /// Full provider response. Empty only when no call succeeded.
    #[serde(default)]
    pub raw_text: String,

    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub cost_estimate: Option<f64>,
}

impl Judgement {
    /// An abstaining judgement for `params` on `example`.
    pub fn abstention(example: &Example, params: &GenerationParams, warnings: Vec<String>) -> Self {
        Self {
            model_id: params.model_id.clone(),
            provider: params.provider.clone(),
            version: params.version.clone(),
            query_id: example.query_id.clone(),
            docid: example.docid.clone(),
            label: None,
            score: None,
            confidence: None,
            rationale: None,
            raw_text: String::new(),
            latency_ms: 0.0,
            retries: 0,
            warnings,
            cost_estimate: None,
        }
    }

    pub fn is_abstention(&self) -> bool {
        self.label.is_none()
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w == code)
    }

    /// Kind of the provider failure recorded on this judgement, if any.
    pub fn provider_error_kind(&self) -> Option<&str> {
        self.warnings
            .iter()
            .find_map(|w| w.strip_prefix(codes::PROVIDER_ERROR_PREFIX))
    }
}

/// Strategy name and the resolved parameters it ran with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRecord {
    pub strategy: String,
    #[serde(default)]
    pub params: JsonValue,
}

/// The ensemble decision for one example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub query_id: String,
    pub docid: String,
    #[serde(default)]
    pub gold_label: Option<Label>,
    pub final_label: Option<Label>,
    pub final_confidence: f64,

    /// Every scheduled model, abstentions included, in configured model order.
    pub per_model_votes: Vec<Judgement>,
    pub aggregation: AggregationRecord,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl EnsembleResult {
    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w == code)
    }
}
