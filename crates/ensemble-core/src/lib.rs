//! # ensemble-core
//!
//! Deterministic building blocks for judging query/document relevance with
//! an ensemble of language models.
//!
//! Nothing in this crate performs I/O or talks to a model. It defines:
//! - the record shapes ([`Example`], [`Judgement`], [`EnsembleResult`])
//! - run configuration, loaded from YAML and checked against an embedded schema
//! - prompt-format bundles pairing a [`PromptBuilder`] with its [`ResponseParser`]
//! - pluggable vote aggregation ([`AggregationEngine`])
//! - evaluation against gold labels
//!
//! ## Guarantees
//!
//! 1. **Total parsing**: response parsers never fail, they abstain with a warning code
//! 2. **Order-free aggregation**: permuting the votes never changes the decision
//! 3. **Fail-fast configuration**: unknown formats, strategies or template
//!    variables are rejected at load time
//!
//! ## Example
//!
//! ```rust,ignore
//! use ensemble_core::{AggregationEngine, FormatRegistry, RunConfig, StrategyRegistry};
//!
//! let config = RunConfig::from_yaml_file("run.yaml")?;
//! let bundle = FormatRegistry::with_defaults().resolve(&config.format, config.labels)?;
//!
//! let prompt = bundle.builder.build(&example)?;
//! let verdict = bundle.parser.parse(r#"{"O": 2}"#);
//! assert_eq!(verdict.label, Some(2));
//! ```

pub mod aggregation;
pub mod config;
pub mod format;
pub mod metrics;
pub mod types;

pub use aggregation::{
    AggregationEngine, AggregationStrategy, Decision, StrategyRegistry, Vote,
};
pub use config::{
    AggregationConfig, ConfigurationError, FormatConfig, ModelConfig, RunConfig, MAX_CONCURRENCY,
};
pub use format::{
    FormatBundle, FormatFactory, FormatRegistry, ParsedVerdict, PromptBuildError, PromptBuilder,
    ResponseParser,
};
pub use metrics::{evaluate, ClassMetrics, EvaluationMetrics};
pub use types::{
    codes, AggregationRecord, BackoffPolicy, EnsembleResult, Example, GenerationParams,
    Judgement, Label, LabelSpace, Pricing,
};
