//! # ensemble-runtime
//!
//! Async inference for LLM relevance ensembles.
//!
//! This crate turns a validated [`RunConfig`](ensemble_core::RunConfig) into
//! live provider clients and runs every example past every configured model,
//! writing each [`Judgement`](ensemble_core::Judgement) and
//! [`EnsembleResult`](ensemble_core::EnsembleResult) to a caller-supplied
//! [`RecordSink`] as soon as it exists.
//!
//! ## Failure model
//!
//! - Configuration problems fail the run before the first provider call.
//! - Per-item failures (prompt, provider, parse) become abstaining judgements
//!   with a warning code; they never abort the run.
//! - Sink write errors and the run deadline end the run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ensemble_runtime::{InferenceOrchestrator, NdjsonSink, NdjsonSource, RunPlan};
//!
//! let config = RunConfig::from_yaml_file("run.yaml")?;
//! let plan = RunPlan::resolve_default(&config)?;
//!
//! let orchestrator = InferenceOrchestrator::builder().plan(plan).build()?;
//! let mut sink = NdjsonSink::create("out/").await?;
//! let summary = orchestrator.run(&NdjsonSource::new("examples.ndjson"), &mut sink).await?;
//! ```

pub mod orchestrator;
pub mod plan;
pub mod providers;
pub mod resilience;
pub mod sink;
pub mod source;
pub mod summary;

#[cfg(test)]
mod testing;

pub use orchestrator::{InferenceOrchestrator, InferenceOrchestratorBuilder, OrchestratorError};
pub use plan::{ModelPlan, RunPlan};
pub use providers::{
    ApiCredential, CompletionResponse, CredentialSource, LlmProvider, ProviderError,
    ProviderFactory, ProviderRegistry, TokenUsage,
};
pub use resilience::{CallOutcome, CallProgress, ProviderClient};
pub use sink::{MemorySink, NdjsonSink, RecordSink, WriteError};
pub use source::{ExampleIter, ExampleSource, NdjsonSource, SourceError, VecSource};
pub use summary::{ModelStats, RunSummary};
