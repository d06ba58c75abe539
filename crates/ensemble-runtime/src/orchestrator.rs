//! The inference orchestrator.
//!
//! Drives the cross product of examples × models through
//! build prompt → call provider → parse response, and aggregates each
//! example once every model has produced its judgement.
//!
//! # Architecture
//! - One dispatcher reads the example source on a blocking thread and
//!   feeds a bounded queue per model.
//! - One task per model pulls from its queue and evaluates up to
//!   `concurrency` examples at a time, emitting results in input order.
//! - A run-wide semaphore caps provider calls in flight across all models.
//! - The caller's task collects judgements, writes them to the sink as they
//!   arrive and aggregates an example when its last judgement lands.
//!
//! Every channel is bounded, so a slow sink stalls the workers instead of
//! filling memory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use ensemble_core::{
    codes, ConfigurationError, Example, FormatBundle, Judgement, LabelSpace, MAX_CONCURRENCY,
};

use crate::plan::{ModelPlan, RunPlan};
use crate::providers::TokenUsage;
use crate::resilience::CallProgress;
use crate::sink::{RecordSink, WriteError};
use crate::source::{ExampleIter, ExampleSource, SourceError};
use crate::summary::RunSummary;

/// Calls cut off by the run deadline are reported as this provider error kind.
const CANCELLED_ERROR_KIND: &str = "TransportError";

/// Errors that end a run.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Example source failed: {0}")]
    Source(#[from] SourceError),

    #[error("Sink write failed: {0}")]
    Write(#[from] WriteError),

    #[error("Run deadline exceeded after {} of {} examples", .0.ensembles, .0.examples)]
    DeadlineExceeded(Box<RunSummary>),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// A judgement leaving a model worker.
struct Emitted {
    /// Position of the example in the input.
    index: usize,
    /// Position of the model in the plan.
    position: usize,
    example: Arc<Example>,
    judgement: Judgement,
    usage: TokenUsage,
}

/// Judgements gathered so far for one example.
struct PendingExample {
    example: Arc<Example>,
    votes: Vec<Option<Judgement>>,
    remaining: usize,
}

impl PendingExample {
    fn new(example: Arc<Example>, models: usize) -> Self {
        Self {
            example,
            votes: vec![None; models],
            remaining: models,
        }
    }
}

/// Everything one model needs to evaluate examples.
struct ModelWorker {
    position: usize,
    model: ModelPlan,
    format: FormatBundle,
    labels: LabelSpace,
    semaphore: Arc<Semaphore>,
    deadline: Option<Instant>,
}

impl ModelWorker {
    /// Produce the terminal judgement for one example. Never fails.
    async fn evaluate(&self, example: &Example) -> (Judgement, TokenUsage) {
        let params = &self.model.params;

        let prompt = match self.format.builder.build(example) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(
                    model = %params.model_id,
                    query_id = %example.query_id,
                    docid = %example.docid,
                    error = %e,
                    "Prompt build failed"
                );
                let judgement = Judgement::abstention(
                    example,
                    params,
                    vec![codes::PROMPT_BUILD_FAILED.to_string()],
                );
                return (judgement, TokenUsage::default());
            }
        };

        let progress = CallProgress::default();
        let call = async {
            let _permit = self.semaphore.acquire().await.ok();
            self.model.client.send_tracked(&prompt, &progress).await
        };

        let outcome = match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => None,
                outcome = call => Some(outcome),
            },
            None => Some(call.await),
        };

        let Some(outcome) = outcome else {
            tracing::warn!(
                model = %params.model_id,
                query_id = %example.query_id,
                docid = %example.docid,
                "Run deadline reached, call cancelled"
            );
            let mut judgement = Judgement::abstention(
                example,
                params,
                vec![
                    codes::provider_error(CANCELLED_ERROR_KIND),
                    codes::RUN_CANCELLED.to_string(),
                ],
            );
            judgement.retries = progress.retries();
            judgement.latency_ms = progress.latency_ms();
            return (judgement, TokenUsage::default());
        };

        let response = match outcome.result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    model = %params.model_id,
                    query_id = %example.query_id,
                    docid = %example.docid,
                    retries = outcome.retries,
                    error = %e,
                    "Provider call failed"
                );
                let mut judgement =
                    Judgement::abstention(example, params, vec![codes::provider_error(e.kind())]);
                judgement.retries = outcome.retries;
                judgement.latency_ms = outcome.latency_ms;
                return (judgement, TokenUsage::default());
            }
        };

        let verdict = self.format.parser.parse(&response.text);
        if verdict.label.is_none() {
            tracing::warn!(
                model = %params.model_id,
                query_id = %example.query_id,
                docid = %example.docid,
                warnings = ?verdict.warnings,
                "No label in response"
            );
        } else {
            tracing::debug!(
                model = %params.model_id,
                query_id = %example.query_id,
                docid = %example.docid,
                label = ?verdict.label,
                "Judged"
            );
        }

        let mut judgement = Judgement::abstention(example, params, verdict.warnings);
        judgement.label = verdict.label;
        judgement.score = verdict.label.map(|label| self.labels.normalize(label));
        judgement.confidence = verdict.confidence;
        judgement.rationale = verdict.rationale;
        judgement.raw_text = response.text;
        judgement.retries = outcome.retries;
        judgement.latency_ms = outcome.latency_ms;
        judgement.cost_estimate = self.model.cost(outcome.usage);

        (judgement, outcome.usage)
    }
}

/// Evaluate one model's queue, `concurrency` at a time, emitting in queue order.
async fn run_model(
    worker: Arc<ModelWorker>,
    queue: mpsc::Receiver<(usize, Arc<Example>)>,
    emit: mpsc::Sender<Emitted>,
    concurrency: usize,
) {
    let worker = worker.as_ref();
    let incoming = futures::stream::unfold(queue, |mut queue| async move {
        queue.recv().await.map(|item| (item, queue))
    });

    let mut judged = std::pin::pin!(incoming
        .map(move |(index, example)| async move {
            let (judgement, usage) = worker.evaluate(&example).await;
            Emitted {
                index,
                position: worker.position,
                example,
                judgement,
                usage,
            }
        })
        .buffered(concurrency));

    while let Some(emitted) = judged.next().await {
        if emit.send(emitted).await.is_err() {
            // collector is gone; the run is being torn down
            break;
        }
    }
}

/// Feed every example to every model queue. Runs on a blocking thread.
fn dispatch(
    examples: ExampleIter,
    queues: Vec<mpsc::Sender<(usize, Arc<Example>)>>,
    limit: Option<usize>,
) -> Result<usize, SourceError> {
    let mut dispatched = 0;
    for item in examples.take(limit.unwrap_or(usize::MAX)) {
        let example = Arc::new(item?);
        for queue in &queues {
            if queue.blocking_send((dispatched, example.clone())).is_err() {
                return Ok(dispatched);
            }
        }
        dispatched += 1;
    }
    Ok(dispatched)
}

/// Runs inference for a resolved [`RunPlan`].
#[derive(Debug)]
pub struct InferenceOrchestrator {
    plan: Arc<RunPlan>,
    limit: Option<usize>,
    run_id: String,
}

impl InferenceOrchestrator {
    pub fn new(plan: RunPlan) -> Self {
        Self {
            plan: Arc::new(plan),
            limit: None,
            run_id: default_run_id(),
        }
    }

    pub fn builder() -> InferenceOrchestratorBuilder {
        InferenceOrchestratorBuilder::default()
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run the full cross product of `source` × configured models.
    ///
    /// Every judgement and every ensemble result goes to `sink` as soon as
    /// it exists. Per-item failures become abstaining judgements; the run
    /// itself only fails on source or sink errors, or when the deadline
    /// expires, in which case all records are still emitted and the summary
    /// rides along in [`OrchestratorError::DeadlineExceeded`].
    pub async fn run(
        &self,
        source: &dyn ExampleSource,
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary, OrchestratorError> {
        let plan = &self.plan;
        let models = plan.models.len();
        let concurrency = plan.concurrency.clamp(1, MAX_CONCURRENCY);
        let mut summary = RunSummary::new(self.run_id.clone(), plan.model_ids());

        tracing::info!(
            run_id = %self.run_id,
            models = models,
            concurrency,
            format = %plan.format.name,
            strategy = plan.engine.strategy_name(),
            "Starting inference run"
        );

        let examples = source.open()?;
        let deadline = plan.deadline.map(|d| Instant::now() + d);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let (emit_tx, mut emit_rx) =
            mpsc::channel::<Emitted>(concurrency.saturating_mul(models.max(1)));

        let mut workers = JoinSet::new();
        let mut queues = Vec::with_capacity(models);
        for (position, model) in plan.models.iter().enumerate() {
            let (queue_tx, queue_rx) = mpsc::channel(concurrency);
            queues.push(queue_tx);

            let worker = Arc::new(ModelWorker {
                position,
                model: model.clone(),
                format: plan.format.clone(),
                labels: plan.labels,
                semaphore: semaphore.clone(),
                deadline,
            });
            workers.spawn(run_model(worker, queue_rx, emit_tx.clone(), concurrency));
        }
        drop(emit_tx);

        let limit = self.limit;
        let dispatcher = tokio::task::spawn_blocking(move || dispatch(examples, queues, limit));

        let mut pending: HashMap<usize, PendingExample> = HashMap::new();
        while let Some(Emitted {
            index,
            position,
            example,
            judgement,
            usage,
        }) = emit_rx.recv().await
        {
            sink.write_judgement(&judgement).await?;
            summary.record_judgement(position, &judgement, usage);

            let entry = pending
                .entry(index)
                .or_insert_with(|| PendingExample::new(example, models));
            entry.votes[position] = Some(judgement);
            entry.remaining -= 1;

            if entry.remaining == 0 {
                if let Some(done) = pending.remove(&index) {
                    let votes: Vec<Judgement> = done.votes.into_iter().flatten().collect();
                    let result = plan.engine.aggregate_example(&done.example, votes);
                    sink.write_ensemble(&result).await?;
                    summary.record_ensemble(&result);
                }
            }
        }

        let dispatched = dispatcher
            .await
            .map_err(|e| OrchestratorError::Worker(e.to_string()))?;
        while let Some(joined) = workers.join_next().await {
            joined.map_err(|e| OrchestratorError::Worker(e.to_string()))?;
        }
        if !pending.is_empty() {
            return Err(OrchestratorError::Worker(format!(
                "{} examples never received every judgement",
                pending.len()
            )));
        }

        sink.flush().await?;

        summary.examples = match &dispatched {
            Ok(n) => *n,
            Err(_) => summary.ensembles,
        };
        summary.finish();

        tracing::info!(
            run_id = %summary.run_id,
            examples = summary.examples,
            judgements = summary.judgements,
            no_quorum = summary.no_quorum,
            cancelled = summary.cancelled,
            "Inference run finished"
        );
        for warning in &summary.warnings {
            tracing::warn!(run_id = %summary.run_id, warning = %warning, "Run warning");
        }

        dispatched?;
        if summary.cancelled {
            return Err(OrchestratorError::DeadlineExceeded(Box::new(summary)));
        }
        Ok(summary)
    }
}

fn default_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"))
}

/// Builder for [`InferenceOrchestrator`].
#[derive(Debug, Default)]
pub struct InferenceOrchestratorBuilder {
    plan: Option<RunPlan>,
    limit: Option<usize>,
    run_id: Option<String>,
}

impl InferenceOrchestratorBuilder {
    pub fn plan(mut self, plan: RunPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Process at most `limit` examples.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn build(self) -> Result<InferenceOrchestrator, OrchestratorError> {
        let plan = self
            .plan
            .ok_or_else(|| ConfigurationError::MissingField("plan".to_string()))?;

        Ok(InferenceOrchestrator {
            plan: Arc::new(plan),
            limit: self.limit,
            run_id: self.run_id.unwrap_or_else(default_run_id),
        })
    }
}
