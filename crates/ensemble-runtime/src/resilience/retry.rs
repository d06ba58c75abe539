//! Retry with exponential backoff around a single provider.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use parking_lot::Mutex;
use tokio::time::Instant;

use ensemble_core::GenerationParams;

use crate::providers::{CompletionResponse, LlmProvider, ProviderError, TokenUsage};

/// Result of one logical call, including the attempts spent on it.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub result: Result<CompletionResponse, ProviderError>,
    /// Attempts beyond the first.
    pub retries: u32,
    /// Sum of attempt durations. Backoff sleeps are not included.
    pub latency_ms: f64,
    pub usage: TokenUsage,
}

/// Attempts and attempt time spent on a call so far.
///
/// Owned by the caller, so it can still be read when the call future is
/// dropped part way through, e.g. at a run deadline.
#[derive(Debug, Default)]
pub struct CallProgress {
    attempts: AtomicU32,
    finished_nanos: AtomicU64,
    in_flight: Mutex<Option<Instant>>,
}

impl CallProgress {
    fn begin(&self) -> u32 {
        *self.in_flight.lock() = Some(Instant::now());
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn end(&self) {
        if let Some(started) = self.in_flight.lock().take() {
            let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
            self.finished_nanos.fetch_add(nanos, Ordering::SeqCst);
        }
    }

    /// Attempts started beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Finished attempts plus the running time of one still in flight.
    pub fn latency_ms(&self) -> f64 {
        let in_flight = *self.in_flight.lock();
        let running = in_flight
            .map(|started| started.elapsed().as_nanos() as f64)
            .unwrap_or(0.0);
        (self.finished_nanos.load(Ordering::SeqCst) as f64 + running) / 1_000_000.0
    }
}

/// Stretch a backoff delay to at least the provider's `Retry-After`.
/// `None` means retries are exhausted and stays `None`.
fn honour_retry_after(err: &ProviderError, delay: Option<Duration>) -> Option<Duration> {
    match (err, delay) {
        (ProviderError::RateLimited { retry_after: Some(wait) }, Some(delay)) => {
            Some(delay.max(*wait))
        }
        (_, delay) => delay,
    }
}

/// A provider bound to one model's [`GenerationParams`].
///
/// Every attempt runs under `params.timeout`. Retryable failures
/// (`Timeout`, `RateLimited`, `Transport`) are retried up to
/// `params.max_retries` times with exponential backoff, waiting at least as
/// long as a rate limit's `Retry-After`; everything else fails on the first
/// attempt.
#[derive(Clone)]
pub struct ProviderClient {
    provider: Arc<dyn LlmProvider>,
    params: Arc<GenerationParams>,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LlmProvider>, params: Arc<GenerationParams>) -> Self {
        Self { provider, params }
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn backoff(&self) -> ExponentialBuilder {
        let policy = &self.params.backoff;
        let builder = ExponentialBuilder::default()
            .with_min_delay(policy.min_delay)
            .with_max_delay(policy.max_delay)
            .with_factor(policy.factor)
            .with_max_times(self.params.max_retries as usize);
        if policy.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Send `prompt`, retrying as configured. Never panics and never
    /// returns early: the outcome always carries the retry count.
    pub async fn send(&self, prompt: &str) -> CallOutcome {
        self.send_tracked(prompt, &CallProgress::default()).await
    }

    /// Like [`send`](Self::send), recording attempts into `progress` as
    /// they happen.
    pub async fn send_tracked(&self, prompt: &str, progress: &CallProgress) -> CallOutcome {
        let params: &GenerationParams = &self.params;
        let provider = &self.provider;

        let result = (move || async move {
            let attempt = progress.begin();

            let result = match tokio::time::timeout(params.timeout, provider.complete(prompt, params)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(params.timeout)),
            };
            progress.end();

            tracing::debug!(
                model = %params.model_id,
                attempt,
                ok = result.is_ok(),
                "provider attempt finished"
            );
            result
        })
        .retry(self.backoff())
        .sleep(tokio::time::sleep)
        .when(ProviderError::is_retryable)
        .adjust(honour_retry_after)
        .notify(|err: &ProviderError, delay: Duration| {
            tracing::warn!(
                model = %self.params.model_id,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "retrying provider call"
            );
        })
        .await;

        let usage = result.as_ref().map(|r| r.usage).unwrap_or_default();

        CallOutcome {
            result,
            retries: progress.retries(),
            latency_ms: progress.latency_ms(),
            usage,
        }
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.provider.name())
            .field("model_id", &self.params.model_id)
            .finish()
    }
}
