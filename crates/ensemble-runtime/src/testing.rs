//! Provider stubs shared by the runtime's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ensemble_core::GenerationParams;

use crate::providers::{CompletionResponse, LlmProvider, ProviderError, ProviderFactory, ProviderRegistry};

type Responder =
    dyn Fn(usize, &str, &GenerationParams) -> Result<CompletionResponse, ProviderError> + Send + Sync;

/// A provider whose replies come from a closure of `(call_index, prompt, params)`.
pub(crate) struct StubProvider {
    responder: Box<Responder>,
    /// Per-call delays, cycled by call index.
    delays: Vec<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubProvider {
    pub(crate) fn new(
        responder: impl Fn(usize, &str, &GenerationParams) -> Result<CompletionResponse, ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            delays: Vec::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Always reply with `text`.
    pub(crate) fn fixed(text: &'static str) -> Self {
        Self::new(move |_, _, _| Ok(CompletionResponse::text(text)))
    }

    /// Always fail with `err`.
    pub(crate) fn failing(err: ProviderError) -> Self {
        Self::new(move |_, _, _| Err(err.clone()))
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        self.with_delays(vec![delay])
    }

    pub(crate) fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `complete` calls seen.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<CompletionResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delays.is_empty() {
            tokio::time::sleep(self.delays[n % self.delays.len()]).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.responder)(n, prompt, params)
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Hands out one pre-built provider for its type name.
struct StubFactory {
    provider_type: &'static str,
    provider: Arc<dyn LlmProvider>,
}

impl ProviderFactory for StubFactory {
    fn provider_type(&self) -> &'static str {
        self.provider_type
    }

    fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(self.provider.clone())
    }

    fn validate_config(&self, _config: &serde_json::Value) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// A registry where each `(type, stub)` pair is its own provider type.
pub(crate) fn stub_registry(stubs: &[(&'static str, Arc<StubProvider>)]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (provider_type, stub) in stubs {
        registry.register(Arc::new(StubFactory {
            provider_type: *provider_type,
            provider: stub.clone(),
        }));
    }
    registry
}
