//! Resolving a [`RunConfig`] into live components.
//!
//! Everything named by the config (format bundle, providers, strategy) is
//! looked up here, once, so a bad binding fails the run before the first
//! provider call.

use std::sync::Arc;
use std::time::Duration;

use ensemble_core::{
    AggregationEngine, ConfigurationError, FormatBundle, FormatRegistry, GenerationParams,
    LabelSpace, Pricing, RunConfig, StrategyRegistry,
};

use crate::providers::{ProviderRegistry, TokenUsage};
use crate::resilience::ProviderClient;

/// One ensemble member, ready to call.
#[derive(Debug, Clone)]
pub struct ModelPlan {
    pub params: Arc<GenerationParams>,
    pub client: ProviderClient,
    pub weight: f64,
    pub pricing: Option<Pricing>,
}

impl ModelPlan {
    pub fn model_id(&self) -> &str {
        &self.params.model_id
    }

    pub fn cost(&self, usage: TokenUsage) -> Option<f64> {
        self.pricing
            .map(|p| p.cost(usage.prompt_tokens, usage.completion_tokens))
    }
}

/// A fully resolved run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub format: FormatBundle,
    pub engine: Arc<AggregationEngine>,
    pub labels: LabelSpace,
    /// Members in configured order; this order is the vote order.
    pub models: Vec<ModelPlan>,
    pub concurrency: usize,
    pub deadline: Option<Duration>,
}

impl RunPlan {
    pub fn resolve(
        config: &RunConfig,
        providers: &ProviderRegistry,
        formats: &FormatRegistry,
        strategies: &StrategyRegistry,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let format = formats.resolve(&config.format, config.labels)?;
        let strategy = strategies.create(&config.aggregation)?;
        let engine = Arc::new(AggregationEngine::new(strategy, config.weights()));

        let models = config
            .models
            .iter()
            .map(|model| {
                let provider = providers
                    .create(&model.provider, &model.provider_config)
                    .map_err(|e| ConfigurationError::Provider {
                        model_id: model.model_id.clone(),
                        message: e.to_string(),
                    })?;
                let params = Arc::new(model.generation_params());

                tracing::debug!(
                    model = %model.model_id,
                    provider = %model.provider,
                    provider_model = %params.provider_model,
                    "Resolved model"
                );

                Ok(ModelPlan {
                    client: ProviderClient::new(provider, params.clone()),
                    params,
                    weight: model.weight,
                    pricing: model.pricing,
                })
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        Ok(Self {
            format,
            engine,
            labels: config.labels,
            models,
            concurrency: config.concurrency,
            deadline: config.deadline,
        })
    }

    /// Resolve against the built-in formats, strategies and compiled-in providers.
    pub fn resolve_default(config: &RunConfig) -> Result<Self, ConfigurationError> {
        Self::resolve(
            config,
            &ProviderRegistry::with_defaults(),
            &FormatRegistry::with_defaults(),
            &StrategyRegistry::with_defaults(),
        )
    }

    pub fn model_ids(&self) -> Vec<&str> {
        self.models.iter().map(ModelPlan::model_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stub_registry, StubProvider};
    use ensemble_core::{FormatConfig, ModelConfig};

    fn config(models: Vec<ModelConfig>) -> RunConfig {
        RunConfig::new(FormatConfig::named("thomas-et-al"), models).unwrap()
    }

    #[test]
    fn test_resolve_keeps_model_order() {
        let a = StubProvider::fixed("{\"O\": 1}").shared();
        let b = StubProvider::fixed("{\"O\": 2}").shared();
        let providers = stub_registry(&[("stub-a", a), ("stub-b", b)]);

        let mut second = ModelConfig::new("zeta", "stub-a");
        second.weight = 2.5;
        second.pricing = Some(Pricing {
            input_per_million: 1.0,
            output_per_million: 2.0,
        });
        let config = config(vec![ModelConfig::new("alpha", "stub-b"), second]);

        let plan = RunPlan::resolve(
            &config,
            &providers,
            &FormatRegistry::with_defaults(),
            &StrategyRegistry::with_defaults(),
        )
        .unwrap();

        assert_eq!(plan.model_ids(), vec!["alpha", "zeta"]);
        assert_eq!(plan.engine.weight("zeta"), 2.5);
        assert_eq!(plan.format.name, "thomas-et-al");
        assert_eq!(plan.engine.strategy_name(), "weighted_majority");

        let cost = plan.models[1].cost(TokenUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 500_000,
        });
        assert_eq!(cost, Some(2.0));
        assert_eq!(plan.models[0].cost(TokenUsage::default()), None);
    }

    #[test]
    fn test_unknown_provider_fails_before_any_call() {
        let stub = StubProvider::fixed("{\"O\": 1}").shared();
        let providers = stub_registry(&[("stub", stub.clone())]);
        let config = config(vec![
            ModelConfig::new("ok", "stub"),
            ModelConfig::new("missing", "nonexistent"),
        ]);

        let err = RunPlan::resolve(
            &config,
            &providers,
            &FormatRegistry::with_defaults(),
            &StrategyRegistry::with_defaults(),
        )
        .unwrap_err();

        match err {
            ConfigurationError::Provider { model_id, message } => {
                assert_eq!(model_id, "missing");
                assert!(message.contains("Unknown provider type"));
            }
            other => panic!("Expected Provider error, got {:?}", other),
        }
        assert_eq!(stub.calls(), 0);
    }

    #[test]
    fn test_unknown_format_is_configuration_error() {
        let stub = StubProvider::fixed("x").shared();
        let providers = stub_registry(&[("stub", stub.clone())]);
        let mut config = config(vec![ModelConfig::new("m", "stub")]);
        config.format = FormatConfig::named("no-such-format");

        let err = RunPlan::resolve(
            &config,
            &providers,
            &FormatRegistry::with_defaults(),
            &StrategyRegistry::with_defaults(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownFormat { .. }));
        assert_eq!(stub.calls(), 0);
    }

    #[test]
    fn test_unknown_strategy_is_configuration_error() {
        let providers = stub_registry(&[("stub", StubProvider::fixed("x").shared())]);
        let mut config = config(vec![ModelConfig::new("m", "stub")]);
        config.aggregation.strategy = "borda".to_string();

        let err = RunPlan::resolve(
            &config,
            &providers,
            &FormatRegistry::with_defaults(),
            &StrategyRegistry::with_defaults(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownStrategy { .. }));
    }

    #[test]
    fn test_oversized_concurrency_rejected_before_run() {
        let stub = StubProvider::fixed("x").shared();
        let providers = stub_registry(&[("stub", stub.clone())]);
        let mut config = config(vec![ModelConfig::new("m", "stub")]);
        config.concurrency = 4_611_686_018_427_387_904;

        let err = RunPlan::resolve(
            &config,
            &providers,
            &FormatRegistry::with_defaults(),
            &StrategyRegistry::with_defaults(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::Validation(msg) if msg.contains("concurrency")));
        assert_eq!(stub.calls(), 0);
    }
}
