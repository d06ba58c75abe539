//! Combining per-model judgements into one ensemble decision.
//!
//! Strategies see only `(label, weight, confidence)` triples and return a
//! [`Decision`]; the [`AggregationEngine`] owns the bookkeeping around them
//! (weights lookup, vote ordering, result record).
//!
//! Decisions must not depend on the order votes arrive in. Strategies bucket
//! votes per label in a `BTreeMap` and sum weights in a canonical order, so
//! permuting the input yields bit-identical output.

mod plurality;

pub use plurality::{ConfidenceWeighted, Majority, VoteParams, WeightedMajority};

use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::{AggregationConfig, ConfigurationError};
use crate::types::{codes, AggregationRecord, EnsembleResult, Example, Judgement, Label};

/// One model's contribution to a decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vote {
    /// `None` for an abstention.
    pub label: Option<Label>,
    pub weight: f64,
    pub confidence: Option<f64>,
}

/// Outcome of a strategy for one example.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub label: Option<Label>,
    pub confidence: f64,
    pub warnings: Vec<String>,
}

impl Decision {
    pub fn no_quorum(votes: &[Vote]) -> Self {
        let mut warnings = vec![codes::NO_QUORUM.to_string()];
        if votes.iter().all(|v| v.label.is_none()) {
            warnings.push(codes::ALL_ABSTAINED.to_string());
        }
        Self {
            label: None,
            confidence: 0.0,
            warnings,
        }
    }
}

/// A pluggable voting rule.
pub trait AggregationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolved parameters, recorded on every result.
    fn params(&self) -> JsonValue;

    fn decide(&self, votes: &[Vote]) -> Decision;
}

type StrategyConstructor =
    fn(&JsonValue) -> Result<Arc<dyn AggregationStrategy>, ConfigurationError>;

/// Registry of aggregation strategies by name.
#[derive(Default)]
pub struct StrategyRegistry {
    constructors: BTreeMap<String, StrategyConstructor>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `weighted_majority`, `majority` and `confidence_weighted`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(WeightedMajority::NAME, |params| {
            Ok(Arc::new(WeightedMajority::from_params(params)?))
        });
        registry.register(Majority::NAME, |params| {
            Ok(Arc::new(Majority::from_params(params)?))
        });
        registry.register(ConfidenceWeighted::NAME, |params| {
            Ok(Arc::new(ConfidenceWeighted::from_params(params)?))
        });
        registry
    }

    pub fn register(&mut self, name: &str, constructor: StrategyConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn create(
        &self,
        config: &AggregationConfig,
    ) -> Result<Arc<dyn AggregationStrategy>, ConfigurationError> {
        let constructor = self.constructors.get(&config.strategy).ok_or_else(|| {
            ConfigurationError::UnknownStrategy {
                name: config.strategy.clone(),
                available: self.available().into_iter().map(String::from).collect(),
            }
        })?;
        constructor(&config.params)
    }

    pub fn available(&self) -> Vec<&str> {
        self.constructors.keys().map(|s| s.as_str()).collect()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.available())
            .finish()
    }
}

/// Applies a strategy to complete sets of judgements.
#[derive(Clone)]
pub struct AggregationEngine {
    strategy: Arc<dyn AggregationStrategy>,
    weights: HashMap<String, f64>,
}

impl AggregationEngine {
    /// `weights` maps model id to vote weight; unknown models weigh 1.0.
    pub fn new(
        strategy: Arc<dyn AggregationStrategy>,
        weights: impl IntoIterator<Item = (String, f64)>,
    ) -> Self {
        Self {
            strategy,
            weights: weights.into_iter().collect(),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn weight(&self, model_id: &str) -> f64 {
        self.weights.get(model_id).copied().unwrap_or(1.0)
    }

    /// Aggregate the judgements for one example. `votes` must hold one
    /// judgement per scheduled model, in model order.
    pub fn aggregate_example(&self, example: &Example, votes: Vec<Judgement>) -> EnsembleResult {
        self.aggregate(&example.query_id, &example.docid, example.gold_label, votes)
    }

    pub fn aggregate(
        &self,
        query_id: &str,
        docid: &str,
        gold_label: Option<Label>,
        votes: Vec<Judgement>,
    ) -> EnsembleResult {
        let ballots: Vec<Vote> = votes
            .iter()
            .map(|j| Vote {
                label: j.label,
                weight: self.weight(&j.model_id),
                confidence: j.confidence,
            })
            .collect();

        let decision = self.strategy.decide(&ballots);

        if decision.label.is_none() {
            tracing::debug!(query_id, docid, warnings = ?decision.warnings, "No ensemble label");
        }

        EnsembleResult {
            query_id: query_id.to_string(),
            docid: docid.to_string(),
            gold_label,
            final_label: decision.label,
            final_confidence: decision.confidence,
            per_model_votes: votes,
            aggregation: AggregationRecord {
                strategy: self.strategy.name().to_string(),
                params: self.strategy.params(),
            },
            warnings: decision.warnings,
        }
    }
}

impl std::fmt::Debug for AggregationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationEngine")
            .field("strategy", &self.strategy.name())
            .field("weights", &self.weights)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationParams;

    fn judgement(model: &str, label: Option<Label>) -> Judgement {
        let example = Example::new("q1", "d1");
        let params = GenerationParams::new(model, "stub");
        let mut j = Judgement::abstention(&example, &params, Vec::new());
        j.label = label;
        j
    }

    fn engine(weights: &[(&str, f64)]) -> AggregationEngine {
        let strategy = StrategyRegistry::with_defaults()
            .create(&AggregationConfig::default())
            .unwrap();
        AggregationEngine::new(
            strategy,
            weights.iter().map(|(m, w)| (m.to_string(), *w)),
        )
    }

    #[test]
    fn test_scenario_a_two_thirds_majority() {
        let engine = engine(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
        let result = engine.aggregate(
            "q1",
            "d1",
            None,
            vec![
                judgement("a", Some(2)),
                judgement("b", Some(2)),
                judgement("c", Some(1)),
            ],
        );
        assert_eq!(result.final_label, Some(2));
        assert!((result.final_confidence - 2.0 / 3.0).abs() < 1e-12);
        assert!(result.warnings.is_empty());
        assert_eq!(result.aggregation.strategy, "weighted_majority");
    }

    #[test]
    fn test_scenario_b_tie_prefers_higher_label() {
        let engine = engine(&[("a", 1.0), ("b", 1.0)]);
        let result = engine.aggregate(
            "q1",
            "d1",
            None,
            vec![judgement("a", Some(2)), judgement("b", Some(1))],
        );
        assert_eq!(result.final_label, Some(2));
        assert_eq!(result.final_confidence, 0.5);
        assert!(result.has_warning(codes::TIE));
    }

    #[test]
    fn test_scenario_c_all_abstain() {
        let engine = engine(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
        let result = engine.aggregate(
            "q1",
            "d1",
            None,
            vec![
                judgement("a", None),
                judgement("b", None),
                judgement("c", None),
            ],
        );
        assert_eq!(result.final_label, None);
        assert_eq!(result.final_confidence, 0.0);
        assert!(result.has_warning(codes::NO_QUORUM));
        assert_eq!(result.per_model_votes.len(), 3);
        assert!(result.per_model_votes.iter().all(|j| j.label.is_none()));
    }

    #[test]
    fn test_weights_shift_the_decision() {
        let engine = engine(&[("strong", 3.0), ("a", 1.0), ("b", 1.0)]);
        let result = engine.aggregate(
            "q1",
            "d1",
            Some(0),
            vec![
                judgement("strong", Some(0)),
                judgement("a", Some(2)),
                judgement("b", Some(2)),
            ],
        );
        assert_eq!(result.final_label, Some(0));
        assert!((result.final_confidence - 0.6).abs() < 1e-12);
        assert_eq!(result.gold_label, Some(0));
    }

    #[test]
    fn test_abstentions_are_kept_but_not_counted() {
        let engine = engine(&[]);
        let result = engine.aggregate(
            "q1",
            "d1",
            None,
            vec![judgement("a", Some(1)), judgement("b", None)],
        );
        assert_eq!(result.final_label, Some(1));
        assert_eq!(result.final_confidence, 1.0);
        assert_eq!(result.per_model_votes.len(), 2);
    }

    #[test]
    fn test_unknown_strategy() {
        let config = AggregationConfig {
            strategy: "borda".to_string(),
            params: JsonValue::Null,
        };
        let result = StrategyRegistry::with_defaults().create(&config);
        assert!(matches!(result, Err(ConfigurationError::UnknownStrategy { .. })));
    }

    #[test]
    fn test_params_recorded() {
        let config = AggregationConfig {
            strategy: "weighted_majority".to_string(),
            params: serde_json::json!({"low_agreement_threshold": 0.75}),
        };
        let strategy = StrategyRegistry::with_defaults().create(&config).unwrap();
        let engine = AggregationEngine::new(strategy, Vec::new());
        let result = engine.aggregate("q", "d", None, vec![judgement("a", Some(1))]);
        assert_eq!(result.aggregation.params["low_agreement_threshold"], 0.75);
        assert_eq!(result.aggregation.params["min_votes"], 1);
    }
}
