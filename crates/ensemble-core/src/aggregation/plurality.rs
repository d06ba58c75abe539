//! Plurality-style strategies: the label bucket with the most weight wins.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use super::{AggregationStrategy, Decision, Vote};
use crate::config::ConfigurationError;
use crate::types::{codes, Label};

/// Parameters shared by the plurality strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoteParams {
    /// Minimum non-abstaining votes for a label to be produced.
    pub min_votes: usize,
    /// Winning share below which `low_agreement` is attached.
    pub low_agreement_threshold: f64,
}

impl Default for VoteParams {
    fn default() -> Self {
        Self {
            min_votes: 1,
            low_agreement_threshold: 0.5,
        }
    }
}

impl VoteParams {
    fn from_json(strategy: &str, params: &JsonValue) -> Result<Self, ConfigurationError> {
        let invalid = |message: String| ConfigurationError::StrategyParams {
            strategy: strategy.to_string(),
            message,
        };

        let parsed: VoteParams = if params.is_null() {
            VoteParams::default()
        } else {
            serde_json::from_value(params.clone()).map_err(|e| invalid(e.to_string()))?
        };

        if parsed.min_votes == 0 {
            return Err(invalid("min_votes must be at least 1".to_string()));
        }

        if !(0.0..=1.0).contains(&parsed.low_agreement_threshold) {
            return Err(invalid(format!(
                "low_agreement_threshold must be within [0, 1], got {}",
                parsed.low_agreement_threshold
            )));
        }

        Ok(parsed)
    }

    fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "min_votes": self.min_votes,
            "low_agreement_threshold": self.low_agreement_threshold,
        })
    }
}

#[derive(Default)]
struct Bucket {
    weights: Vec<f64>,
    votes: usize,
}

impl Bucket {
    /// Sum in ascending order so the total does not depend on arrival order.
    fn total(&mut self) -> f64 {
        self.weights.sort_by(f64::total_cmp);
        self.weights.iter().sum()
    }
}

/// Shared plurality rule over already-weighted ballots.
///
/// Highest total weight wins; among buckets tied on weight, more raw votes
/// wins, then the higher label. `tie` is attached only when the raw vote
/// count leaves more than one candidate.
fn plurality(
    ballots: impl Iterator<Item = (Label, f64)>,
    votes: &[Vote],
    params: &VoteParams,
) -> Decision {
    let mut buckets: BTreeMap<Label, Bucket> = BTreeMap::new();
    for (label, weight) in ballots {
        let bucket = buckets.entry(label).or_default();
        bucket.weights.push(weight);
        bucket.votes += 1;
    }

    let cast: usize = buckets.values().map(|b| b.votes).sum();

    let totals: Vec<(Label, f64, usize)> = buckets
        .iter_mut()
        .map(|(label, bucket)| (*label, bucket.total(), bucket.votes))
        .collect();
    let total_weight: f64 = totals.iter().map(|(_, w, _)| *w).sum();

    if cast < params.min_votes || total_weight.is_nan() || total_weight <= 0.0 {
        return Decision::no_quorum(votes);
    }

    let top_weight = totals
        .iter()
        .map(|(_, w, _)| *w)
        .fold(f64::NEG_INFINITY, f64::max);
    let tolerance = f64::EPSILON * top_weight.abs().max(1.0) * 4.0;

    let tied: Vec<&(Label, f64, usize)> = totals
        .iter()
        .filter(|(_, w, _)| (top_weight - *w).abs() <= tolerance)
        .collect();

    let most_raw = tied.iter().map(|(_, _, n)| *n).max().unwrap_or(0);

    let mut warnings = Vec::new();
    if tied.iter().filter(|(_, _, n)| *n == most_raw).count() > 1 {
        warnings.push(codes::TIE.to_string());
    }

    let Some(&&(label, weight, _)) = tied
        .iter()
        .max_by(|a, b| a.2.cmp(&b.2).then(a.0.cmp(&b.0)))
    else {
        return Decision::no_quorum(votes);
    };

    let confidence = weight / total_weight;
    if confidence < params.low_agreement_threshold {
        warnings.push(codes::LOW_AGREEMENT.to_string());
    }

    Decision {
        label: Some(label),
        confidence,
        warnings,
    }
}

/// Reference strategy: each model adds its configured weight to its label.
#[derive(Debug, Clone, Default)]
pub struct WeightedMajority {
    params: VoteParams,
}

impl WeightedMajority {
    pub const NAME: &'static str = "weighted_majority";

    pub fn new(params: VoteParams) -> Self {
        Self { params }
    }

    pub fn from_params(params: &JsonValue) -> Result<Self, ConfigurationError> {
        Ok(Self::new(VoteParams::from_json(Self::NAME, params)?))
    }
}

impl AggregationStrategy for WeightedMajority {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> JsonValue {
        self.params.to_json()
    }

    fn decide(&self, votes: &[Vote]) -> Decision {
        let ballots = votes
            .iter()
            .filter_map(|v| v.label.map(|label| (label, v.weight)));
        plurality(ballots, votes, &self.params)
    }
}

/// One model, one vote. Configured weights are ignored.
#[derive(Debug, Clone, Default)]
pub struct Majority {
    params: VoteParams,
}

impl Majority {
    pub const NAME: &'static str = "majority";

    pub fn new(params: VoteParams) -> Self {
        Self { params }
    }

    pub fn from_params(params: &JsonValue) -> Result<Self, ConfigurationError> {
        Ok(Self::new(VoteParams::from_json(Self::NAME, params)?))
    }
}

impl AggregationStrategy for Majority {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> JsonValue {
        self.params.to_json()
    }

    fn decide(&self, votes: &[Vote]) -> Decision {
        let ballots = votes.iter().filter_map(|v| v.label.map(|label| (label, 1.0)));
        plurality(ballots, votes, &self.params)
    }
}

/// Weight each vote by `weight × self-reported confidence`.
///
/// Votes without a confidence count at full weight.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceWeighted {
    params: VoteParams,
}

impl ConfidenceWeighted {
    pub const NAME: &'static str = "confidence_weighted";

    pub fn new(params: VoteParams) -> Self {
        Self { params }
    }

    pub fn from_params(params: &JsonValue) -> Result<Self, ConfigurationError> {
        Ok(Self::new(VoteParams::from_json(Self::NAME, params)?))
    }
}

impl AggregationStrategy for ConfidenceWeighted {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn params(&self) -> JsonValue {
        self.params.to_json()
    }

    fn decide(&self, votes: &[Vote]) -> Decision {
        let ballots = votes.iter().filter_map(|v| {
            v.label.map(|label| {
                let confidence = v.confidence.unwrap_or(1.0).clamp(0.0, 1.0);
                (label, v.weight * confidence)
            })
        });
        plurality(ballots, votes, &self.params)
    }
}
