//! Per-run counters and the end-of-run summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ensemble_core::{codes, EnsembleResult, Judgement};

use crate::providers::TokenUsage;

/// Outcome counts for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub model_id: String,
    pub successes: usize,
    pub abstentions: usize,
    /// Provider error kinds and `prompt_build_failed`, by count.
    pub errors_by_kind: BTreeMap<String, usize>,
    pub total_retries: u64,
    pub mean_latency_ms: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: Option<f64>,
    #[serde(skip)]
    latency_total_ms: f64,
}

impl ModelStats {
    fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            ..Self::default()
        }
    }

    pub fn judgements(&self) -> usize {
        self.successes + self.abstentions
    }

    pub fn abstention_rate(&self) -> f64 {
        match self.judgements() {
            0 => 0.0,
            n => self.abstentions as f64 / n as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub examples: usize,
    pub judgements: usize,
    pub ensembles: usize,
    pub no_quorum: usize,
    /// The run deadline expired before every call finished.
    pub cancelled: bool,
    /// Members in configured order.
    pub models: Vec<ModelStats>,
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn new<'a>(run_id: impl Into<String>, model_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            examples: 0,
            judgements: 0,
            ensembles: 0,
            no_quorum: 0,
            cancelled: false,
            models: model_ids.into_iter().map(ModelStats::new).collect(),
            warnings: Vec::new(),
        }
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelStats> {
        self.models.iter().find(|m| m.model_id == model_id)
    }

    pub(crate) fn record_judgement(
        &mut self,
        position: usize,
        judgement: &Judgement,
        usage: TokenUsage,
    ) {
        self.judgements += 1;
        if judgement.has_warning(codes::RUN_CANCELLED) {
            self.cancelled = true;
        }

        let Some(stats) = self.models.get_mut(position) else {
            return;
        };

        if judgement.is_abstention() {
            stats.abstentions += 1;
        } else {
            stats.successes += 1;
        }

        if let Some(kind) = judgement.provider_error_kind() {
            *stats.errors_by_kind.entry(kind.to_string()).or_default() += 1;
        } else if judgement.has_warning(codes::PROMPT_BUILD_FAILED) {
            *stats
                .errors_by_kind
                .entry(codes::PROMPT_BUILD_FAILED.to_string())
                .or_default() += 1;
        }

        stats.total_retries += u64::from(judgement.retries);
        stats.latency_total_ms += judgement.latency_ms;
        stats.prompt_tokens += u64::from(usage.prompt_tokens);
        stats.completion_tokens += u64::from(usage.completion_tokens);
        if let Some(cost) = judgement.cost_estimate {
            *stats.total_cost.get_or_insert(0.0) += cost;
        }
    }

    pub(crate) fn record_ensemble(&mut self, result: &EnsembleResult) {
        self.ensembles += 1;
        if result.has_warning(codes::NO_QUORUM) {
            self.no_quorum += 1;
        }
    }

    /// Stamp the finish time, compute means and raise abstention warnings.
    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());

        for stats in &mut self.models {
            let n = stats.judgements();
            if n > 0 {
                stats.mean_latency_ms = stats.latency_total_ms / n as f64;
            }
            if stats.abstentions > 0 {
                self.warnings.push(format!(
                    "abstention_rate:{}={:.3}",
                    stats.model_id,
                    stats.abstention_rate()
                ));
            }
        }
        if self.cancelled {
            self.warnings.push(codes::RUN_CANCELLED.to_string());
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::{Example, GenerationParams};

    fn judgement(model: &str, label: Option<u8>, warnings: &[&str]) -> Judgement {
        let mut j = Judgement::abstention(
            &Example::new("q", "d"),
            &GenerationParams::new(model, "stub"),
            warnings.iter().map(|w| w.to_string()).collect(),
        );
        j.label = label;
        j.latency_ms = 10.0;
        j
    }

    #[test]
    fn test_counts_and_abstention_warning() {
        let mut summary = RunSummary::new("run-1", ["a", "b"]);

        summary.record_judgement(0, &judgement("a", Some(2), &[]), TokenUsage::default());
        summary.record_judgement(0, &judgement("a", Some(1), &[]), TokenUsage::default());
        summary.record_judgement(0, &judgement("a", Some(1), &[]), TokenUsage::default());
        summary.record_judgement(
            0,
            &judgement("a", None, &["provider_error:RateLimited"]),
            TokenUsage::default(),
        );
        summary.record_judgement(
            1,
            &judgement("b", Some(0), &[]),
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 2,
            },
        );
        summary.finish();

        let a = summary.model("a").unwrap();
        assert_eq!(a.successes, 3);
        assert_eq!(a.abstentions, 1);
        assert_eq!(a.errors_by_kind.get("RateLimited"), Some(&1));
        assert_eq!(a.mean_latency_ms, 10.0);

        let b = summary.model("b").unwrap();
        assert_eq!(b.prompt_tokens, 10);
        assert!(b.errors_by_kind.is_empty());

        assert_eq!(summary.judgements, 5);
        assert_eq!(summary.warnings, vec!["abstention_rate:a=0.250".to_string()]);
        assert!(!summary.cancelled);
        assert!(summary.finished_at.is_some());
    }

    #[test]
    fn test_cancelled_and_prompt_failures() {
        let mut summary = RunSummary::new("run-2", ["a"]);
        summary.record_judgement(
            0,
            &judgement("a", None, &["prompt_build_failed"]),
            TokenUsage::default(),
        );
        summary.record_judgement(
            0,
            &judgement("a", None, &["provider_error:TransportError", "run_cancelled"]),
            TokenUsage::default(),
        );
        summary.finish();

        let a = summary.model("a").unwrap();
        assert_eq!(a.errors_by_kind.get("prompt_build_failed"), Some(&1));
        assert_eq!(a.errors_by_kind.get("TransportError"), Some(&1));
        assert!(summary.cancelled);
        assert!(summary.warnings.contains(&"run_cancelled".to_string()));
    }
}
