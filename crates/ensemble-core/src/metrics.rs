//! Scoring ensemble decisions against gold relevance labels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{EnsembleResult, Label, LabelSpace};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Gold examples of this class.
    pub support: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Results with an in-space gold label.
    pub evaluated: usize,
    /// Results skipped for lacking a usable gold label.
    pub skipped: usize,
    /// Share of evaluated results that received a final label.
    pub coverage: f64,
    /// Correct / evaluated. Missing predictions count as wrong.
    pub accuracy: f64,
    pub macro_f1: f64,
    pub micro_f1: f64,
    pub per_class: BTreeMap<Label, ClassMetrics>,
    /// Rows are gold labels, columns predicted labels, both in label-space order.
    pub confusion_matrix: Vec<Vec<usize>>,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Compute accuracy, per-class and averaged F1, and the confusion matrix.
pub fn evaluate<'a>(
    results: impl IntoIterator<Item = &'a EnsembleResult>,
    labels: LabelSpace,
) -> EvaluationMetrics {
    let n = labels.len();
    let mut matrix = vec![vec![0usize; n]; n];
    let mut support = vec![0usize; n];
    let mut evaluated = 0;
    let mut skipped = 0;
    let mut predicted = 0;
    let mut correct = 0;

    for result in results {
        let Some(gold) = result.gold_label.and_then(|g| labels.index_of(g)) else {
            skipped += 1;
            continue;
        };

        evaluated += 1;
        support[gold] += 1;

        if let Some(pred) = result.final_label.and_then(|p| labels.index_of(p)) {
            predicted += 1;
            matrix[gold][pred] += 1;
            if gold == pred {
                correct += 1;
            }
        }
    }

    let mut per_class = BTreeMap::new();
    let mut f1_sum = 0.0;
    for (idx, label) in labels.labels().enumerate() {
        let tp = matrix[idx][idx];
        let predicted_as: usize = matrix.iter().map(|row| row[idx]).sum();
        let precision = ratio(tp, predicted_as);
        let recall = ratio(tp, support[idx]);
        let class_f1 = f1(precision, recall);
        f1_sum += class_f1;
        per_class.insert(
            label,
            ClassMetrics {
                precision,
                recall,
                f1: class_f1,
                support: support[idx],
            },
        );
    }

    let micro_precision = ratio(correct, predicted);
    let micro_recall = ratio(correct, evaluated);

    EvaluationMetrics {
        evaluated,
        skipped,
        coverage: ratio(predicted, evaluated),
        accuracy: ratio(correct, evaluated),
        macro_f1: if n == 0 { 0.0 } else { f1_sum / n as f64 },
        micro_f1: f1(micro_precision, micro_recall),
        per_class,
        confusion_matrix: matrix,
    }
}
