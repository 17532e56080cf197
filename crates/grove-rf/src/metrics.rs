//! Metric kinds and threshold-dependent scoring.

use std::fmt;

use crate::eval::EvaluationSample;

/// A scalar classification metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Correct predictions over all samples.
    Accuracy,
    /// Micro-averaged precision.
    Precision,
    /// Micro-averaged recall.
    Recall,
    /// Harmonic mean of precision and recall.
    F1,
}

impl MetricKind {
    /// Every metric kind, in declaration order.
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Accuracy,
        MetricKind::Precision,
        MetricKind::Recall,
        MetricKind::F1,
    ];

    fn bit(self) -> u8 {
        match self {
            MetricKind::Accuracy => 1,
            MetricKind::Precision => 1 << 1,
            MetricKind::Recall => 1 << 2,
            MetricKind::F1 => 1 << 3,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::Precision => "precision",
            MetricKind::Recall => "recall",
            MetricKind::F1 => "f1",
        };
        f.write_str(name)
    }
}

/// A set of [`MetricKind`]s. Serializes as a list of names.
#[derive(Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(from = "Vec<MetricKind>", into = "Vec<MetricKind>")]
pub struct MetricSet(u8);

impl MetricSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// `{Accuracy}`.
    #[must_use]
    pub fn accuracy() -> Self {
        Self::empty().with(MetricKind::Accuracy)
    }

    /// This set plus `kind`.
    #[must_use]
    pub fn with(mut self, kind: MetricKind) -> Self {
        self.insert(kind);
        self
    }

    /// Add `kind`.
    pub fn insert(&mut self, kind: MetricKind) {
        self.0 |= kind.bit();
    }

    /// Return `true` if `kind` is in the set.
    #[must_use]
    pub fn contains(&self, kind: MetricKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Return `true` if no metric is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of selected metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Selected metrics in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = MetricKind> + '_ {
        MetricKind::ALL.into_iter().filter(|&k| self.contains(k))
    }
}

impl FromIterator<MetricKind> for MetricSet {
    fn from_iter<I: IntoIterator<Item = MetricKind>>(iter: I) -> Self {
        let mut out = Self::empty();
        for kind in iter {
            out.insert(kind);
        }
        out
    }
}

impl From<Vec<MetricKind>> for MetricSet {
    fn from(kinds: Vec<MetricKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<MetricSet> for Vec<MetricKind> {
    fn from(set: MetricSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Micro-averaged metrics for one decision threshold.
///
/// A sample is accepted when its consensus ratio reaches the threshold.
/// Rejected samples count as wrong for accuracy and add a false negative
/// for their actual label; accepted wrong samples add a false positive for
/// the predicted label and a false negative for the actual one.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ThresholdMetrics {
    /// Accepted-and-correct over all samples.
    pub accuracy: f64,
    /// Accepted over all samples.
    pub coverage: f64,
    /// TP / (TP + FP).
    pub precision: f64,
    /// TP / (TP + FN).
    pub recall: f64,
    /// F-beta with beta = 1.
    pub f1: f64,
    /// F-beta with beta = 0.5.
    pub f0_5: f64,
    /// F-beta with beta = 2.
    pub f2: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn f_beta(precision: f64, recall: f64, beta: f64) -> f64 {
    let b2 = beta * beta;
    let den = b2 * precision + recall;
    if den == 0.0 {
        0.0
    } else {
        (1.0 + b2) * precision * recall / den
    }
}

impl ThresholdMetrics {
    /// Score `samples` with `threshold` applied to their consensus ratios.
    #[must_use]
    pub fn compute(samples: &[EvaluationSample], threshold: f64) -> Self {
        let total = samples.len();
        let mut accepted = 0usize;
        let mut correct = 0usize;
        for s in samples {
            if s.consensus >= threshold {
                accepted += 1;
                if s.predicted == s.actual {
                    correct += 1;
                }
            }
        }
        let wrong = accepted - correct;
        let rejected = total - accepted;
        let tp = correct;
        let fp = wrong;
        let fn_ = wrong + rejected;

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        Self {
            accuracy: ratio(correct, total),
            coverage: ratio(accepted, total),
            precision,
            recall,
            f1: f_beta(precision, recall, 1.0),
            f0_5: f_beta(precision, recall, 0.5),
            f2: f_beta(precision, recall, 2.0),
        }
    }

    /// Value of one metric kind.
    #[must_use]
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Accuracy => self.accuracy,
            MetricKind::Precision => self.precision,
            MetricKind::Recall => self.recall,
            MetricKind::F1 => self.f1,
        }
    }
}

/// The composite score threshold search maximizes.
///
/// | Selected | Objective |
/// |---|---|
/// | `{Precision}` | F0.5 |
/// | `{Recall}` | F2 |
/// | `{Precision, Recall}` | F1 |
/// | empty | accuracy |
/// | anything else | mean of the selected metrics |
#[must_use]
pub fn objective(set: MetricSet, metrics: &ThresholdMetrics) -> f64 {
    let precision_only = MetricSet::empty().with(MetricKind::Precision);
    let recall_only = MetricSet::empty().with(MetricKind::Recall);
    let both = precision_only.with(MetricKind::Recall);
    if set == precision_only {
        metrics.f0_5
    } else if set == recall_only {
        metrics.f2
    } else if set == both {
        metrics.f1
    } else if set.is_empty() {
        metrics.accuracy
    } else {
        set.iter().map(|k| metrics.get(k)).sum::<f64>() / set.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(actual: u8, predicted: u8, consensus: f64) -> EvaluationSample {
        EvaluationSample {
            actual,
            predicted,
            consensus,
        }
    }

    #[test]
    fn metric_set_serializes_as_names() {
        let set = MetricSet::empty()
            .with(MetricKind::F1)
            .with(MetricKind::Accuracy);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["accuracy","f1"]"#);
        let back: MetricSet = serde_json::from_str(r#"["recall","precision"]"#).unwrap();
        assert!(back.contains(MetricKind::Recall));
        assert!(back.contains(MetricKind::Precision));
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn rejected_samples_are_false_negatives() {
        let samples = [
            sample(0, 0, 1.0),
            sample(1, 0, 0.9),
            sample(1, 1, 0.4),
            sample(0, 0, 0.3),
        ];
        let m = ThresholdMetrics::compute(&samples, 0.5);
        // accepted: 2 (one correct), rejected: 2
        assert!((m.accuracy - 0.25).abs() < 1e-12);
        assert!((m.coverage - 0.5).abs() < 1e-12);
        assert!((m.precision - 0.5).abs() < 1e-12);
        assert!((m.recall - 0.25).abs() < 1e-12);
        assert!((m.f1 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn zero_threshold_accepts_everything() {
        let samples = [sample(0, 0, 0.2), sample(1, 0, 0.6)];
        let m = ThresholdMetrics::compute(&samples, 0.0);
        assert_eq!(m.coverage, 1.0);
        assert!((m.accuracy - 0.5).abs() < 1e-12);
        assert!((m.precision - m.recall).abs() < 1e-12);
    }

    #[test]
    fn objective_mapping() {
        let m = ThresholdMetrics {
            accuracy: 0.9,
            coverage: 1.0,
            precision: 0.8,
            recall: 0.6,
            f1: 0.7,
            f0_5: 0.75,
            f2: 0.65,
        };
        let p = MetricSet::empty().with(MetricKind::Precision);
        let r = MetricSet::empty().with(MetricKind::Recall);
        assert_eq!(objective(p, &m), 0.75);
        assert_eq!(objective(r, &m), 0.65);
        assert_eq!(objective(p.with(MetricKind::Recall), &m), 0.7);
        assert_eq!(objective(MetricSet::empty(), &m), 0.9);
        let acc_f1 = MetricSet::accuracy().with(MetricKind::F1);
        assert!((objective(acc_f1, &m) - 0.8).abs() < 1e-12);
    }
}
