//! Confusion matrix and per-label classification metrics.

use std::fmt;

/// A confusion matrix over a fixed label space, with a per-label count of
/// rejected (below-threshold) samples.
///
/// Entry `matrix[actual][predicted]` counts accepted samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
    rejected: Vec<usize>,
    num_labels: usize,
}

/// Per-label precision, recall, F1 and accuracy.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassMetrics {
    /// The label.
    pub label: u8,
    /// TP / (TP + FP). 0.0 if nothing was predicted as this label.
    pub precision: f64,
    /// TP / (TP + FN). 0.0 if no sample has this label.
    pub recall: f64,
    /// Harmonic mean of precision and recall. 0.0 if both are zero.
    pub f1: f64,
    /// (TP + TN) / N over every recorded sample.
    pub accuracy: f64,
    /// Number of samples whose actual label is this one.
    pub support: usize,
}

impl ConfusionMatrix {
    /// An empty matrix for `num_labels` labels.
    #[must_use]
    pub fn new(num_labels: usize) -> Self {
        Self {
            matrix: vec![vec![0; num_labels]; num_labels],
            rejected: vec![0; num_labels],
            num_labels,
        }
    }

    /// Build a matrix from aligned actual and predicted labels.
    #[must_use]
    pub fn from_labels(actual: &[u8], predicted: &[u8], num_labels: usize) -> Self {
        let mut out = Self::new(num_labels);
        for (&a, &p) in actual.iter().zip(predicted) {
            out.record(a, Some(p));
        }
        out
    }

    /// Record one sample. `None` marks a rejected prediction. Labels outside
    /// the label space are ignored.
    pub fn record(&mut self, actual: u8, predicted: Option<u8>) {
        let a = usize::from(actual);
        if a >= self.num_labels {
            return;
        }
        match predicted {
            Some(p) if usize::from(p) < self.num_labels => self.matrix[a][usize::from(p)] += 1,
            Some(_) => {}
            None => self.rejected[a] += 1,
        }
    }

    /// Total number of recorded samples, rejected included.
    #[must_use]
    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum::<usize>() + self.rejected.iter().sum::<usize>()
    }

    /// Accepted-and-correct over all recorded samples.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let correct: usize = (0..self.num_labels).map(|i| self.matrix[i][i]).sum();
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        }
    }

    /// Per-label metrics. Rejected samples are false negatives of their label.
    #[must_use]
    pub fn class_metrics(&self) -> Vec<ClassMetrics> {
        let total = self.total();
        (0..self.num_labels)
            .map(|c| {
                let tp = self.matrix[c][c];
                let fp: usize = (0..self.num_labels)
                    .filter(|&i| i != c)
                    .map(|i| self.matrix[i][c])
                    .sum();
                let fn_: usize = (0..self.num_labels)
                    .filter(|&j| j != c)
                    .map(|j| self.matrix[c][j])
                    .sum::<usize>()
                    + self.rejected[c];
                let support = tp + fn_;
                let tn = total - tp - fp - fn_;
                let precision = if tp + fp == 0 {
                    0.0
                } else {
                    tp as f64 / (tp + fp) as f64
                };
                let recall = if support == 0 {
                    0.0
                } else {
                    tp as f64 / support as f64
                };
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                let accuracy = if total == 0 {
                    0.0
                } else {
                    (tp + tn) as f64 / total as f64
                };
                ClassMetrics {
                    label: c as u8,
                    precision,
                    recall,
                    f1,
                    accuracy,
                    support,
                }
            })
            .collect()
    }

    /// Return the underlying matrix rows.
    #[must_use]
    pub fn as_rows(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    /// Rejected samples per actual label.
    #[must_use]
    pub fn rejected(&self) -> &[usize] {
        &self.rejected
    }

    /// Return the number of labels.
    #[must_use]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for j in 0..self.num_labels {
            write!(f, " pred_{j:>3}")?;
        }
        writeln!(f, " rejected")?;

        for (i, row) in self.matrix.iter().enumerate() {
            write!(f, "true_{i:>3}")?;
            for val in row {
                write!(f, " {val:>7}")?;
            }
            writeln!(f, " {:>8}", self.rejected[i])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions() {
        let labels = vec![0, 0, 1, 1, 2, 2];
        let cm = ConfusionMatrix::from_labels(&labels, &labels, 3);
        assert!((cm.accuracy() - 1.0).abs() < f64::EPSILON);
        for m in cm.class_metrics() {
            assert!((m.precision - 1.0).abs() < f64::EPSILON);
            assert!((m.recall - 1.0).abs() < f64::EPSILON);
            assert!((m.accuracy - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn known_confusion_matrix() {
        let actual = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        let predicted = vec![0, 0, 1, 1, 1, 2, 2, 2, 0];
        let cm = ConfusionMatrix::from_labels(&actual, &predicted, 3);
        let metrics = cm.class_metrics();

        assert!((metrics[0].precision - 2.0 / 3.0).abs() < 1e-10);
        assert!((metrics[0].recall - 2.0 / 3.0).abs() < 1e-10);
        assert_eq!(metrics[0].support, 3);
        // TP=2, TN=9-2-1-1=5
        assert!((metrics[0].accuracy - 7.0 / 9.0).abs() < 1e-10);
        assert!((cm.accuracy() - 6.0 / 9.0).abs() < 1e-10);
    }

    #[test]
    fn rejected_samples_lower_recall_only() {
        let mut cm = ConfusionMatrix::new(2);
        cm.record(0, Some(0));
        cm.record(0, None);
        cm.record(1, Some(1));
        let m = cm.class_metrics();
        assert!((m[0].precision - 1.0).abs() < 1e-12);
        assert!((m[0].recall - 0.5).abs() < 1e-12);
        assert_eq!(cm.total(), 3);
        assert_eq!(cm.rejected(), &[1, 0]);
    }

    #[test]
    fn display_formatting() {
        let cm = ConfusionMatrix::from_labels(&[0, 1], &[0, 1], 2);
        let output = format!("{cm}");
        assert!(output.contains("pred_"));
        assert!(output.contains("rejected"));
    }

    #[test]
    fn zero_support_label() {
        let labels = vec![0, 0, 1, 1];
        let cm = ConfusionMatrix::from_labels(&labels, &labels, 3);
        let metrics = cm.class_metrics();
        assert_eq!(metrics[2].support, 0);
        assert_eq!(metrics[2].recall, 0.0);
        assert_eq!(metrics[2].accuracy, 1.0);
    }
}
