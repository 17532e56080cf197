use crate::node::Impurity;

/// Criterion for measuring the quality of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitCriterion {
    /// Gini impurity: 1 - Σ(p_i²)
    Gini,
    /// Information entropy in bits: -Σ(p_i · log2(p_i))
    Entropy,
}

impl SplitCriterion {
    /// Compute the impurity of a node from its label counts.
    ///
    /// Returns [`Impurity::new(0.0)`] when `n_samples` is zero.
    #[must_use]
    pub fn impurity(&self, label_counts: &[u32], n_samples: u32) -> Impurity {
        if n_samples == 0 {
            return Impurity::new(0.0);
        }
        let n = f64::from(n_samples);
        let value = match self {
            SplitCriterion::Gini => {
                let sum_sq: f64 = label_counts
                    .iter()
                    .map(|&c| {
                        let p = f64::from(c) / n;
                        p * p
                    })
                    .sum();
                1.0 - sum_sq
            }
            SplitCriterion::Entropy => {
                -label_counts
                    .iter()
                    .filter(|&&c| c > 0)
                    .map(|&c| {
                        let p = f64::from(c) / n;
                        p * p.log2()
                    })
                    .sum::<f64>()
            }
        };
        Impurity::new(value)
    }
}

/// Best threshold found on one feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ThresholdSplit {
    /// Samples with `value <= threshold` go left.
    pub(crate) threshold: u8,
    /// `base - (nl/n)·I(left) - (nr/n)·I(right)`.
    pub(crate) gain: f64,
    pub(crate) n_left: u32,
    pub(crate) n_right: u32,
}

/// Reusable buffers for threshold search over quantized values.
#[derive(Debug, Clone, Default)]
pub(crate) struct SplitScratch {
    /// `[value × label]` counts, row-major.
    table: Vec<u32>,
    left: Vec<u32>,
    right: Vec<u32>,
}

impl SplitScratch {
    /// Scan every threshold `t` in `0..max_value` for the feature whose
    /// values (aligned with `labels`) are given, returning the first
    /// threshold with the strictly highest gain.
    ///
    /// Thresholds that empty a side, or leave fewer than `min_leaf` samples
    /// on either side, are skipped.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn best_threshold(
        &mut self,
        values: &[u8],
        labels: &[u8],
        parent_counts: &[u32],
        base: Impurity,
        criterion: SplitCriterion,
        max_value: u8,
        min_leaf: usize,
    ) -> Option<ThresholdSplit> {
        let num_labels = parent_counts.len();
        let n = values.len() as u32;
        if n < 2 || max_value == 0 {
            return None;
        }
        let min_leaf = min_leaf.max(1) as u32;

        self.left.clear();
        self.left.resize(num_labels, 0);
        self.right.clear();
        self.right.resize(num_labels, 0);

        if max_value == 1 {
            // One split point: 0 against 1.
            for (&v, &label) in values.iter().zip(labels) {
                if v == 0 {
                    self.left[usize::from(label)] += 1;
                }
            }
            return self.score(0, parent_counts, base, criterion, n, min_leaf);
        }

        let rows = usize::from(max_value) + 1;
        self.table.clear();
        self.table.resize(rows * num_labels, 0);
        for (&v, &label) in values.iter().zip(labels) {
            self.table[usize::from(v) * num_labels + usize::from(label)] += 1;
        }

        let mut best: Option<ThresholdSplit> = None;
        for t in 0..max_value {
            let row = &self.table[usize::from(t) * num_labels..(usize::from(t) + 1) * num_labels];
            for (acc, &c) in self.left.iter_mut().zip(row) {
                *acc += c;
            }
            if let Some(candidate) = self.score(t, parent_counts, base, criterion, n, min_leaf)
                && best.is_none_or(|b| candidate.gain > b.gain)
            {
                best = Some(candidate);
            }
        }
        best
    }

    /// Score the current `left` counts as the split at `threshold`.
    fn score(
        &mut self,
        threshold: u8,
        parent_counts: &[u32],
        base: Impurity,
        criterion: SplitCriterion,
        n: u32,
        min_leaf: u32,
    ) -> Option<ThresholdSplit> {
        let n_left: u32 = self.left.iter().sum();
        let n_right = n - n_left;
        if n_left == 0 || n_right == 0 || n_left.min(n_right) < min_leaf {
            return None;
        }
        for ((r, &p), &l) in self.right.iter_mut().zip(parent_counts).zip(&self.left) {
            *r = p - l;
        }
        let nf = f64::from(n);
        let gain = base.value()
            - f64::from(n_left) / nf * criterion.impurity(&self.left, n_left).value()
            - f64::from(n_right) / nf * criterion.impurity(&self.right, n_right).value();
        Some(ThresholdSplit {
            threshold,
            gain,
            n_left,
            n_right,
        })
    }
}

/// Gain a split must exceed at a node holding `count` samples.
///
/// With a positive configured threshold and `count > min_split`, the
/// threshold shrinks as `thr / (1 + log2(count + 1))`, floored at `1e-4`.
#[must_use]
pub fn adaptive_threshold(threshold: f64, count: usize, min_split: usize) -> f64 {
    if threshold > 0.0 && count > min_split {
        let scaled = threshold / (1.0 + ((count + 1) as f64).log2());
        scaled.max(1e-4)
    } else {
        threshold
    }
}
