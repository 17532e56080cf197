//! Hyperparameter ranges derived from dataset shape, and grid search.

use grove_io::FeatureAccess;
use tracing::{debug, info, instrument};

use crate::config::{ForestConfig, TrainingScore};
use crate::error::RfError;
use crate::eval::train;
use crate::metrics::{MetricKind, MetricSet};
use crate::split::SplitCriterion;

/// Shape and balance of a labelled dataset.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DatasetProfile {
    /// Number of samples.
    pub num_samples: usize,
    /// Number of features.
    pub num_features: usize,
    /// Number of labels.
    pub num_labels: usize,
    /// Samples per label.
    pub label_counts: Vec<u32>,
    /// Share of the rarest label, in percent.
    pub lowest_distribution: f64,
}

impl DatasetProfile {
    /// Profile a dataset from its per-label counts.
    #[must_use]
    pub fn from_label_counts(num_samples: usize, num_features: usize, label_counts: &[u32]) -> Self {
        let lowest_distribution = match label_counts.iter().min() {
            Some(&min) if num_samples > 0 => f64::from(min) / num_samples as f64 * 100.0,
            _ => 0.0,
        };
        Self {
            num_samples,
            num_features,
            num_labels: label_counts.len(),
            label_counts: label_counts.to_vec(),
            lowest_distribution,
        }
    }

    /// Shortfall of the rarest label against an even split, as a fraction
    /// of the even share.
    fn deficit_ratio(&self) -> f64 {
        if self.num_labels == 0 {
            return 0.0;
        }
        let expected = 100.0 / self.num_labels as f64;
        (expected - self.lowest_distribution).max(0.0) / expected
    }

    /// Base gain threshold scaled by sample count, balance and feature count.
    ///
    /// Returns 0 when the profile has no label counts.
    #[must_use]
    pub fn suggested_impurity_threshold(&self, criterion: SplitCriterion) -> f64 {
        if self.label_counts.is_empty() {
            return 0.0;
        }
        let k = self.num_labels.max(2) as f64;
        let imbalance = self.deficit_ratio().min(1.0);

        let n = self.num_samples.max(2) as f64;
        let sample_factor = (1.0 / (1.0 + (n.log2() - 10.0).max(0.0) / 2.5)).clamp(0.25, 1.15);
        let imbalance_factor = 1.0 - 0.5 * imbalance;
        let f = self.num_features.max(2) as f64;
        let feature_factor = 0.9 + 0.1 * (f.log2() / 8.0).min(1.0);
        let scale = sample_factor * imbalance_factor * feature_factor;

        match criterion {
            SplitCriterion::Gini => (0.003 * (1.0 - 1.0 / k) * scale).clamp(0.0003, 0.02),
            SplitCriterion::Entropy => (0.02 * k.log2() * scale).clamp(0.002, 0.2),
        }
    }

    /// Metric set matching the label balance: recall for heavy imbalance,
    /// F1 for moderate, precision for slight, accuracy otherwise.
    #[must_use]
    pub fn suggested_metrics(&self) -> MetricSet {
        if self.lowest_distribution <= 0.0 {
            return MetricSet::empty().with(MetricKind::Recall);
        }
        let imbalance = 100.0 / self.lowest_distribution;
        let kind = if imbalance > 10.0 {
            MetricKind::Recall
        } else if imbalance > 3.0 {
            MetricKind::F1
        } else if imbalance > 1.5 {
            MetricKind::Precision
        } else {
            MetricKind::Accuracy
        };
        MetricSet::empty().with(kind)
    }

    /// K-fold below 200 samples per label, OOB below 500, validation above.
    #[must_use]
    pub fn suggested_training_score(&self) -> TrainingScore {
        let per_label = self.num_samples / self.num_labels.max(1);
        if per_label < 200 {
            TrainingScore::KFoldScore
        } else if per_label < 500 {
            TrainingScore::OobScore
        } else {
            TrainingScore::ValidScore
        }
    }
}

/// Inclusive `(lo, hi)` candidate ranges for grid search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GridRanges {
    /// `min_split` candidates.
    pub min_split: (usize, usize),
    /// `min_leaf` candidates.
    pub min_leaf: (usize, usize),
    /// `max_depth` candidates.
    pub max_depth: (usize, usize),
}

impl GridRanges {
    /// Ranges scaled to the dataset's size, dimensionality and balance.
    #[must_use]
    pub fn derive(profile: &DatasetProfile) -> Self {
        let n = profile.num_samples.max(1) as f64;
        let f = profile.num_features.max(1) as f64;
        let labels = profile.num_labels.max(1) as f64;

        let min_split = 2usize;
        let dynamic = (n.log2() / 4.0 + f / 25.0).max(0.0) as usize;
        let mut max_split = 16.min((min_split + 6).min(dynamic));
        if max_split <= min_split {
            max_split = min_split + 4;
        }

        let density = ((n / labels) / 600.0).clamp(0.3, 3.0);
        let imbalance_factor = 1.0 - profile.deficit_ratio().min(0.5);
        let min_ratio = (0.12 + 0.05 * density * imbalance_factor).clamp(0.1, 0.35);
        let max_ratio = (min_ratio + 0.12 + 0.04 * density)
            .max(min_ratio + 0.1)
            .min(0.6);

        let leaf_cap = max_split.saturating_sub(1).max(1);
        let min_leaf = ((min_split as f64 * min_ratio).floor() as usize).clamp(1, leaf_cap);
        let max_leaf = ((max_split as f64 * max_ratio).ceil() as usize)
            .min(leaf_cap)
            .max(min_leaf);

        let max_depth = 8.max((n.log2() + f.log2()) as usize + 1);
        let min_depth = if max_depth > 18 {
            max_depth - 6
        } else if max_depth > 12 {
            max_depth - 4
        } else if max_depth > 8 {
            max_depth - 2
        } else {
            4
        };

        Self {
            min_split: (min_split, max_split),
            min_leaf: (min_leaf, max_leaf),
            max_depth: (min_depth, max_depth),
        }
    }

    fn check(&self, step: usize) -> Result<(), RfError> {
        for (parameter, (lo, hi)) in [
            ("min_split", self.min_split),
            ("min_leaf", self.min_leaf),
            ("max_depth", self.max_depth),
        ] {
            if step == 0 || lo > hi {
                return Err(RfError::InvalidGridRange {
                    parameter,
                    lo,
                    hi,
                    step,
                });
            }
        }
        Ok(())
    }
}

/// One trained combination.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct GridTrial {
    /// `min_split` used.
    pub min_split: usize,
    /// `min_leaf` used.
    pub min_leaf: usize,
    /// `max_depth` used.
    pub max_depth: usize,
    /// Training-score objective.
    pub score: f64,
    /// Decision threshold chosen for this combination.
    pub threshold: f64,
}

/// Every trial plus the winner.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GridSearchResult {
    /// Highest-scoring trial; the earlier one wins ties.
    pub best: GridTrial,
    /// All trials in search order.
    pub trials: Vec<GridTrial>,
}

impl GridSearchResult {
    /// `config` with the winning parameters applied.
    #[must_use]
    pub fn apply(&self, config: ForestConfig) -> ForestConfig {
        config
            .with_min_split(self.best.min_split)
            .with_min_leaf(self.best.min_leaf)
            .with_max_depth(self.best.max_depth)
    }
}

/// Train every `(min_split, min_leaf, max_depth)` combination on the grid
/// and keep the best training score.
///
/// Combinations with `min_leaf >= min_split` are skipped.
///
/// # Errors
///
/// | Variant | When |
/// |---|---|
/// | [`RfError::InvalidGridRange`] | `step == 0` or a range has `lo > hi` |
/// | [`RfError::EmptyTrainingSet`] | every combination was skipped |
/// | training errors | see [`train`] |
#[instrument(skip_all, fields(step, num_samples = access.num_samples()))]
pub fn grid_search<A: FeatureAccess + ?Sized>(
    config: &ForestConfig,
    access: &mut A,
    ranges: &GridRanges,
    step: usize,
) -> Result<GridSearchResult, RfError> {
    ranges.check(step)?;

    let mut trials = Vec::new();
    let mut best: Option<GridTrial> = None;
    for min_split in (ranges.min_split.0..=ranges.min_split.1).step_by(step) {
        for min_leaf in (ranges.min_leaf.0..=ranges.min_leaf.1).step_by(step) {
            if min_leaf >= min_split {
                continue;
            }
            for max_depth in (ranges.max_depth.0..=ranges.max_depth.1).step_by(step) {
                let trial_config = config
                    .clone()
                    .with_min_split(min_split)
                    .with_min_leaf(min_leaf)
                    .with_max_depth(max_depth);
                let result = train(&trial_config, access)?;
                let trial = GridTrial {
                    min_split,
                    min_leaf,
                    max_depth,
                    score: result.choice.score,
                    threshold: result.choice.threshold,
                };
                debug!(min_split, min_leaf, max_depth, score = trial.score, "grid trial");
                if best.is_none_or(|b| trial.score > b.score) {
                    best = Some(trial);
                }
                trials.push(trial);
            }
        }
    }

    let best = best.ok_or(RfError::EmptyTrainingSet)?;
    info!(
        trials = trials.len(),
        min_split = best.min_split,
        min_leaf = best.min_leaf,
        max_depth = best.max_depth,
        score = best.score,
        "grid search complete"
    );
    Ok(GridSearchResult { best, trials })
}
