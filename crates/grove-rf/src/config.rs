//! Configuration builder for forest training.

use std::fs;
use std::path::Path;

use tracing::instrument;

use crate::error::RfError;
use crate::metrics::{MetricKind, MetricSet};
use crate::split::SplitCriterion;

/// How many features each node considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureSubset {
    /// `round(sqrt(F))`, clamped to `[1, F]`.
    Sqrt,
    /// Every feature; the forest degenerates to bagged decision trees.
    All,
    /// A fixed count.
    Fixed(usize),
}

impl FeatureSubset {
    /// Resolve to a concrete count for `num_features` features.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidFeatureSubset`] if the count falls outside
    /// `[1, num_features]`.
    pub fn resolve(&self, num_features: usize) -> Result<usize, RfError> {
        let subset = match *self {
            FeatureSubset::Sqrt => ((num_features as f64).sqrt().round() as usize)
                .clamp(1, num_features.max(1)),
            FeatureSubset::All => num_features,
            FeatureSubset::Fixed(k) => k,
        };
        if subset == 0 || subset > num_features {
            return Err(RfError::InvalidFeatureSubset {
                subset,
                num_features,
            });
        }
        Ok(subset)
    }
}

/// Which held-out estimate drives threshold selection during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TrainingScore {
    /// Out-of-bag votes over the training pool.
    #[serde(rename = "oob_score")]
    OobScore,
    /// The validation partition.
    #[serde(rename = "valid_score")]
    ValidScore,
    /// K-fold cross-validation over the training pool.
    #[serde(rename = "k_fold_score")]
    KFoldScore,
}

/// Configuration for forest training.
///
/// Construct via [`ForestConfig::new`] and chain `with_*` methods, or load a
/// JSON file with [`ForestConfig::from_json_file`]; keys missing from the
/// file take their defaults.
///
/// # Defaults
///
/// | Parameter            | Default     |
/// |----------------------|-------------|
/// | `num_trees`          | 20          |
/// | `max_depth`          | 250         |
/// | `min_split`          | 2           |
/// | `min_leaf`           | 1           |
/// | `use_bootstrap`      | `true`      |
/// | `bootstrap_ratio`    | 0.632       |
/// | `criterion`          | `Entropy`   |
/// | `k_folds`            | 4           |
/// | `impurity_threshold` | 0.0         |
/// | `train_ratio`        | 0.8         |
/// | `test_ratio`         | 0.0         |
/// | `valid_ratio`        | 0.0         |
/// | `training_score`     | `OobScore`  |
/// | `metric_score`       | `{accuracy}`|
/// | `seed`               | 37          |
/// | `max_nodes`          | 2047        |
/// | `feature_subset`     | `Sqrt`      |
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub(crate) num_trees: usize,
    pub(crate) max_depth: usize,
    pub(crate) min_split: usize,
    pub(crate) min_leaf: usize,
    pub(crate) use_bootstrap: bool,
    pub(crate) bootstrap_ratio: f64,
    pub(crate) criterion: SplitCriterion,
    pub(crate) k_folds: usize,
    pub(crate) impurity_threshold: f64,
    pub(crate) train_ratio: f64,
    pub(crate) test_ratio: f64,
    pub(crate) valid_ratio: f64,
    pub(crate) training_score: TrainingScore,
    pub(crate) metric_score: MetricSet,
    pub(crate) seed: u64,
    pub(crate) max_nodes: usize,
    pub(crate) feature_subset: FeatureSubset,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 20,
            max_depth: 250,
            min_split: 2,
            min_leaf: 1,
            use_bootstrap: true,
            bootstrap_ratio: 0.632,
            criterion: SplitCriterion::Entropy,
            k_folds: 4,
            impurity_threshold: 0.0,
            train_ratio: 0.8,
            test_ratio: 0.0,
            valid_ratio: 0.0,
            training_score: TrainingScore::OobScore,
            metric_score: MetricSet::accuracy(),
            seed: 37,
            max_nodes: 2047,
            feature_subset: FeatureSubset::Sqrt,
        }
    }
}

impl ForestConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidTreeCount`] if `num_trees` is zero.
    pub fn new(num_trees: usize) -> Result<Self, RfError> {
        if num_trees == 0 {
            return Err(RfError::InvalidTreeCount { num_trees });
        }
        Ok(Self {
            num_trees,
            ..Self::default()
        })
    }

    /// Read a JSON config file and validate it.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`RfError::ReadConfig`] | the file cannot be read |
    /// | [`RfError::ParseConfig`] | the file is not a valid config object |
    /// | any [`validate`](Self::validate) error | a value is out of range |
    #[instrument(fields(path = %path.display()))]
    pub fn from_json_file(path: &Path) -> Result<Self, RfError> {
        let text = fs::read_to_string(path).map_err(|source| RfError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| RfError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field and cross-field constraint.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`RfError::InvalidTreeCount`] | `num_trees == 0` |
    /// | [`RfError::InvalidMaxDepth`] | `max_depth == 0` |
    /// | [`RfError::InvalidMinSplit`] | `min_split < 2` |
    /// | [`RfError::InvalidMinLeaf`] | `min_leaf == 0` |
    /// | [`RfError::InvalidMaxNodes`] | `max_nodes < 3` |
    /// | [`RfError::InvalidBootstrapRatio`] | ratio outside `(0, 1]` |
    /// | [`RfError::InvalidImpurityThreshold`] | threshold negative or not finite |
    /// | [`RfError::InvalidSplitRatios`] | negative ratios, sum above 1, or no training share |
    /// | [`RfError::InvalidFeatureSubset`] | `Fixed(0)` |
    pub fn validate(&self) -> Result<(), RfError> {
        if self.num_trees == 0 {
            return Err(RfError::InvalidTreeCount {
                num_trees: self.num_trees,
            });
        }
        if self.max_depth == 0 {
            return Err(RfError::InvalidMaxDepth {
                max_depth: self.max_depth,
            });
        }
        if self.min_split < 2 {
            return Err(RfError::InvalidMinSplit {
                min_split: self.min_split,
            });
        }
        if self.min_leaf == 0 {
            return Err(RfError::InvalidMinLeaf {
                min_leaf: self.min_leaf,
            });
        }
        if self.max_nodes < 3 {
            return Err(RfError::InvalidMaxNodes {
                max_nodes: self.max_nodes,
            });
        }
        if !(self.bootstrap_ratio > 0.0 && self.bootstrap_ratio <= 1.0) {
            return Err(RfError::InvalidBootstrapRatio {
                ratio: self.bootstrap_ratio,
            });
        }
        if !self.impurity_threshold.is_finite() || self.impurity_threshold < 0.0 {
            return Err(RfError::InvalidImpurityThreshold {
                threshold: self.impurity_threshold,
            });
        }
        crate::partition::check_ratios(self.train_ratio, self.test_ratio, self.valid_ratio)?;
        if self.feature_subset == FeatureSubset::Fixed(0) {
            return Err(RfError::InvalidFeatureSubset {
                subset: 0,
                num_features: 0,
            });
        }
        Ok(())
    }

    // --- Setters ---

    /// Set the number of trees.
    #[must_use]
    pub fn with_num_trees(mut self, num_trees: usize) -> Self {
        self.num_trees = num_trees;
        self
    }

    /// Set the maximum tree depth (root at depth 0).
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the minimum number of samples required to attempt a split.
    #[must_use]
    pub fn with_min_split(mut self, min_split: usize) -> Self {
        self.min_split = min_split;
        self
    }

    /// Set the minimum number of samples required on each side of a split.
    #[must_use]
    pub fn with_min_leaf(mut self, min_leaf: usize) -> Self {
        self.min_leaf = min_leaf;
        self
    }

    /// Draw bags with replacement (`true`) or as a subsample without.
    #[must_use]
    pub fn with_bootstrap(mut self, use_bootstrap: bool) -> Self {
        self.use_bootstrap = use_bootstrap;
        self
    }

    /// Set the subsample ratio used when bootstrap is off.
    #[must_use]
    pub fn with_bootstrap_ratio(mut self, bootstrap_ratio: f64) -> Self {
        self.bootstrap_ratio = bootstrap_ratio;
        self
    }

    /// Set the split quality criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the number of cross-validation folds.
    #[must_use]
    pub fn with_k_folds(mut self, k_folds: usize) -> Self {
        self.k_folds = k_folds;
        self
    }

    /// Set the base minimum gain a split must exceed.
    #[must_use]
    pub fn with_impurity_threshold(mut self, impurity_threshold: f64) -> Self {
        self.impurity_threshold = impurity_threshold;
        self
    }

    /// Set the train/test/validation shares.
    #[must_use]
    pub fn with_split_ratios(mut self, train: f64, test: f64, valid: f64) -> Self {
        self.train_ratio = train;
        self.test_ratio = test;
        self.valid_ratio = valid;
        self
    }

    /// Set the held-out estimate used during training.
    #[must_use]
    pub fn with_training_score(mut self, training_score: TrainingScore) -> Self {
        self.training_score = training_score;
        self
    }

    /// Set the metrics the threshold search optimizes.
    #[must_use]
    pub fn with_metrics(mut self, metric_score: MetricSet) -> Self {
        self.metric_score = metric_score;
        self
    }

    /// Add one metric to the optimized set.
    #[must_use]
    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric_score.insert(metric);
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the per-tree node ceiling.
    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Set the feature subset strategy.
    #[must_use]
    pub fn with_feature_subset(mut self, feature_subset: FeatureSubset) -> Self {
        self.feature_subset = feature_subset;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    /// Return the maximum depth.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Return the minimum samples required to split a node.
    #[must_use]
    pub fn min_split(&self) -> usize {
        self.min_split
    }

    /// Return the minimum samples required on each side of a split.
    #[must_use]
    pub fn min_leaf(&self) -> usize {
        self.min_leaf
    }

    /// Return whether bags are drawn with replacement.
    #[must_use]
    pub fn use_bootstrap(&self) -> bool {
        self.use_bootstrap
    }

    /// Return the subsample ratio.
    #[must_use]
    pub fn bootstrap_ratio(&self) -> f64 {
        self.bootstrap_ratio
    }

    /// Return the split criterion.
    #[must_use]
    pub fn criterion(&self) -> SplitCriterion {
        self.criterion
    }

    /// Return the number of cross-validation folds.
    #[must_use]
    pub fn k_folds(&self) -> usize {
        self.k_folds
    }

    /// Return the base impurity threshold.
    #[must_use]
    pub fn impurity_threshold(&self) -> f64 {
        self.impurity_threshold
    }

    /// Return `(train, test, valid)` shares.
    #[must_use]
    pub fn split_ratios(&self) -> (f64, f64, f64) {
        (self.train_ratio, self.test_ratio, self.valid_ratio)
    }

    /// Return the training score mode.
    #[must_use]
    pub fn training_score(&self) -> TrainingScore {
        self.training_score
    }

    /// Return the optimized metric set.
    #[must_use]
    pub fn metrics(&self) -> MetricSet {
        self.metric_score
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return the per-tree node ceiling.
    #[must_use]
    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Return the feature subset strategy.
    #[must_use]
    pub fn feature_subset(&self) -> FeatureSubset {
        self.feature_subset
    }
}
