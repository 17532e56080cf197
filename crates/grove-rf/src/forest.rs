//! Forest training, weighted consensus and prediction.

use grove_io::{FeatureAccess, QuantizedDataset};
use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, info, instrument};

use crate::bag::{Bag, BagSampler, SPLIT_SALT, derive_rng};
use crate::builder::TreeBuilder;
use crate::config::ForestConfig;
use crate::error::RfError;
use crate::tree::DecisionTree;

/// A trained random forest.
///
/// Each tree carries a score (1.0 after training) that weights its vote.
/// Only streaming updates change the scores.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForest {
    pub(crate) trees: Vec<DecisionTree>,
    pub(crate) scores: Vec<f64>,
    pub(crate) num_features: usize,
    pub(crate) num_labels: usize,
    pub(crate) quantization_bits: u8,
    pub(crate) config: ForestConfig,
}

/// A forest plus the bag each tree was trained on.
#[derive(Debug, Clone)]
pub struct FittedForest {
    /// The trained forest.
    pub forest: RandomForest,
    /// `bags[t]` is the sample multiset tree `t` saw.
    pub bags: Vec<Bag>,
}

/// Weighted vote over a set of trees.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Consensus {
    /// Winning label; the lowest label wins ties.
    pub label: u8,
    /// Vote weight per label.
    pub votes: Vec<f64>,
    /// Sum of all vote weights.
    pub total_weight: f64,
    /// Winning weight over total weight, 0.0 when no tree voted.
    pub ratio: f64,
    /// Number of trees that voted.
    pub num_voters: usize,
}

impl RandomForest {
    /// Train a forest on `pool`, one tree at a time.
    ///
    /// This is the reference path; it works with any [`FeatureAccess`],
    /// including a chunked on-disk dataset.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`RfError::EmptyTrainingSet`] | `pool` is empty |
    /// | config validation errors | see [`ForestConfig::validate`] |
    /// | [`RfError::InvalidFeatureSubset`] | subset does not fit the feature count |
    /// | [`RfError::Io`] | reading the dataset failed |
    #[instrument(skip_all, fields(num_trees = config.num_trees, pool = pool.len()))]
    pub fn fit<A: FeatureAccess + ?Sized>(
        config: &ForestConfig,
        access: &mut A,
        pool: &[u32],
    ) -> Result<FittedForest, RfError> {
        config.validate()?;
        if pool.is_empty() {
            return Err(RfError::EmptyTrainingSet);
        }
        let bags = BagSampler::from_config(config).draw_bags(pool, config.num_trees)?;
        Self::fit_bags(config, access, bags, 0)
    }

    /// Train one tree per bag, split streams starting at `base`.
    pub(crate) fn fit_bags<A: FeatureAccess + ?Sized>(
        config: &ForestConfig,
        access: &mut A,
        bags: Vec<Bag>,
        base: u64,
    ) -> Result<FittedForest, RfError> {
        let mut builder = TreeBuilder::new(
            config,
            access.num_features(),
            access.num_labels(),
            access.quantization_bits(),
        )?;
        info!(
            num_trees = bags.len(),
            num_features = access.num_features(),
            num_labels = access.num_labels(),
            "training random forest"
        );

        let mut trees = Vec::with_capacity(bags.len());
        for (t, bag) in bags.iter().enumerate() {
            let mut rng = derive_rng(config.seed ^ SPLIT_SALT, base + t as u64, 0);
            let tree = builder.build(access, bag, &mut rng)?;
            debug!(tree = t, nodes = tree.n_nodes(), depth = tree.depth(), "tree trained");
            trees.push(tree);
        }

        let forest = Self::from_parts(
            trees,
            access.num_features(),
            access.num_labels(),
            access.quantization_bits(),
            config.clone(),
        );
        info!(
            total_nodes = forest.total_nodes(),
            "random forest training complete"
        );
        Ok(FittedForest { forest, bags })
    }

    /// Train a forest on an in-memory dataset with one rayon task per tree.
    ///
    /// Produces exactly the forest [`fit`](Self::fit) produces for the same
    /// config and pool.
    ///
    /// # Errors
    ///
    /// Same as [`fit`](Self::fit).
    #[instrument(skip_all, fields(num_trees = config.num_trees, pool = pool.len()))]
    pub fn fit_parallel(
        config: &ForestConfig,
        data: &QuantizedDataset,
        pool: &[u32],
    ) -> Result<FittedForest, RfError> {
        config.validate()?;
        if pool.is_empty() {
            return Err(RfError::EmptyTrainingSet);
        }
        let bags = BagSampler::from_config(config).draw_bags(pool, config.num_trees)?;
        let bits = data.layout().quantization_bits();
        let prototype = TreeBuilder::new(config, data.num_features(), data.num_labels(), bits)?;
        info!(
            num_trees = bags.len(),
            num_features = data.num_features(),
            num_labels = data.num_labels(),
            "training random forest in parallel"
        );

        let seed = config.seed ^ SPLIT_SALT;
        let trees = (0..bags.len())
            .into_par_iter()
            .map_init(
                || prototype.clone(),
                |builder, t| {
                    let mut access = data;
                    let mut rng = derive_rng(seed, t as u64, 0);
                    builder.build(&mut access, &bags[t], &mut rng)
                },
            )
            .collect::<Result<Vec<_>, _>>()?;

        let forest = Self::from_parts(
            trees,
            data.num_features(),
            data.num_labels(),
            bits,
            config.clone(),
        );
        info!(
            total_nodes = forest.total_nodes(),
            "random forest training complete"
        );
        Ok(FittedForest { forest, bags })
    }

    pub(crate) fn from_parts(
        trees: Vec<DecisionTree>,
        num_features: usize,
        num_labels: usize,
        quantization_bits: u8,
        config: ForestConfig,
    ) -> Self {
        let scores = vec![1.0; trees.len()];
        Self {
            trees,
            scores,
            num_features,
            num_labels,
            quantization_bits,
            config,
        }
    }

    /// Predict the label of one sample by weighted vote of every tree.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] on a width mismatch.
    pub fn predict(&self, features: &[u8]) -> Result<u8, RfError> {
        Ok(self.consensus(features, |_| true)?.label)
    }

    /// Predict many samples in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] if any sample has the
    /// wrong width.
    pub fn predict_batch(&self, samples: &[Vec<u8>]) -> Result<Vec<u8>, RfError> {
        samples.par_iter().map(|s| self.predict(s)).collect()
    }

    /// Weighted vote of the trees `include` accepts (by tree index).
    ///
    /// Each tree votes with its score. When every included tree has score
    /// zero, the trees vote with weight one instead.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] on a width mismatch.
    pub fn consensus(
        &self,
        features: &[u8],
        mut include: impl FnMut(usize) -> bool,
    ) -> Result<Consensus, RfError> {
        if features.len() != self.num_features {
            return Err(RfError::PredictionFeatureMismatch {
                expected: self.num_features,
                got: features.len(),
            });
        }
        let mut votes = vec![0.0; self.num_labels];
        let mut plain = vec![0.0; self.num_labels];
        let mut num_voters = 0;
        for (t, tree) in self.trees.iter().enumerate() {
            if !include(t) {
                continue;
            }
            let label = usize::from(tree.predict(features)?);
            if let (Some(w), Some(p)) = (votes.get_mut(label), plain.get_mut(label)) {
                *w += self.scores[t];
                *p += 1.0;
                num_voters += 1;
            }
        }

        let mut total_weight: f64 = votes.iter().sum();
        if total_weight <= 0.0 && num_voters > 0 {
            votes = plain;
            total_weight = num_voters as f64;
        }

        let mut best = 0usize;
        for (label, &w) in votes.iter().enumerate() {
            if w > votes[best] {
                best = label;
            }
        }
        let ratio = if total_weight > 0.0 {
            votes.get(best).copied().unwrap_or(0.0) / total_weight
        } else {
            0.0
        };
        Ok(Consensus {
            label: best as u8,
            votes,
            total_weight,
            ratio,
            num_voters,
        })
    }

    // --- Getters ---

    /// Borrow the trees.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Return the number of trees.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Per-tree vote weights.
    #[must_use]
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub(crate) fn tree_scores_mut(&mut self) -> &mut [f64] {
        &mut self.scores
    }

    pub(crate) fn trees_mut(&mut self) -> &mut [DecisionTree] {
        &mut self.trees
    }

    /// Swap in a new tree at `index`, keeping its score slot.
    pub(crate) fn replace_tree(&mut self, index: usize, tree: DecisionTree) {
        if let Some(slot) = self.trees.get_mut(index) {
            *slot = tree;
        }
    }

    /// Return the number of features.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Return the size of the label space.
    #[must_use]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Return the quantization width the forest was trained on.
    #[must_use]
    pub fn quantization_bits(&self) -> u8 {
        self.quantization_bits
    }

    /// Return the training config.
    #[must_use]
    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Total node count over all trees.
    #[must_use]
    pub fn total_nodes(&self) -> usize {
        self.trees.iter().map(DecisionTree::n_nodes).sum()
    }
}
