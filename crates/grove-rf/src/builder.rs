//! Breadth-first tree construction over a [`FeatureAccess`] backend.
//!
//! Each node reads its labels once and each candidate feature once, in a
//! single batch over the node's index range. The index buffer is kept sorted
//! for locality inside every node range, so a chunked backend loads each
//! chunk at most once per batch.

use std::collections::VecDeque;

use grove_io::FeatureAccess;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::bag::Bag;
use crate::config::{FeatureSubset, ForestConfig};
use crate::error::RfError;
use crate::node::{FeatureIndex, Node, NodeIndex};
use crate::split::{SplitCriterion, SplitScratch, ThresholdSplit, adaptive_threshold};
use crate::tree::DecisionTree;

/// A node range waiting in the BFS queue.
#[derive(Debug, Clone, Copy)]
struct Pending {
    node: usize,
    begin: usize,
    end: usize,
    depth: usize,
    parent_label: u8,
}

/// Reusable tree builder. One per worker.
#[derive(Debug, Clone)]
pub(crate) struct TreeBuilder {
    criterion: SplitCriterion,
    max_depth: usize,
    min_split: usize,
    min_leaf: usize,
    max_nodes: usize,
    impurity_threshold: f64,
    subset: usize,
    all_features: bool,
    num_features: usize,
    num_labels: usize,
    max_value: u8,

    indices: Vec<u32>,
    labels: Vec<u8>,
    values: Vec<u8>,
    best_values: Vec<u8>,
    counts: Vec<u32>,
    feature_order: Vec<usize>,
    scratch: SplitScratch,
}

impl TreeBuilder {
    /// A builder for a dataset of the given shape.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidFeatureSubset`] if the subset does not
    /// resolve for `num_features`.
    pub(crate) fn new(
        config: &ForestConfig,
        num_features: usize,
        num_labels: usize,
        quantization_bits: u8,
    ) -> Result<Self, RfError> {
        let subset = config.feature_subset.resolve(num_features)?;
        Ok(Self {
            criterion: config.criterion,
            max_depth: config.max_depth,
            min_split: config.min_split,
            min_leaf: config.min_leaf,
            max_nodes: config.max_nodes,
            impurity_threshold: config.impurity_threshold,
            subset,
            all_features: config.feature_subset == FeatureSubset::All,
            num_features,
            num_labels,
            max_value: ((1u16 << quantization_bits.clamp(1, 8)) - 1) as u8,
            indices: Vec::new(),
            labels: Vec::new(),
            values: Vec::new(),
            best_values: Vec::new(),
            counts: Vec::new(),
            feature_order: (0..num_features).collect(),
            scratch: SplitScratch::default(),
        })
    }

    /// Build a tree on every sample in `bag`, with multiplicity.
    ///
    /// # Errors
    ///
    /// Propagates read errors from `access`, and returns
    /// [`RfError::LabelOutOfRange`] for a label outside the label space.
    pub(crate) fn build<A: FeatureAccess + ?Sized>(
        &mut self,
        access: &mut A,
        bag: &Bag,
        rng: &mut ChaCha8Rng,
    ) -> Result<DecisionTree, RfError> {
        self.indices.clear();
        self.indices.extend(bag.iter());
        self.grow(access, rng)
    }

    /// Build a tree on an explicit index list.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub(crate) fn build_from_indices<A: FeatureAccess + ?Sized>(
        &mut self,
        access: &mut A,
        indices: &[u32],
        rng: &mut ChaCha8Rng,
    ) -> Result<DecisionTree, RfError> {
        self.indices.clear();
        self.indices.extend_from_slice(indices);
        self.grow(access, rng)
    }

    fn grow<A: FeatureAccess + ?Sized>(
        &mut self,
        access: &mut A,
        rng: &mut ChaCha8Rng,
    ) -> Result<DecisionTree, RfError> {
        access.sort_for_locality(&mut self.indices);
        // Feature sampling must not depend on earlier trees.
        self.feature_order.clear();
        self.feature_order.extend(0..self.num_features);

        let mut arena = vec![leaf(0, vec![0; self.num_labels])];
        let mut queue = VecDeque::new();
        queue.push_back(Pending {
            node: 0,
            begin: 0,
            end: self.indices.len(),
            depth: 0,
            parent_label: 0,
        });

        while let Some(item) = queue.pop_front() {
            if item.begin == item.end {
                arena[item.node] = leaf(item.parent_label, vec![0; self.num_labels]);
                continue;
            }

            let n = item.end - item.begin;
            access.batch_labels(&self.indices[item.begin..item.end], &mut self.labels)?;
            self.count_labels()?;
            let majority = majority_label(&self.counts);
            let pure = self.counts.iter().any(|&c| c as usize == n);

            let saturated = arena.len() + 2 > self.max_nodes;
            if saturated {
                debug!(nodes = arena.len(), max_nodes = self.max_nodes, "node ceiling reached");
            }
            if pure || n < self.min_split || item.depth + 1 >= self.max_depth || saturated {
                arena[item.node] = leaf(majority, self.counts.clone());
                continue;
            }

            let Some((feature, split)) = self.best_split(access, item.begin, item.end, rng)? else {
                arena[item.node] = leaf(majority, self.counts.clone());
                continue;
            };
            if split.gain <= adaptive_threshold(self.impurity_threshold, n, self.min_split) {
                arena[item.node] = leaf(majority, self.counts.clone());
                continue;
            }

            let mid = self.partition(item.begin, item.end, split.threshold);
            access.sort_for_locality(&mut self.indices[item.begin..mid]);
            access.sort_for_locality(&mut self.indices[mid..item.end]);

            let left = arena.len();
            arena.push(leaf(majority, Vec::new()));
            arena.push(leaf(majority, Vec::new()));
            arena[item.node] = Node::Split {
                feature,
                threshold: split.threshold,
                left: NodeIndex::new(left),
            };
            queue.push_back(Pending {
                node: left,
                begin: item.begin,
                end: mid,
                depth: item.depth + 1,
                parent_label: majority,
            });
            queue.push_back(Pending {
                node: left + 1,
                begin: mid,
                end: item.end,
                depth: item.depth + 1,
                parent_label: majority,
            });
        }

        debug!(nodes = arena.len(), samples = self.indices.len(), "tree built");
        Ok(DecisionTree {
            nodes: arena,
            num_features: self.num_features,
            num_labels: self.num_labels,
        })
    }

    fn count_labels(&mut self) -> Result<(), RfError> {
        self.counts.clear();
        self.counts.resize(self.num_labels, 0);
        for &label in &self.labels {
            match self.counts.get_mut(usize::from(label)) {
                Some(c) => *c += 1,
                None => {
                    return Err(RfError::LabelOutOfRange {
                        label,
                        num_labels: self.num_labels,
                    });
                }
            }
        }
        Ok(())
    }

    /// Best split over the node's candidate features. The winning feature's
    /// values are left in `best_values`, aligned with the index range.
    fn best_split<A: FeatureAccess + ?Sized>(
        &mut self,
        access: &mut A,
        begin: usize,
        end: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Option<(FeatureIndex, ThresholdSplit)>, RfError> {
        let n = self.counts.iter().sum::<u32>();
        let base = self.criterion.impurity(&self.counts, n);

        if !self.all_features {
            let f = self.num_features;
            for i in 0..self.subset {
                let j = rng.gen_range(i..f);
                self.feature_order.swap(i, j);
            }
        }

        let mut best: Option<(FeatureIndex, ThresholdSplit)> = None;
        for k in 0..self.subset {
            let feature = self.feature_order[k];
            access.batch_feature(&self.indices[begin..end], feature, &mut self.values)?;
            let candidate = self.scratch.best_threshold(
                &self.values,
                &self.labels,
                &self.counts,
                base,
                self.criterion,
                self.max_value,
                self.min_leaf,
            );
            if let Some(split) = candidate
                && best.is_none_or(|(_, b)| split.gain > b.gain)
            {
                best = Some((FeatureIndex::new(feature), split));
                std::mem::swap(&mut self.values, &mut self.best_values);
            }
        }
        Ok(best)
    }

    /// Move samples with `value <= threshold` to the front of the range.
    /// Returns the boundary.
    fn partition(&mut self, begin: usize, end: usize, threshold: u8) -> usize {
        let range = &mut self.indices[begin..end];
        let values = &mut self.best_values;
        let mut store = 0;
        for i in 0..range.len() {
            if values[i] <= threshold {
                range.swap(i, store);
                values.swap(i, store);
                store += 1;
            }
        }
        begin + store
    }
}

fn leaf(label: u8, support: Vec<u32>) -> Node {
    Node::Leaf { label, support }
}

/// Most frequent label; ties go to the lowest.
fn majority_label(counts: &[u32]) -> u8 {
    let mut best = 0usize;
    for (label, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = label;
        }
    }
    best as u8
}
