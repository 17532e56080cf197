use std::collections::VecDeque;

use grove_io::FeatureAccess;

use crate::RfError;
use crate::export::NodeRecord;
use crate::node::{FeatureIndex, Node, NodeIndex};

/// A trained decision tree over quantized features.
///
/// Stored as a flat `Vec<Node>` arena with the root at index 0. The right
/// child of a split always sits right after its left child.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DecisionTree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) num_features: usize,
    pub(crate) num_labels: usize,
}

impl DecisionTree {
    /// Predict the label of one sample.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] when `features.len()`
    /// differs from the training feature count.
    pub fn predict(&self, features: &[u8]) -> Result<u8, RfError> {
        self.check_width(features)?;
        Ok(self.walk(|f| features[f]).1)
    }

    /// Index of the leaf `features` lands in.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] on a width mismatch.
    pub fn leaf_for(&self, features: &[u8]) -> Result<NodeIndex, RfError> {
        self.check_width(features)?;
        Ok(self.walk(|f| features[f]).0)
    }

    /// Predict sample `index` of `access`, reading only the features on its path.
    ///
    /// # Errors
    ///
    /// Propagates read errors from `access`.
    pub fn predict_sample<A: FeatureAccess + ?Sized>(
        &self,
        access: &mut A,
        index: u32,
    ) -> Result<u8, RfError> {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { label, .. } => return Ok(*label),
                Node::Split {
                    feature,
                    threshold,
                    left,
                } => {
                    let value = access.feature(index, feature.index())?;
                    idx = if value <= *threshold {
                        left.index()
                    } else {
                        left.next().index()
                    };
                }
            }
        }
    }

    fn check_width(&self, features: &[u8]) -> Result<(), RfError> {
        if features.len() != self.num_features {
            return Err(RfError::PredictionFeatureMismatch {
                expected: self.num_features,
                got: features.len(),
            });
        }
        Ok(())
    }

    /// Traverse from the root, returning the landing leaf and its label.
    fn walk(&self, value_of: impl Fn(usize) -> u8) -> (NodeIndex, u8) {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { label, .. } => return (NodeIndex::new(idx), *label),
                Node::Split {
                    feature,
                    threshold,
                    left,
                } => {
                    idx = if value_of(feature.index()) <= *threshold {
                        left.index()
                    } else {
                        left.next().index()
                    };
                }
            }
        }
    }

    /// Add one vote for `label` to a leaf's support.
    ///
    /// The leaf label becomes the argmax of its support; ties keep the
    /// current label. Split nodes are left alone.
    pub fn relabel_leaf(&mut self, leaf: NodeIndex, label: u8) {
        if let Some(Node::Leaf {
            label: current,
            support,
        }) = self.nodes.get_mut(leaf.index())
        {
            let slot = usize::from(label);
            if support.len() <= slot {
                support.resize(slot + 1, 0);
            }
            support[slot] += 1;
            let held = support.get(usize::from(*current)).copied().unwrap_or(0);
            if support[slot] > held {
                *current = label;
            }
        }
    }

    /// Return the total number of nodes in the tree (both splits and leaves).
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaf nodes.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Return the maximum depth of the tree.
    ///
    /// A single-node tree (just a root leaf) has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }

        let mut max_depth = 0usize;
        let mut queue = VecDeque::new();
        queue.push_back((0usize, 0usize));

        while let Some((node_idx, d)) = queue.pop_front() {
            match &self.nodes[node_idx] {
                Node::Leaf { .. } => max_depth = max_depth.max(d),
                Node::Split { left, .. } => {
                    queue.push_back((left.index(), d + 1));
                    queue.push_back((left.next().index(), d + 1));
                }
            }
        }

        max_depth
    }

    /// Borrow the node arena.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the number of features the tree was trained on.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Flat export of the arena, one record per node.
    #[must_use]
    pub fn records(&self) -> Vec<NodeRecord> {
        self.nodes
            .iter()
            .map(|node| match node {
                Node::Leaf { label, .. } => NodeRecord {
                    feature_id: 0,
                    threshold: 0,
                    is_leaf: true,
                    label_or_left_child: u32::from(*label),
                },
                Node::Split {
                    feature,
                    threshold,
                    left,
                } => NodeRecord {
                    feature_id: feature.index() as u16,
                    threshold: *threshold,
                    is_leaf: false,
                    label_or_left_child: left.index() as u32,
                },
            })
            .collect()
    }

    /// Rebuild a tree from exported records.
    ///
    /// Leaves start with one vote for their label, so streaming updates
    /// can move them.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidModel`] when the records are empty, a child
    /// index does not point forward inside the arena, or a feature or label
    /// is out of range.
    pub fn from_records(
        records: &[NodeRecord],
        num_features: usize,
        num_labels: usize,
    ) -> Result<Self, RfError> {
        if records.is_empty() {
            return Err(RfError::InvalidModel {
                reason: "tree has no nodes".to_string(),
            });
        }
        let nodes = records
            .iter()
            .enumerate()
            .map(|(i, rec)| {
                if rec.is_leaf {
                    let label = rec.label_or_left_child as usize;
                    if label >= num_labels {
                        return Err(RfError::InvalidModel {
                            reason: format!("node {i}: leaf label {label} out of range"),
                        });
                    }
                    let mut support = vec![0; num_labels];
                    support[label] = 1;
                    Ok(Node::Leaf {
                        label: label as u8,
                        support,
                    })
                } else {
                    let left = rec.label_or_left_child as usize;
                    if left <= i || left + 1 >= records.len() {
                        return Err(RfError::InvalidModel {
                            reason: format!("node {i}: child index {left} out of range"),
                        });
                    }
                    if usize::from(rec.feature_id) >= num_features {
                        return Err(RfError::InvalidModel {
                            reason: format!("node {i}: feature {} out of range", rec.feature_id),
                        });
                    }
                    Ok(Node::Split {
                        feature: FeatureIndex::new(usize::from(rec.feature_id)),
                        threshold: rec.threshold,
                        left: NodeIndex::new(left),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            nodes,
            num_features,
            num_labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Root split on feature 0 at 1, then feature 1 at 0 on the left.
    fn small_tree() -> DecisionTree {
        DecisionTree {
            nodes: vec![
                Node::Split {
                    feature: FeatureIndex::new(0),
                    threshold: 1,
                    left: NodeIndex::new(1),
                },
                Node::Split {
                    feature: FeatureIndex::new(1),
                    threshold: 0,
                    left: NodeIndex::new(3),
                },
                Node::Leaf {
                    label: 2,
                    support: vec![0, 0, 4],
                },
                Node::Leaf {
                    label: 0,
                    support: vec![3, 0, 0],
                },
                Node::Leaf {
                    label: 1,
                    support: vec![1, 2, 0],
                },
            ],
            num_features: 2,
            num_labels: 3,
        }
    }

    #[test]
    fn predict_follows_thresholds() {
        let tree = small_tree();
        assert_eq!(tree.predict(&[0, 0]).unwrap(), 0);
        assert_eq!(tree.predict(&[1, 3]).unwrap(), 1);
        assert_eq!(tree.predict(&[2, 0]).unwrap(), 2);
        assert_eq!(tree.leaf_for(&[3, 3]).unwrap().index(), 2);
    }

    #[test]
    fn structure_queries() {
        let tree = small_tree();
        assert_eq!(tree.n_nodes(), 5);
        assert_eq!(tree.n_leaves(), 3);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn prediction_feature_mismatch() {
        let err = small_tree().predict(&[1]).unwrap_err();
        assert!(matches!(
            err,
            RfError::PredictionFeatureMismatch { expected: 2, got: 1 }
        ));
    }

    #[test]
    fn relabel_moves_label_only_past_ties() {
        let mut tree = small_tree();
        let leaf = NodeIndex::new(4);
        // support [1, 2, 0]: one vote for 0 ties and keeps label 1.
        tree.relabel_leaf(leaf, 0);
        assert_eq!(tree.nodes()[4].label(), Some(1));
        tree.relabel_leaf(leaf, 0);
        assert_eq!(tree.nodes()[4].label(), Some(0));
        // Splits are ignored.
        tree.relabel_leaf(NodeIndex::new(0), 2);
        assert!(!tree.nodes()[0].is_leaf());
    }

    #[test]
    fn records_round_trip_structure() {
        let tree = small_tree();
        let records = tree.records();
        assert!(!records[0].is_leaf);
        assert_eq!(records[0].label_or_left_child, 1);
        assert_eq!(records[2].label_or_left_child, 2);
        let back = DecisionTree::from_records(&records, 2, 3).unwrap();
        assert_eq!(back.n_nodes(), 5);
        for features in [[0u8, 0u8], [1, 3], [3, 1]] {
            assert_eq!(back.predict(&features).unwrap(), tree.predict(&features).unwrap());
        }
        assert_eq!(back.nodes()[3].n_samples(), 1);
    }

    #[test]
    fn from_records_rejects_backward_child() {
        let mut records = small_tree().records();
        records[1].label_or_left_child = 0;
        assert!(matches!(
            DecisionTree::from_records(&records, 2, 3),
            Err(RfError::InvalidModel { .. })
        ));
    }
}
