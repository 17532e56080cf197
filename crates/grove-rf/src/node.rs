use std::fmt;

/// Zero-based feature column index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct FeatureIndex(usize);

impl FeatureIndex {
    /// Create a new feature index from a zero-based column position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based feature column index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into a `Vec<Node>` arena, identifying a specific node in a decision tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Create a new node index from a zero-based arena position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    /// The sibling stored right after this node.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Criterion-agnostic impurity value (Gini or Entropy).
#[derive(
    Debug, Clone, Copy, PartialEq, PartialOrd,
    serde::Serialize, serde::Deserialize,
)]
pub struct Impurity(f64);

impl Impurity {
    /// Create a new impurity value.
    pub(crate) fn new(value: f64) -> Self {
        Self(value)
    }

    /// Return the raw impurity value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Impurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

/// A node in a decision tree arena.
///
/// Children of a split are stored next to each other: the right child is
/// always at `left + 1`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Node {
    /// An interior split node.
    Split {
        /// Feature used for the split.
        feature: FeatureIndex,
        /// Quantized threshold: samples with `value <= threshold` go left.
        threshold: u8,
        /// Index of the left child node.
        left: NodeIndex,
    },
    /// A terminal leaf node.
    Leaf {
        /// Majority label.
        label: u8,
        /// Label counts backing `label`, one entry per label. Streaming
        /// updates add to these.
        support: Vec<u32>,
    },
}

impl Node {
    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Leaf label, or `None` for a split.
    #[must_use]
    pub fn label(&self) -> Option<u8> {
        match self {
            Node::Leaf { label, .. } => Some(*label),
            Node::Split { .. } => None,
        }
    }

    /// Number of training samples that reached a leaf.
    #[must_use]
    pub fn n_samples(&self) -> u32 {
        match self {
            Node::Leaf { support, .. } => support.iter().sum(),
            Node::Split { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureIndex, Impurity, Node, NodeIndex};

    #[test]
    fn feature_index_display() {
        let fi = FeatureIndex::new(3);
        assert_eq!(fi.index(), 3);
        assert_eq!(format!("{fi}"), "3");
    }

    #[test]
    fn node_index_next_is_right_sibling() {
        let left = NodeIndex::new(5);
        assert_eq!(left.next().index(), 6);
        assert!(left < left.next());
    }

    #[test]
    fn impurity_display() {
        let imp = Impurity::new(0.333333);
        assert_eq!(format!("{imp}"), "0.333333");
        assert!(Impurity::new(0.1) < Impurity::new(0.5));
    }

    #[test]
    fn leaf_and_split_queries() {
        let leaf = Node::Leaf {
            label: 1,
            support: vec![2, 7],
        };
        let split = Node::Split {
            feature: FeatureIndex::new(2),
            threshold: 1,
            left: NodeIndex::new(1),
        };
        assert!(leaf.is_leaf());
        assert!(!split.is_leaf());
        assert_eq!(leaf.label(), Some(1));
        assert_eq!(split.label(), None);
        assert_eq!(leaf.n_samples(), 9);
    }
}
