//! Trained-model export and the versioned bincode model file.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::config::ForestConfig;
use crate::error::RfError;
use crate::forest::RandomForest;
use crate::tree::DecisionTree;

/// Current binary format version.
pub const FORMAT_VERSION: u32 = 1;

/// One node of an exported tree.
///
/// A leaf stores its label in `label_or_left_child`; a split stores the
/// index of its left child, with the right child at the next index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeRecord {
    /// Split feature; 0 for leaves.
    pub feature_id: u16,
    /// Split threshold; 0 for leaves.
    pub threshold: u8,
    /// Whether this node is a leaf.
    pub is_leaf: bool,
    /// Leaf label or left child index.
    pub label_or_left_child: u32,
}

/// Portable form of a trained forest.
///
/// Leaf support counts are not exported; a re-imported leaf starts with a
/// single vote for its label.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelExport {
    /// Format version for compatibility checking.
    pub format_version: u32,
    /// Config the forest was trained with.
    pub config: ForestConfig,
    /// Number of features per sample.
    pub num_features: usize,
    /// Size of the label space.
    pub num_labels: usize,
    /// Bits per quantized feature value.
    pub quantization_bits: u8,
    /// Per-tree vote weights.
    pub scores: Vec<f64>,
    /// Node records per tree, root first.
    pub trees: Vec<Vec<NodeRecord>>,
}

impl ModelExport {
    /// Snapshot `forest`.
    #[must_use]
    pub fn from_forest(forest: &RandomForest) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            config: forest.config.clone(),
            num_features: forest.num_features,
            num_labels: forest.num_labels,
            quantization_bits: forest.quantization_bits,
            scores: forest.scores.clone(),
            trees: forest.trees.iter().map(DecisionTree::records).collect(),
        }
    }

    /// Rebuild a forest.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidModel`] when the scores do not match the
    /// tree count, the label space does not fit a byte, or any tree's
    /// records are malformed (see [`DecisionTree::from_records`]).
    pub fn to_forest(&self) -> Result<RandomForest, RfError> {
        if self.scores.len() != self.trees.len() {
            return Err(RfError::InvalidModel {
                reason: format!(
                    "{} scores for {} trees",
                    self.scores.len(),
                    self.trees.len()
                ),
            });
        }
        if self.num_labels == 0 || self.num_labels > 256 {
            return Err(RfError::InvalidModel {
                reason: format!("label space of {} does not fit a byte", self.num_labels),
            });
        }
        let trees = self
            .trees
            .iter()
            .map(|records| DecisionTree::from_records(records, self.num_features, self.num_labels))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RandomForest {
            trees,
            scores: self.scores.clone(),
            num_features: self.num_features,
            num_labels: self.num_labels,
            quantization_bits: self.quantization_bits,
            config: self.config.clone(),
        })
    }
}

impl RandomForest {
    /// Portable snapshot of this forest.
    #[must_use]
    pub fn export(&self) -> ModelExport {
        ModelExport::from_forest(self)
    }

    /// Save the model to a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::SerializeModel`] | bincode encoding failed |
    /// | [`RfError::WriteModel`] | file write failed |
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RfError> {
        let path = path.as_ref();
        let bytes = bincode::serialize(&self.export())
            .map_err(|source| RfError::SerializeModel { source })?;
        std::fs::write(path, &bytes).map_err(|source| RfError::WriteModel {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            size_bytes = bytes.len(),
            num_trees = self.trees.len(),
            "model saved"
        );
        Ok(())
    }

    /// Load a model from a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::ReadModel`] | file read failed |
    /// | [`RfError::DeserializeModel`] | bincode decoding failed |
    /// | [`RfError::IncompatibleModelVersion`] | format version mismatch |
    /// | [`RfError::InvalidModel`] | tree records are malformed |
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RfError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| RfError::ReadModel {
            path: path.to_path_buf(),
            source,
        })?;

        // The version is the first field, so it decodes even when the rest
        // of the layout changed.
        let version: u32 =
            bincode::deserialize(&bytes).map_err(|source| RfError::DeserializeModel {
                path: path.to_path_buf(),
                source,
            })?;
        if version != FORMAT_VERSION {
            return Err(RfError::IncompatibleModelVersion {
                expected: FORMAT_VERSION,
                found: version,
                path: path.to_path_buf(),
            });
        }
        let export: ModelExport =
            bincode::deserialize(&bytes).map_err(|source| RfError::DeserializeModel {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(
            num_trees = export.trees.len(),
            num_features = export.num_features,
            num_labels = export.num_labels,
            "model loaded"
        );
        export.to_forest()
    }
}
