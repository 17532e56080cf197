use std::path::PathBuf;

use grove_ids::IdError;
use grove_io::IoError;

/// Errors from forest configuration, training, evaluation and model files.
#[derive(Debug, thiserror::Error)]
pub enum RfError {
    /// Returned when num_trees is zero.
    #[error("num_trees must be at least 1, got {num_trees}")]
    InvalidTreeCount {
        /// The invalid num_trees value provided.
        num_trees: usize,
    },

    /// Returned when max_depth is zero.
    #[error("max_depth must be at least 1, got {max_depth}")]
    InvalidMaxDepth {
        /// The invalid max_depth value provided.
        max_depth: usize,
    },

    /// Returned when min_split is less than 2.
    #[error("min_split must be at least 2, got {min_split}")]
    InvalidMinSplit {
        /// The invalid min_split value provided.
        min_split: usize,
    },

    /// Returned when min_leaf is zero.
    #[error("min_leaf must be at least 1, got {min_leaf}")]
    InvalidMinLeaf {
        /// The invalid min_leaf value provided.
        min_leaf: usize,
    },

    /// Returned when the node ceiling cannot hold a root and one split.
    #[error("max_nodes must be at least 3, got {max_nodes}")]
    InvalidMaxNodes {
        /// The invalid max_nodes value provided.
        max_nodes: usize,
    },

    /// Returned when bootstrap_ratio is not in (0.0, 1.0].
    #[error("bootstrap_ratio must be in (0.0, 1.0], got {ratio}")]
    InvalidBootstrapRatio {
        /// The invalid ratio provided.
        ratio: f64,
    },

    /// Returned when impurity_threshold is negative or not finite.
    #[error("impurity_threshold must be a finite non-negative number, got {threshold}")]
    InvalidImpurityThreshold {
        /// The invalid threshold provided.
        threshold: f64,
    },

    /// Returned when the data split ratios are unusable.
    #[error(
        "split ratios must be non-negative, sum to at most 1 and give train a share; got train={train}, test={test}, valid={valid}"
    )]
    InvalidSplitRatios {
        /// Training share.
        train: f64,
        /// Test share.
        test: f64,
        /// Validation share.
        valid: f64,
    },

    /// Returned when a fixed feature subset is zero or exceeds the feature count.
    #[error("feature subset resolved to {subset}, but must be in [1, {num_features}]")]
    InvalidFeatureSubset {
        /// The resolved subset size.
        subset: usize,
        /// The number of features in the dataset.
        num_features: usize,
    },

    /// Returned when a grid-search range is empty or its step is zero.
    #[error("grid range for {parameter} is invalid: [{lo}, {hi}] step {step}")]
    InvalidGridRange {
        /// Parameter the range applies to.
        parameter: &'static str,
        /// Lower bound.
        lo: usize,
        /// Upper bound.
        hi: usize,
        /// Step between candidates.
        step: usize,
    },

    /// Returned when a streaming parameter is out of range.
    #[error("drift parameter {parameter} is invalid: {reason}")]
    InvalidDriftConfig {
        /// The offending parameter.
        parameter: &'static str,
        /// What the parameter must satisfy.
        reason: String,
    },

    /// Returned when training is asked to run on no samples.
    #[error("training set is empty")]
    EmptyTrainingSet,

    /// Returned when k-fold cross-validation has more folds than samples.
    #[error("cannot split {num_samples} samples into {num_folds} folds")]
    TooFewSamplesForFolds {
        /// The requested number of folds.
        num_folds: usize,
        /// Number of samples available.
        num_samples: usize,
    },

    /// Returned when a sample has a different number of features at prediction time.
    #[error("prediction input has {got} features, expected {expected}")]
    PredictionFeatureMismatch {
        /// The expected number of features.
        expected: usize,
        /// The actual number of features in the prediction input.
        got: usize,
    },

    /// Returned when a streamed sample carries a label outside the model's label space.
    #[error("label {label} outside the model's {num_labels} labels")]
    LabelOutOfRange {
        /// The offending label.
        label: u8,
        /// Size of the model's label space.
        num_labels: usize,
    },

    /// Returned when exported node records do not form a valid tree.
    #[error("invalid model: {reason}")]
    InvalidModel {
        /// Human-readable description of the problem.
        reason: String,
    },

    /// Returned when the config file cannot be read.
    #[error("failed to read config from {path}")]
    ReadConfig {
        /// Path to the config file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the config file is not valid JSON for [`ForestConfig`](crate::ForestConfig).
    #[error("failed to parse config {path}")]
    ParseConfig {
        /// Path to the config file.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// Returned when model serialization fails.
    #[error("failed to serialize model")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when model deserialization fails.
    #[error("failed to deserialize model from {path}")]
    DeserializeModel {
        /// Path to the model file that could not be deserialized.
        path: PathBuf,
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when writing the model file fails.
    #[error("failed to write model to {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the model file fails.
    #[error("failed to read model from {path}")]
    ReadModel {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when loading a model with an incompatible format version.
    #[error("incompatible model version in {path}: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The model format version this build expects.
        expected: u32,
        /// The model format version found in the file.
        found: u32,
        /// Path to the model file with the incompatible version.
        path: PathBuf,
    },

    /// Dataset access failed.
    #[error(transparent)]
    Io(#[from] IoError),

    /// A bag container rejected an id.
    #[error(transparent)]
    Ids(#[from] IdError),
}
