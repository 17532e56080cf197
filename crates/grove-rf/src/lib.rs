//! Random forests over quantized datasets: train, evaluate, predict, adapt.
//!
//! Trees are grown breadth-first over any [`grove_io::FeatureAccess`], so a
//! forest trains the same way from a chunked on-disk dataset as from memory.
//! Per-tree bags are bit-packed [`grove_ids::IdVector`]s. On top of the
//! forest sit out-of-bag and holdout evaluation with consensus-threshold
//! search, k-fold cross-validation, grid search, streaming drift adaptation
//! and a versioned model file.

mod bag;
mod builder;
mod config;
mod confusion;
mod drift;
mod error;
mod eval;
mod export;
mod forest;
mod grid;
mod metrics;
mod node;
mod partition;
mod split;
mod tree;

pub use bag::{Bag, BagSampler, derive_rng, splitmix64};
pub use config::{FeatureSubset, ForestConfig, TrainingScore};
pub use confusion::{ClassMetrics, ConfusionMatrix};
pub use drift::{
    DriftConfig, DriftMonitor, ObserveOutcome, Replacement, StreamingForest, WindowPoint,
};
pub use error::RfError;
pub use eval::{
    CrossValidationResult, EvaluationReport, EvaluationSample, OobCollection, ThresholdChoice,
    TrainingMetadata, TrainingResult, collect_holdout, collect_oob, cross_validate, evaluate,
    oob_min_trees, search_threshold, train, train_parallel,
};
pub use export::{FORMAT_VERSION, ModelExport, NodeRecord};
pub use forest::{Consensus, FittedForest, RandomForest};
pub use grid::{DatasetProfile, GridRanges, GridSearchResult, GridTrial, grid_search};
pub use metrics::{MetricKind, MetricSet, ThresholdMetrics, objective};
pub use node::{FeatureIndex, Impurity, Node, NodeIndex};
pub use partition::DataPartition;
pub use split::{SplitCriterion, adaptive_threshold};
pub use tree::DecisionTree;
