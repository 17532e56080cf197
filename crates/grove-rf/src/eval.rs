//! Out-of-bag and holdout evaluation, threshold search, k-fold
//! cross-validation and the end-to-end training pipeline.

use grove_io::{FeatureAccess, QuantizedDataset};
use rand::seq::SliceRandom;
use tracing::{info, instrument, warn};

use crate::bag::{Bag, BagSampler, derive_rng};
use crate::config::{ForestConfig, TrainingScore};
use crate::confusion::{ClassMetrics, ConfusionMatrix};
use crate::error::RfError;
use crate::forest::{FittedForest, RandomForest};
use crate::metrics::{MetricSet, ThresholdMetrics, objective};
use crate::partition::DataPartition;

/// Objective differences below this count as ties.
const SCORE_EPSILON: f64 = 1e-6;

/// Stream id for the fold shuffle.
const FOLD_STREAM: u64 = 0xF01D;

/// Bag and split streams of fold `f` start at `f * FOLD_STREAM_STRIDE`.
const FOLD_STREAM_STRIDE: u64 = 1000;

/// One evaluated prediction.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EvaluationSample {
    /// True label.
    pub actual: u8,
    /// Consensus label.
    pub predicted: u8,
    /// Consensus ratio in `[0, 1]`.
    pub consensus: f64,
}

/// Samples gathered from out-of-bag votes.
#[derive(Debug, Clone, Default)]
pub struct OobCollection {
    /// Samples with enough out-of-bag trees.
    pub samples: Vec<EvaluationSample>,
    /// Samples dropped for having too few out-of-bag trees.
    pub skipped: usize,
}

/// A decision threshold and how it scores.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ThresholdChoice {
    /// Minimum consensus ratio for a prediction to be accepted.
    pub threshold: f64,
    /// Objective value at `threshold`.
    pub score: f64,
    /// Metrics at `threshold`.
    pub metrics: ThresholdMetrics,
}

impl ThresholdChoice {
    /// Score `samples` at a fixed threshold.
    #[must_use]
    pub fn at(samples: &[EvaluationSample], threshold: f64, set: MetricSet) -> Self {
        let metrics = ThresholdMetrics::compute(samples, threshold);
        Self {
            threshold,
            score: objective(set, &metrics),
            metrics,
        }
    }
}

/// Evaluation of a sample set at a chosen threshold.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EvaluationReport {
    /// Decision threshold applied.
    pub threshold: f64,
    /// Objective value.
    pub score: f64,
    /// Micro-averaged metrics.
    pub metrics: ThresholdMetrics,
    /// Per-label metrics; rejected samples count as false negatives.
    pub per_label: Vec<ClassMetrics>,
    /// Number of evaluated samples.
    pub n_samples: usize,
}

/// Result of k-fold cross-validation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CrossValidationResult {
    /// Folds actually used.
    pub num_folds: usize,
    /// Samples held out in each fold.
    pub fold_sizes: Vec<usize>,
    /// Threshold chosen over all folds.
    pub choice: ThresholdChoice,
    /// Aggregate report at that threshold.
    pub report: EvaluationReport,
}

/// Summary of a training run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainingMetadata {
    /// Number of trees trained.
    pub num_trees: usize,
    /// Number of features in the dataset.
    pub num_features: usize,
    /// Size of the label space.
    pub num_labels: usize,
    /// Training partition size.
    pub num_train: usize,
    /// Test partition size.
    pub num_test: usize,
    /// Validation partition size.
    pub num_valid: usize,
    /// Features considered per node.
    pub feature_subset: usize,
    /// Score mode actually used, after fallbacks.
    pub training_score: TrainingScore,
    /// Training samples without enough out-of-bag trees.
    pub oob_skipped: usize,
    /// Total nodes over all trees.
    pub total_nodes: usize,
}

/// Everything a training run produces.
#[derive(Debug, Clone)]
pub struct TrainingResult {
    /// The trained forest.
    pub forest: RandomForest,
    /// Per-tree bags.
    pub bags: Vec<Bag>,
    /// The data split used.
    pub partition: DataPartition,
    /// Threshold chosen on the training score.
    pub choice: ThresholdChoice,
    /// Report for the training score.
    pub report: EvaluationReport,
    /// Report on the test partition at the training threshold.
    pub test: Option<EvaluationReport>,
    /// Run summary.
    pub metadata: TrainingMetadata,
}

/// Minimum out-of-bag trees a sample needs to be scored:
/// `max(1, ceil(0.15 * num_trees))`.
#[must_use]
pub fn oob_min_trees(num_trees: usize) -> usize {
    ((num_trees as f64 * 0.15).ceil() as usize).max(1)
}

/// Score every pool sample with the trees whose bag does not contain it.
///
/// # Errors
///
/// Propagates read errors from `access`.
pub fn collect_oob<A: FeatureAccess + ?Sized>(
    forest: &RandomForest,
    bags: &[Bag],
    access: &mut A,
    pool: &[u32],
) -> Result<OobCollection, RfError> {
    let min_trees = oob_min_trees(forest.num_trees());
    let mut order = pool.to_vec();
    access.sort_for_locality(&mut order);

    let mut out = OobCollection::default();
    for &index in &order {
        let oob_trees = bags.iter().filter(|b| !b.contains(index)).count();
        if oob_trees < min_trees {
            out.skipped += 1;
            continue;
        }
        let sample = access.sample(index)?;
        let vote = forest.consensus(&sample.features, |t| {
            bags.get(t).is_some_and(|b| !b.contains(index))
        })?;
        out.samples.push(EvaluationSample {
            actual: sample.label,
            predicted: vote.label,
            consensus: vote.ratio,
        });
    }
    Ok(out)
}

/// Score `indices` with every tree.
///
/// # Errors
///
/// Propagates read errors from `access`.
pub fn collect_holdout<A: FeatureAccess + ?Sized>(
    forest: &RandomForest,
    access: &mut A,
    indices: &[u32],
) -> Result<Vec<EvaluationSample>, RfError> {
    let mut order = indices.to_vec();
    access.sort_for_locality(&mut order);
    order
        .iter()
        .map(|&index| {
            let sample = access.sample(index)?;
            let vote = forest.consensus(&sample.features, |_| true)?;
            Ok(EvaluationSample {
                actual: sample.label,
                predicted: vote.label,
                consensus: vote.ratio,
            })
        })
        .collect()
}

/// Pick the consensus threshold that maximizes the objective for `set`.
///
/// Candidates are 0, 1 and every observed consensus ratio. Scores within
/// `1e-6` tie; ties go to higher coverage, then to the lower threshold.
/// With no samples the choice is threshold 0.5 with score 0.
#[must_use]
pub fn search_threshold(samples: &[EvaluationSample], set: MetricSet) -> ThresholdChoice {
    if samples.is_empty() {
        return ThresholdChoice {
            threshold: 0.5,
            score: 0.0,
            metrics: ThresholdMetrics::default(),
        };
    }
    let mut candidates: Vec<f64> = [0.0, 1.0]
        .into_iter()
        .chain(samples.iter().map(|s| s.consensus))
        .collect();
    candidates.sort_by(f64::total_cmp);
    candidates.dedup();

    let mut best: Option<ThresholdChoice> = None;
    for threshold in candidates {
        let choice = ThresholdChoice::at(samples, threshold, set);
        let better = match &best {
            None => true,
            Some(b) => {
                choice.score > b.score + SCORE_EPSILON
                    || ((choice.score - b.score).abs() <= SCORE_EPSILON
                        && choice.metrics.coverage > b.metrics.coverage)
            }
        };
        if better {
            best = Some(choice);
        }
    }
    best.unwrap_or(ThresholdChoice {
        threshold: 0.5,
        score: 0.0,
        metrics: ThresholdMetrics::default(),
    })
}

/// Full report for `samples` at `choice.threshold`.
#[must_use]
pub fn evaluate(
    samples: &[EvaluationSample],
    choice: &ThresholdChoice,
    num_labels: usize,
) -> EvaluationReport {
    let mut confusion = ConfusionMatrix::new(num_labels);
    for s in samples {
        let accepted = s.consensus >= choice.threshold;
        confusion.record(s.actual, accepted.then_some(s.predicted));
    }
    EvaluationReport {
        threshold: choice.threshold,
        score: choice.score,
        metrics: ThresholdMetrics::compute(samples, choice.threshold),
        per_label: confusion.class_metrics(),
        n_samples: samples.len(),
    }
}

/// K-fold cross-validation over `pool`.
///
/// The pool is shuffled and cut into `k` folds of `n / k` samples, the last
/// fold taking the remainder. Each fold is scored by a forest trained on the
/// other folds; the threshold is then searched over all folds together.
///
/// # Errors
///
/// | Variant | When |
/// |---|---|
/// | [`RfError::EmptyTrainingSet`] | `pool` is empty |
/// | [`RfError::TooFewSamplesForFolds`] | more folds than samples |
/// | training errors | see [`RandomForest::fit`] |
#[instrument(skip_all, fields(k_folds = config.k_folds, pool = pool.len()))]
pub fn cross_validate<A: FeatureAccess + ?Sized>(
    config: &ForestConfig,
    access: &mut A,
    pool: &[u32],
) -> Result<CrossValidationResult, RfError> {
    config.validate()?;
    if pool.is_empty() {
        return Err(RfError::EmptyTrainingSet);
    }
    let mut k = config.k_folds;
    if k < 2 {
        warn!(k_folds = k, "k_folds below 2, using 4");
        k = 4;
    }
    let n = pool.len();
    if k > n {
        return Err(RfError::TooFewSamplesForFolds {
            num_folds: k,
            num_samples: n,
        });
    }

    let mut order = pool.to_vec();
    order.shuffle(&mut derive_rng(config.seed, FOLD_STREAM, 0));
    let fold_size = n / k;
    let sampler = BagSampler::from_config(config);

    let mut samples = Vec::with_capacity(n);
    let mut fold_sizes = Vec::with_capacity(k);
    for fold in 0..k {
        let start = fold * fold_size;
        let end = if fold + 1 == k { n } else { start + fold_size };
        let train: Vec<u32> = order[..start].iter().chain(&order[end..]).copied().collect();
        let base = fold as u64 * FOLD_STREAM_STRIDE;
        let bags = sampler.draw_bags_from(base, &train, config.num_trees)?;
        let fitted = RandomForest::fit_bags(config, access, bags, base)?;
        let held = collect_holdout(&fitted.forest, access, &order[start..end])?;
        info!(fold, held_out = held.len(), "fold evaluated");
        fold_sizes.push(end - start);
        samples.extend(held);
    }

    let choice = search_threshold(&samples, config.metric_score);
    let report = evaluate(&samples, &choice, access.num_labels());
    info!(
        num_folds = k,
        threshold = choice.threshold,
        score = choice.score,
        "cross-validation complete"
    );
    Ok(CrossValidationResult {
        num_folds: k,
        fold_sizes,
        choice,
        report,
    })
}

/// Partition, train and score a forest with the sequential builder.
///
/// # Errors
///
/// | Variant | When |
/// |---|---|
/// | [`RfError::EmptyTrainingSet`] | the dataset or the training partition is empty |
/// | [`RfError::InvalidSplitRatios`] | unusable split ratios |
/// | training and read errors | see [`RandomForest::fit`] |
#[instrument(skip_all, fields(num_trees = config.num_trees, num_samples = access.num_samples()))]
pub fn train<A: FeatureAccess + ?Sized>(
    config: &ForestConfig,
    access: &mut A,
) -> Result<TrainingResult, RfError> {
    run_training(config, access, |pool, access| {
        RandomForest::fit(config, access, pool)
    })
}

/// Same as [`train`], building trees in parallel over an in-memory dataset.
///
/// # Errors
///
/// Same as [`train`].
#[instrument(skip_all, fields(num_trees = config.num_trees, num_samples = data.len()))]
pub fn train_parallel(
    config: &ForestConfig,
    data: &QuantizedDataset,
) -> Result<TrainingResult, RfError> {
    let mut access = data;
    run_training(config, &mut access, |pool, _| {
        RandomForest::fit_parallel(config, data, pool)
    })
}

fn run_training<A, F>(
    config: &ForestConfig,
    access: &mut A,
    fit: F,
) -> Result<TrainingResult, RfError>
where
    A: FeatureAccess + ?Sized,
    F: FnOnce(&[u32], &mut A) -> Result<FittedForest, RfError>,
{
    config.validate()?;
    let num_samples = access.num_samples();
    if num_samples == 0 {
        return Err(RfError::EmptyTrainingSet);
    }
    let partition = DataPartition::split(
        num_samples,
        config.train_ratio,
        config.test_ratio,
        config.valid_ratio,
        config.seed,
    )?;
    if partition.train.is_empty() {
        return Err(RfError::EmptyTrainingSet);
    }

    let FittedForest { forest, bags } = fit(&partition.train, &mut *access)?;
    let num_labels = forest.num_labels();

    let mut mode = config.training_score;
    if mode == TrainingScore::ValidScore && partition.valid.is_empty() {
        warn!("validation partition is empty, scoring out-of-bag instead");
        mode = TrainingScore::OobScore;
    }

    let mut oob_skipped = 0;
    let (choice, report) = match mode {
        TrainingScore::OobScore => {
            let oob = collect_oob(&forest, &bags, access, &partition.train)?;
            if oob.samples.is_empty() {
                warn!(
                    skipped = oob.skipped,
                    "no training sample had enough out-of-bag trees"
                );
            }
            oob_skipped = oob.skipped;
            let choice = search_threshold(&oob.samples, config.metric_score);
            (choice, evaluate(&oob.samples, &choice, num_labels))
        }
        TrainingScore::ValidScore => {
            let samples = collect_holdout(&forest, access, &partition.valid)?;
            let choice = search_threshold(&samples, config.metric_score);
            (choice, evaluate(&samples, &choice, num_labels))
        }
        TrainingScore::KFoldScore => {
            let cv = cross_validate(config, access, &partition.train)?;
            (cv.choice, cv.report)
        }
    };

    let test = if partition.test.is_empty() {
        None
    } else {
        let samples = collect_holdout(&forest, access, &partition.test)?;
        let at = ThresholdChoice::at(&samples, choice.threshold, config.metric_score);
        Some(evaluate(&samples, &at, num_labels))
    };

    let metadata = TrainingMetadata {
        num_trees: forest.num_trees(),
        num_features: forest.num_features(),
        num_labels,
        num_train: partition.train.len(),
        num_test: partition.test.len(),
        num_valid: partition.valid.len(),
        feature_subset: config.feature_subset.resolve(forest.num_features())?,
        training_score: mode,
        oob_skipped,
        total_nodes: forest.total_nodes(),
    };
    info!(
        threshold = choice.threshold,
        score = choice.score,
        test_score = test.as_ref().map(|t| t.score),
        "training complete"
    );

    Ok(TrainingResult {
        forest,
        bags,
        partition,
        choice,
        report,
        test,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use grove_io::DatasetMetadata;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::metrics::MetricKind;

    fn separable(n: usize, seed: u64) -> QuantizedDataset {
        let meta = DatasetMetadata::new(2, 2, 3).unwrap();
        let mut data = QuantizedDataset::new(&meta).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for i in 0..n {
            let label = (i % 2) as u8;
            let signal = label * 4 + rng.gen_range(0..4);
            data.push(label, &[signal, rng.gen_range(0..8)]).unwrap();
        }
        data
    }

    fn sample(actual: u8, predicted: u8, consensus: f64) -> EvaluationSample {
        EvaluationSample {
            actual,
            predicted,
            consensus,
        }
    }

    #[test]
    fn oob_min_trees_values() {
        assert_eq!(oob_min_trees(1), 1);
        assert_eq!(oob_min_trees(10), 2);
        assert_eq!(oob_min_trees(20), 3);
        assert_eq!(oob_min_trees(100), 15);
    }

    #[test]
    fn sample_in_eight_of_ten_bags_is_scored() {
        let mut data = separable(4, 1);
        let bags: Vec<Bag> = (0..10u32)
            .map(|t| {
                let mut ids = vec![1, 2];
                if t < 8 {
                    ids.push(0);
                }
                if t < 9 {
                    ids.push(3);
                }
                Bag::from_ids(ids).unwrap()
            })
            .collect();
        let config = ForestConfig::new(10).unwrap();
        let fitted = RandomForest::fit_bags(&config, &mut data, bags, 0).unwrap();
        let oob = collect_oob(&fitted.forest, &fitted.bags, &mut data, &[0, 1, 2, 3]).unwrap();
        assert_eq!(oob.samples.len(), 1);
        assert_eq!(oob.samples[0].actual, data.label_at(0).unwrap());
        assert_eq!(oob.skipped, 3);
    }

    #[test]
    fn empty_search_defaults() {
        let choice = search_threshold(&[], MetricSet::accuracy());
        assert_eq!(choice.threshold, 0.5);
        assert_eq!(choice.score, 0.0);
    }

    #[test]
    fn search_prefers_lower_threshold_on_ties() {
        // Every sample correct: accuracy is 1.0 at any threshold up to 0.6.
        let samples = [sample(0, 0, 0.6), sample(1, 1, 0.9), sample(0, 0, 1.0)];
        let choice = search_threshold(&samples, MetricSet::accuracy());
        assert_eq!(choice.threshold, 0.0);
        assert_eq!(choice.metrics.coverage, 1.0);
        assert!((choice.score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn search_rejects_low_confidence_errors_for_precision() {
        let samples = [
            sample(0, 0, 0.9),
            sample(1, 1, 0.8),
            sample(1, 0, 0.5),
            sample(0, 1, 0.55),
        ];
        let set = MetricSet::empty().with(MetricKind::Precision);
        let choice = search_threshold(&samples, set);
        assert!((choice.threshold - 0.8).abs() < 1e-12);
        assert!((choice.metrics.precision - 1.0).abs() < 1e-12);
    }

    #[test]
    fn evaluate_counts_rejections_per_label() {
        let samples = [sample(0, 0, 0.9), sample(0, 0, 0.4), sample(1, 1, 0.8)];
        let choice = ThresholdChoice::at(&samples, 0.5, MetricSet::accuracy());
        let report = evaluate(&samples, &choice, 2);
        assert_eq!(report.n_samples, 3);
        assert!((report.per_label[0].recall - 0.5).abs() < 1e-12);
        assert!((report.per_label[1].recall - 1.0).abs() < 1e-12);
        assert!((report.metrics.coverage - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn cross_validation_fold_sizes() {
        let mut data = separable(43, 2);
        let pool: Vec<u32> = (0..43).collect();
        let config = ForestConfig::new(5).unwrap().with_k_folds(4);
        let cv = cross_validate(&config, &mut data, &pool).unwrap();
        assert_eq!(cv.num_folds, 4);
        assert_eq!(cv.fold_sizes, vec![10, 10, 10, 13]);
        assert_eq!(cv.report.n_samples, 43);
        assert!(cv.report.metrics.accuracy > 0.8);
    }

    #[test]
    fn cross_validation_small_k_and_too_many_folds() {
        let mut data = separable(12, 3);
        let pool: Vec<u32> = (0..12).collect();
        let config = ForestConfig::new(3).unwrap().with_k_folds(1);
        assert_eq!(cross_validate(&config, &mut data, &pool).unwrap().num_folds, 4);
        let config = ForestConfig::new(3).unwrap().with_k_folds(20);
        assert!(matches!(
            cross_validate(&config, &mut data, &pool),
            Err(RfError::TooFewSamplesForFolds {
                num_folds: 20,
                num_samples: 12
            })
        ));
    }

    #[test]
    fn train_with_test_partition() {
        let mut data = separable(100, 4);
        let config = ForestConfig::new(10)
            .unwrap()
            .with_split_ratios(0.7, 0.3, 0.0);
        let result = train(&config, &mut data).unwrap();
        assert_eq!(result.metadata.num_train, 70);
        assert_eq!(result.metadata.num_test, 30);
        assert_eq!(result.metadata.training_score, TrainingScore::OobScore);
        let test = result.test.unwrap();
        assert_eq!(test.n_samples, 30);
        assert_eq!(test.threshold, result.choice.threshold);
        assert!(test.metrics.accuracy > 0.8);
    }

    #[test]
    fn empty_validation_falls_back_to_oob() {
        let mut data = separable(40, 5);
        let config = ForestConfig::new(6)
            .unwrap()
            .with_training_score(TrainingScore::ValidScore);
        let result = train(&config, &mut data).unwrap();
        assert_eq!(result.metadata.training_score, TrainingScore::OobScore);
    }

    #[test]
    fn parallel_training_matches_sequential() {
        let mut data = separable(80, 6);
        let config = ForestConfig::new(6)
            .unwrap()
            .with_split_ratios(0.6, 0.2, 0.2)
            .with_training_score(TrainingScore::ValidScore);
        let seq = train(&config, &mut data).unwrap();
        let par = train_parallel(&config, &data).unwrap();
        assert_eq!(seq.forest, par.forest);
        assert_eq!(seq.report, par.report);
    }
}
