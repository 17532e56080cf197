//! Streaming adaptation of a trained forest to concept drift.
//!
//! A [`StreamingForest`] scores every tree against each labelled sample with
//! a fading average, moves leaf labels toward what it sees, and now and then
//! swaps its weakest tree for one trained on recent data. [`DriftMonitor`]
//! drives a stream test-then-train and triggers full retrains when windowed
//! accuracy collapses.

use std::collections::VecDeque;

use grove_io::{DatasetMetadata, QuantizedDataset, Sample};
use tracing::{debug, info, instrument, warn};

use crate::bag::{BagSampler, derive_rng};
use crate::builder::TreeBuilder;
use crate::config::{FeatureSubset, ForestConfig};
use crate::error::RfError;
use crate::forest::RandomForest;
use crate::tree::DecisionTree;

/// Split-stream salt for replacement candidates.
const REPLACE_SALT: u64 = 0x5EED_7EE5_D21F_7000;

/// Bag-stream stride between full retrains.
const RETRAIN_STREAM_STRIDE: u64 = 1 << 20;

/// Constants for streaming updates.
///
/// # Defaults
///
/// | Parameter | Default |
/// |---|---|
/// | fade | 0.96 |
/// | check_interval | 500 |
/// | margin | 0.15 |
/// | score_floor | 0.7 |
/// | min_buffer | 500 |
/// | recent_capacity | 2000 |
/// | retrain_capacity | 10000 |
/// | holdout | 0.3 |
/// | min_retrain_samples | 100 |
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub(crate) fade: f64,
    pub(crate) check_interval: u64,
    pub(crate) margin: f64,
    pub(crate) score_floor: f64,
    pub(crate) min_buffer: usize,
    pub(crate) recent_capacity: usize,
    pub(crate) retrain_capacity: usize,
    pub(crate) holdout: f64,
    pub(crate) min_retrain_samples: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            fade: 0.96,
            check_interval: 500,
            margin: 0.15,
            score_floor: 0.7,
            min_buffer: 500,
            recent_capacity: 2000,
            retrain_capacity: 10_000,
            holdout: 0.3,
            min_retrain_samples: 100,
        }
    }
}

impl DriftConfig {
    /// Check every parameter against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidDriftConfig`] naming the first bad parameter:
    ///
    /// | Parameter | Must be |
    /// |---|---|
    /// | `fade` | in `[0, 1]` |
    /// | `holdout` | in `(0, 1)` |
    /// | `min_buffer` | at least 2 |
    /// | `recent_capacity` | at least `min_buffer` |
    /// | `check_interval` | at least 1 |
    pub fn validate(&self) -> Result<(), RfError> {
        if !(0.0..=1.0).contains(&self.fade) {
            return Err(invalid("fade", format!("must be in [0, 1], got {}", self.fade)));
        }
        if !(self.holdout > 0.0 && self.holdout < 1.0) {
            return Err(invalid(
                "holdout",
                format!("must be in (0, 1), got {}", self.holdout),
            ));
        }
        if self.min_buffer < 2 {
            return Err(invalid(
                "min_buffer",
                format!("must be at least 2, got {}", self.min_buffer),
            ));
        }
        if self.recent_capacity < self.min_buffer {
            return Err(invalid(
                "recent_capacity",
                format!(
                    "must be at least min_buffer ({}), got {}",
                    self.min_buffer, self.recent_capacity
                ),
            ));
        }
        if self.check_interval == 0 {
            return Err(invalid("check_interval", "must be at least 1".into()));
        }
        Ok(())
    }

    // --- Setters ---

    /// Set the score fading factor.
    #[must_use]
    pub fn with_fade(mut self, fade: f64) -> Self {
        self.fade = fade;
        self
    }

    /// Set how many samples pass between worst-tree checks.
    #[must_use]
    pub fn with_check_interval(mut self, check_interval: u64) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Set how far below the average score the worst tree must fall.
    #[must_use]
    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    /// Set the absolute score the worst tree must fall below.
    #[must_use]
    pub fn with_score_floor(mut self, score_floor: f64) -> Self {
        self.score_floor = score_floor;
        self
    }

    /// Set the recent-buffer size a replacement needs.
    #[must_use]
    pub fn with_min_buffer(mut self, min_buffer: usize) -> Self {
        self.min_buffer = min_buffer;
        self
    }

    /// Set the recent-buffer capacity.
    #[must_use]
    pub fn with_recent_capacity(mut self, recent_capacity: usize) -> Self {
        self.recent_capacity = recent_capacity;
        self
    }

    /// Set the retained-buffer capacity.
    #[must_use]
    pub fn with_retrain_capacity(mut self, retrain_capacity: usize) -> Self {
        self.retrain_capacity = retrain_capacity;
        self
    }

    /// Set the newest share of the recent buffer used to validate a candidate.
    #[must_use]
    pub fn with_holdout(mut self, holdout: f64) -> Self {
        self.holdout = holdout;
        self
    }

    /// Set the retained samples a full retrain needs.
    #[must_use]
    pub fn with_min_retrain_samples(mut self, min_retrain_samples: usize) -> Self {
        self.min_retrain_samples = min_retrain_samples;
        self
    }

    // --- Getters ---

    /// Return the score fading factor.
    #[must_use]
    pub fn fade(&self) -> f64 {
        self.fade
    }

    /// Return the worst-tree check interval.
    #[must_use]
    pub fn check_interval(&self) -> u64 {
        self.check_interval
    }

    /// Return the recent-buffer capacity.
    #[must_use]
    pub fn recent_capacity(&self) -> usize {
        self.recent_capacity
    }

    /// Return the retained-buffer capacity.
    #[must_use]
    pub fn retrain_capacity(&self) -> usize {
        self.retrain_capacity
    }
}

fn invalid(parameter: &'static str, reason: String) -> RfError {
    RfError::InvalidDriftConfig { parameter, reason }
}

/// What one observed sample did.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ObserveOutcome {
    /// Trees whose leaf held the right label before relabeling.
    pub trees_correct: usize,
    /// Worst-tree check result, when a check ran and its trigger fired.
    pub replacement: Option<Replacement>,
}

/// A worst-tree check that found a candidate worth testing.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Replacement {
    /// Index of the worst tree.
    pub tree: usize,
    /// Its score before the check.
    pub old_score: f64,
    /// Mean score over all trees.
    pub average_score: f64,
    /// Holdout accuracy of the current tree.
    pub old_accuracy: f64,
    /// Holdout accuracy of the candidate.
    pub new_accuracy: f64,
    /// Whether the tree was swapped out.
    pub replaced: bool,
}

/// A forest that keeps learning from labelled samples.
#[derive(Debug, Clone)]
pub struct StreamingForest {
    forest: RandomForest,
    config: DriftConfig,
    recent: VecDeque<Sample>,
    retained: VecDeque<Sample>,
    processed: u64,
    retrains: u64,
}

impl StreamingForest {
    /// Wrap a trained forest.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidDriftConfig`] if `config` fails
    /// [`DriftConfig::validate`].
    pub fn new(forest: RandomForest, config: DriftConfig) -> Result<Self, RfError> {
        config.validate()?;
        Ok(Self {
            recent: VecDeque::with_capacity(config.recent_capacity),
            retained: VecDeque::new(),
            forest,
            config,
            processed: 0,
            retrains: 0,
        })
    }

    /// Learn from one labelled sample.
    ///
    /// Each tree's score fades toward whether its landing leaf was right,
    /// then that leaf takes a vote for the true label. Every
    /// `check_interval` samples the worst tree is considered for
    /// replacement.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`RfError::PredictionFeatureMismatch`] | wrong sample width |
    /// | [`RfError::LabelOutOfRange`] | label outside the model's label space |
    /// | training errors | a replacement tree failed to build |
    pub fn observe(&mut self, sample: Sample) -> Result<ObserveOutcome, RfError> {
        if sample.features.len() != self.forest.num_features() {
            return Err(RfError::PredictionFeatureMismatch {
                expected: self.forest.num_features(),
                got: sample.features.len(),
            });
        }
        if usize::from(sample.label) >= self.forest.num_labels() {
            return Err(RfError::LabelOutOfRange {
                label: sample.label,
                num_labels: self.forest.num_labels(),
            });
        }

        let fade = self.config.fade;
        let mut trees_correct = 0;
        for t in 0..self.forest.num_trees() {
            let tree = &mut self.forest.trees_mut()[t];
            let leaf = tree.leaf_for(&sample.features)?;
            let correct = tree.nodes()[leaf.index()].label() == Some(sample.label);
            tree.relabel_leaf(leaf, sample.label);
            let score = &mut self.forest.tree_scores_mut()[t];
            *score = *score * fade + if correct { 1.0 - fade } else { 0.0 };
            trees_correct += usize::from(correct);
        }

        push_bounded(&mut self.recent, sample.clone(), self.config.recent_capacity);
        push_bounded(&mut self.retained, sample, self.config.retrain_capacity);
        self.processed += 1;

        let due = self.processed % self.config.check_interval == 0
            && self.forest.num_trees() > 1;
        let replacement = if due { self.replace_worst_tree()? } else { None };
        Ok(ObserveOutcome {
            trees_correct,
            replacement,
        })
    }

    /// Try to swap the lowest-scoring tree for one trained on recent data.
    ///
    /// Fires only when the worst score is `margin` below the average, under
    /// `score_floor`, and the recent buffer holds at least `min_buffer`
    /// samples. A candidate trained on the oldest part of the buffer and
    /// the current tree are both scored on the newest `holdout` share. If
    /// the candidate wins, a tree trained on the full buffer replaces the
    /// worst one and takes the average score; otherwise the worst score is
    /// pulled halfway to the average. Buffers under two samples leave no
    /// room for a holdout and never fire.
    ///
    /// # Errors
    ///
    /// Propagates tree-building errors.
    #[instrument(skip_all, fields(processed = self.processed, buffered = self.recent.len()))]
    pub fn replace_worst_tree(&mut self) -> Result<Option<Replacement>, RfError> {
        let scores = self.forest.scores();
        let Some((worst, &min)) = scores
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
        else {
            return Ok(None);
        };
        let average = scores.iter().sum::<f64>() / scores.len() as f64;
        if !(min < average - self.config.margin
            && min < self.config.score_floor
            && self.recent.len() >= self.config.min_buffer)
        {
            return Ok(None);
        }

        let n = self.recent.len();
        if n < 2 {
            return Ok(None);
        }
        let data = self.buffer_dataset(&self.recent)?;
        let train_len = ((n as f64 * (1.0 - self.config.holdout)) as usize).clamp(1, n - 1);
        let holdout = train_len..n;

        let candidate = self.build_candidate(&data, 0..train_len)?;
        let old_accuracy = holdout_accuracy(&self.forest.trees()[worst], &data, holdout.clone())?;
        let new_accuracy = holdout_accuracy(&candidate, &data, holdout)?;

        let replaced = new_accuracy > old_accuracy;
        if replaced {
            let tree = self.build_candidate(&data, 0..n)?;
            self.forest.replace_tree(worst, tree);
            self.forest.tree_scores_mut()[worst] = average;
            info!(
                tree = worst,
                score = min,
                old_accuracy,
                new_accuracy,
                "replaced tree"
            );
        } else {
            self.forest.tree_scores_mut()[worst] = (min + average) / 2.0;
            debug!(tree = worst, old_accuracy, new_accuracy, "kept tree");
        }
        Ok(Some(Replacement {
            tree: worst,
            old_score: min,
            average_score: average,
            old_accuracy,
            new_accuracy,
            replaced,
        }))
    }

    /// Rebuild every tree from the retained buffer with bootstrap bags.
    ///
    /// Returns `false` without touching the forest when fewer than
    /// `min_retrain_samples` samples are retained. Scores reset to 1.0.
    ///
    /// # Errors
    ///
    /// Propagates tree-building errors.
    #[instrument(skip_all, fields(retained = self.retained.len()))]
    pub fn retrain_all(&mut self) -> Result<bool, RfError> {
        if self.retained.len() < self.config.min_retrain_samples {
            warn!(
                retained = self.retained.len(),
                needed = self.config.min_retrain_samples,
                "not enough data to retrain"
            );
            return Ok(false);
        }
        let mut data = self.buffer_dataset(&self.retained)?;
        let pool: Vec<u32> = (0..data.len() as u32).collect();
        let config = self
            .forest
            .config()
            .clone()
            .with_bootstrap(true);

        self.retrains += 1;
        let base = self.retrains * RETRAIN_STREAM_STRIDE;
        let bags = BagSampler::from_config(&config).draw_bags_from(
            base,
            &pool,
            self.forest.num_trees(),
        )?;
        let fitted = RandomForest::fit_bags(&config, &mut data, bags, base)?;
        let trained = self.forest.config().clone();
        self.forest = fitted.forest;
        self.forest.config = trained;
        info!(
            samples = pool.len(),
            num_trees = self.forest.num_trees(),
            "retrained forest"
        );
        Ok(true)
    }

    fn buffer_dataset(&self, samples: &VecDeque<Sample>) -> Result<QuantizedDataset, RfError> {
        let metadata = DatasetMetadata::new(
            self.forest.num_features() as u16,
            self.forest.num_labels() as u16,
            self.forest.quantization_bits(),
        )?;
        Ok(QuantizedDataset::from_samples(&metadata, samples)?)
    }

    /// Tree on every sample in `range`, without bagging, sqrt features.
    fn build_candidate(
        &self,
        data: &QuantizedDataset,
        range: std::ops::Range<usize>,
    ) -> Result<DecisionTree, RfError> {
        let config = self
            .forest
            .config()
            .clone()
            .with_feature_subset(FeatureSubset::Sqrt);
        let mut builder = TreeBuilder::new(
            &config,
            data.num_features(),
            data.num_labels(),
            data.layout().quantization_bits(),
        )?;
        let indices: Vec<u32> = (range.start as u32..range.end as u32).collect();
        let mut rng = derive_rng(config.seed() ^ REPLACE_SALT, self.processed, range.len() as u64);
        let mut access = data;
        builder.build_from_indices(&mut access, &indices, &mut rng)
    }

    // --- Getters ---

    /// Borrow the forest.
    #[must_use]
    pub fn forest(&self) -> &RandomForest {
        &self.forest
    }

    /// Unwrap the forest.
    #[must_use]
    pub fn into_forest(self) -> RandomForest {
        self.forest
    }

    /// Return the streaming config.
    #[must_use]
    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Samples observed so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Samples in the recent buffer.
    #[must_use]
    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    /// Samples in the retained buffer.
    #[must_use]
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }
}

fn push_bounded(buffer: &mut VecDeque<Sample>, sample: Sample, capacity: usize) {
    if capacity == 0 {
        return;
    }
    if buffer.len() == capacity {
        buffer.pop_front();
    }
    buffer.push_back(sample);
}

fn holdout_accuracy(
    tree: &DecisionTree,
    data: &QuantizedDataset,
    range: std::ops::Range<usize>,
) -> Result<f64, RfError> {
    if range.is_empty() {
        return Ok(0.0);
    }
    let total = range.len();
    let mut correct = 0usize;
    for index in range {
        let index = index as u32;
        if tree.predict(data.row(index)?)? == data.label_at(index)? {
            correct += 1;
        }
    }
    Ok(correct as f64 / total as f64)
}

/// Windowed accuracy at one point of a monitored stream.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct WindowPoint {
    /// Stream position the window ends at.
    pub position: usize,
    /// Accuracy over the last `window` predictions.
    pub accuracy: f64,
    /// Whether a full retrain ran at this point.
    pub retrained: bool,
}

/// Sliding-window accuracy tracker with retrain triggering.
///
/// # Defaults
///
/// | Parameter | Default |
/// |---|---|
/// | window | 200 |
/// | step | 10 |
/// | accuracy_threshold | 0.5 |
/// | patience | 2000 |
/// | min_retrain_buffer | 1000 |
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DriftMonitor {
    /// Predictions per accuracy window.
    pub window: usize,
    /// Samples between window reports.
    pub step: usize,
    /// Retrain when window accuracy falls below this.
    pub accuracy_threshold: f64,
    /// Samples that must pass between retrains.
    pub patience: usize,
    /// Retained samples a retrain needs.
    pub min_retrain_buffer: usize,
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self {
            window: 200,
            step: 10,
            accuracy_threshold: 0.5,
            patience: 2000,
            min_retrain_buffer: 1000,
        }
    }
}

impl DriftMonitor {
    /// Run `samples` through `stream` test-then-train.
    ///
    /// Each sample is predicted before the forest learns from it. Every
    /// `step` samples, once a full window of predictions exists, a point is
    /// reported.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`StreamingForest::observe`] and
    /// [`StreamingForest::retrain_all`].
    #[instrument(skip_all, fields(samples = samples.len(), window = self.window))]
    pub fn run(
        &self,
        stream: &mut StreamingForest,
        samples: &[Sample],
    ) -> Result<Vec<WindowPoint>, RfError> {
        let window = self.window.max(1);
        let step = self.step.max(1);
        let mut hits: VecDeque<bool> = VecDeque::with_capacity(window);
        let mut correct_in_window = 0usize;
        let mut cooldown = 0usize;
        let mut points = Vec::new();

        for (i, sample) in samples.iter().enumerate() {
            let predicted = stream.forest().predict(&sample.features)?;
            let hit = predicted == sample.label;
            if hits.len() == window && hits.pop_front() == Some(true) {
                correct_in_window -= 1;
            }
            hits.push_back(hit);
            correct_in_window += usize::from(hit);

            stream.observe(sample.clone())?;
            cooldown = cooldown.saturating_sub(1);

            if i > 0 && i % step == 0 && i >= window {
                let accuracy = correct_in_window as f64 / window as f64;
                let mut retrained = false;
                if accuracy < self.accuracy_threshold
                    && cooldown == 0
                    && stream.retained_len() >= self.min_retrain_buffer
                {
                    retrained = stream.retrain_all()?;
                    if retrained {
                        cooldown = self.patience;
                    }
                }
                points.push(WindowPoint {
                    position: i,
                    accuracy,
                    retrained,
                });
            }
        }
        info!(
            points = points.len(),
            retrains = points.iter().filter(|p| p.retrained).count(),
            "stream complete"
        );
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;

    /// Label is `feature 0 > 3`, optionally flipped.
    fn concept(n: usize, flipped: bool, seed: u64) -> Vec<Sample> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let a: u8 = rng.gen_range(0..8);
                let b: u8 = rng.gen_range(0..8);
                let label = u8::from(a > 3) ^ u8::from(flipped);
                Sample::new(label, vec![a, b])
            })
            .collect()
    }

    fn forest_on(samples: &[Sample], num_trees: usize) -> RandomForest {
        let meta = DatasetMetadata::new(2, 2, 3).unwrap();
        let mut data = QuantizedDataset::from_samples(&meta, samples).unwrap();
        let pool: Vec<u32> = (0..samples.len() as u32).collect();
        let config = ForestConfig::new(num_trees)
            .unwrap()
            .with_seed(9)
            .with_feature_subset(FeatureSubset::All);
        RandomForest::fit(&config, &mut data, &pool).unwrap().forest
    }

    #[test]
    fn scores_fade_toward_correctness() {
        let train = concept(200, false, 1);
        let mut stream =
            StreamingForest::new(forest_on(&train, 3), DriftConfig::default()).unwrap();
        // A sample every tree gets wrong.
        let wrong = Sample::new(0, vec![7, 0]);
        let outcome = stream.observe(wrong).unwrap();
        assert_eq!(outcome.trees_correct, 0);
        for &s in stream.forest().scores() {
            assert!((s - 0.96).abs() < 1e-12);
        }
        let right = Sample::new(0, vec![0, 0]);
        stream.observe(right).unwrap();
        for &s in stream.forest().scores() {
            assert!((s - (0.96 * 0.96 + 0.04)).abs() < 1e-12);
        }
        assert_eq!(stream.processed(), 2);
    }

    #[test]
    fn repeated_votes_flip_a_leaf() {
        let train = concept(200, false, 2);
        let mut stream =
            StreamingForest::new(forest_on(&train, 1), DriftConfig::default()).unwrap();
        let features = vec![7u8, 3];
        assert_eq!(stream.forest().predict(&features).unwrap(), 1);
        for _ in 0..500 {
            stream.observe(Sample::new(0, features.clone())).unwrap();
        }
        assert_eq!(stream.forest().predict(&features).unwrap(), 0);
    }

    #[test]
    fn observe_rejects_bad_samples() {
        let train = concept(50, false, 3);
        let mut stream =
            StreamingForest::new(forest_on(&train, 2), DriftConfig::default()).unwrap();
        assert!(matches!(
            stream.observe(Sample::new(0, vec![1])),
            Err(RfError::PredictionFeatureMismatch { .. })
        ));
        assert!(matches!(
            stream.observe(Sample::new(5, vec![1, 1])),
            Err(RfError::LabelOutOfRange { label: 5, .. })
        ));
        assert_eq!(stream.processed(), 0);
    }

    #[test]
    fn buffers_are_bounded() {
        let train = concept(50, false, 4);
        let config = DriftConfig::default()
            .with_min_buffer(5)
            .with_recent_capacity(10)
            .with_retrain_capacity(25);
        let mut stream = StreamingForest::new(forest_on(&train, 2), config).unwrap();
        for s in concept(40, false, 5) {
            stream.observe(s).unwrap();
        }
        assert_eq!(stream.recent_len(), 10);
        assert_eq!(stream.retained_len(), 25);
    }

    #[test]
    fn no_replacement_without_trigger() {
        let train = concept(100, false, 6);
        let mut stream =
            StreamingForest::new(forest_on(&train, 3), DriftConfig::default()).unwrap();
        // All scores start equal, so no tree is below the average margin.
        assert_eq!(stream.replace_worst_tree().unwrap(), None);
    }

    #[test]
    fn drift_config_rejects_out_of_range_values() {
        assert!(DriftConfig::default().validate().is_ok());
        let bad = [
            ("fade", DriftConfig::default().with_fade(1.5)),
            ("fade", DriftConfig::default().with_fade(-0.1)),
            ("holdout", DriftConfig::default().with_holdout(0.0)),
            ("holdout", DriftConfig::default().with_holdout(1.0)),
            ("min_buffer", DriftConfig::default().with_min_buffer(0)),
            ("min_buffer", DriftConfig::default().with_min_buffer(1)),
            (
                "recent_capacity",
                DriftConfig::default().with_recent_capacity(0),
            ),
            (
                "recent_capacity",
                DriftConfig::default()
                    .with_min_buffer(50)
                    .with_recent_capacity(49),
            ),
            ("check_interval", DriftConfig::default().with_check_interval(0)),
        ];
        for (name, config) in bad {
            match config.validate() {
                Err(RfError::InvalidDriftConfig { parameter, .. }) => assert_eq!(parameter, name),
                other => panic!("{name}: expected InvalidDriftConfig, got {other:?}"),
            }
        }
    }

    #[test]
    fn streaming_forest_rejects_invalid_config() {
        let train = concept(50, false, 16);
        let config = DriftConfig::default()
            .with_min_buffer(0)
            .with_recent_capacity(0);
        assert!(matches!(
            StreamingForest::new(forest_on(&train, 2), config),
            Err(RfError::InvalidDriftConfig {
                parameter: "min_buffer",
                ..
            })
        ));
    }

    #[test]
    fn smallest_buffer_still_holds_out_a_sample() {
        let train = concept(100, false, 17);
        let mut forest = forest_on(&train, 3);
        forest.tree_scores_mut()[1] = 0.1;
        let config = DriftConfig::default().with_min_buffer(2);
        let mut stream = StreamingForest::new(forest, config).unwrap();

        // Triggered by score, but nothing buffered yet.
        assert_eq!(stream.replace_worst_tree().unwrap(), None);

        for s in concept(2, true, 18) {
            push_bounded(&mut stream.recent, s, 2000);
        }
        let outcome = stream.replace_worst_tree().unwrap().unwrap();
        assert_eq!(outcome.tree, 1);
        assert!((0.0..=1.0).contains(&outcome.old_accuracy));
        assert!((0.0..=1.0).contains(&outcome.new_accuracy));
    }

    #[test]
    fn worst_tree_replaced_after_flip() {
        let train = concept(300, false, 7);
        let config = DriftConfig::default().with_min_buffer(100);
        let mut forest = forest_on(&train, 3);
        forest.tree_scores_mut()[1] = 0.1;
        let mut stream = StreamingForest::new(forest, config).unwrap();
        // Fill the recent buffer with the flipped concept without learning
        // through observe's own periodic check.
        for s in concept(200, true, 8) {
            push_bounded(&mut stream.recent, s, 2000);
        }
        let outcome = stream.replace_worst_tree().unwrap().unwrap();
        assert_eq!(outcome.tree, 1);
        assert!(outcome.replaced);
        assert!(outcome.new_accuracy > outcome.old_accuracy);
        let average = (1.0 + 0.1 + 1.0) / 3.0;
        assert!((stream.forest().scores()[1] - average).abs() < 1e-12);
    }

    #[test]
    fn retrain_needs_enough_samples() {
        let train = concept(100, false, 10);
        let mut stream =
            StreamingForest::new(forest_on(&train, 2), DriftConfig::default()).unwrap();
        for s in concept(50, true, 11) {
            stream.observe(s).unwrap();
        }
        assert!(!stream.retrain_all().unwrap());
        for s in concept(100, true, 12) {
            stream.observe(s).unwrap();
        }
        assert!(stream.retrain_all().unwrap());
        assert!(stream.forest().scores().iter().all(|&s| s == 1.0));
        assert_eq!(stream.forest().num_trees(), 2);
    }

    #[test]
    fn monitor_reports_and_retrains_on_drift() {
        let train = concept(400, false, 13);
        let mut stream =
            StreamingForest::new(forest_on(&train, 5), DriftConfig::default()).unwrap();
        let mut samples = concept(300, false, 14);
        samples.extend(concept(700, true, 15));
        let monitor = DriftMonitor {
            window: 100,
            step: 10,
            accuracy_threshold: 0.5,
            patience: 300,
            min_retrain_buffer: 200,
        };
        let points = monitor.run(&mut stream, &samples).unwrap();
        // Positions 100, 110, ..., 990.
        assert_eq!(points.len(), 90);
        assert_eq!(points[0].position, 100);
        assert!(points[0].accuracy > 0.9);
        assert!(points.iter().any(|p| p.retrained));
        let first = points.iter().position(|p| p.retrained).unwrap();
        for p in &points[first + 1..] {
            if p.retrained {
                assert!(p.position >= points[first].position + 300);
            }
        }
    }
}
