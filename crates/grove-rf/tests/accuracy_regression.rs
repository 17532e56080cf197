//! Accuracy and determinism regression tests for grove-rf.
//!
//! A deterministic synthetic dataset is written to disk and trained on both
//! through the chunk cache and from memory. The paths must agree exactly and
//! the forest must stay accurate.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

use grove_io::{
    CacheOptions, ChunkedDataset, DatasetMetadata, FeatureAccess, FileSource, QuantizedDataset,
    Sample,
};
use grove_rf::{
    DriftConfig, DriftMonitor, ForestConfig, GridRanges, DatasetProfile, MetricKind,
    RandomForest, StreamingForest, TrainingScore, grid_search, train, train_parallel,
};

// ---------------------------------------------------------------------------
// Helper: deterministic synthetic quantized dataset
// ---------------------------------------------------------------------------

/// 600 samples, 8 features at 3 bits, 3 labels.
///
/// Features 0-2 are informative (`label * 2 + noise in [0, 1]`); the rest
/// are uniform noise. Labels are assigned round-robin.
fn make_dataset(n: usize, seed: u64) -> QuantizedDataset {
    let metadata = DatasetMetadata::new(8, 3, 3).unwrap();
    let mut data = QuantizedDataset::new(&metadata).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for i in 0..n {
        let label = (i % 3) as u8;
        let features: Vec<u8> = (0..8)
            .map(|f| {
                if f < 3 {
                    label * 2 + rng.gen_range(0..2)
                } else {
                    rng.gen_range(0..8)
                }
            })
            .collect();
        data.push(label, &features).unwrap();
    }
    data
}

fn open_chunked(dir: &TempDir, data: &QuantizedDataset) -> ChunkedDataset<FileSource> {
    let bin = dir.path().join("synthetic.bin");
    let dp = dir.path().join("synthetic_dp.csv");
    data.write(&bin).unwrap();
    data.metadata().write(&dp).unwrap();
    let metadata = DatasetMetadata::read(&dp).unwrap();
    let options = CacheOptions::new().with_slots(4).with_chunk_records(32);
    ChunkedDataset::open(FileSource::open(&bin).unwrap(), metadata, options).unwrap()
}

fn config() -> ForestConfig {
    ForestConfig::new(15)
        .unwrap()
        .with_seed(42)
        .with_split_ratios(0.7, 0.15, 0.15)
}

// ---------------------------------------------------------------------------
// a) chunked and in-memory training agree
// ---------------------------------------------------------------------------

#[test]
fn chunked_training_matches_in_memory() {
    let dir = TempDir::new().unwrap();
    let mut data = make_dataset(600, 42);
    let mut chunked = open_chunked(&dir, &data);

    let on_disk = train(&config(), &mut chunked).unwrap();
    let in_memory = train(&config(), &mut data).unwrap();

    assert_eq!(on_disk.forest, in_memory.forest);
    assert_eq!(on_disk.partition, in_memory.partition);
    assert_eq!(on_disk.choice, in_memory.choice);

    let stats = chunked.cache_stats().unwrap();
    assert!(stats.requests() > 0);
    assert!(stats.hit_rate() > 0.5, "hit rate {}", stats.hit_rate());
}

// ---------------------------------------------------------------------------
// b) sequential and parallel training agree
// ---------------------------------------------------------------------------

#[test]
fn parallel_training_matches_sequential() {
    let mut data = make_dataset(600, 42);
    let cfg = config().with_training_score(TrainingScore::ValidScore);
    let seq = train(&cfg, &mut data).unwrap();
    let par = train_parallel(&cfg, &data).unwrap();
    assert_eq!(seq.forest, par.forest);
    assert_eq!(seq.report, par.report);
}

// ---------------------------------------------------------------------------
// c) accuracy floors
// ---------------------------------------------------------------------------

/// Reference: the informative features separate the labels exactly.
#[test]
fn oob_and_test_accuracy_above_threshold() {
    let mut data = make_dataset(600, 42);
    let result = train(&config(), &mut data).unwrap();
    assert_eq!(result.metadata.training_score, TrainingScore::OobScore);
    assert!(
        result.report.metrics.accuracy > 0.9,
        "oob accuracy {}",
        result.report.metrics.accuracy
    );
    let test = result.test.unwrap();
    assert_eq!(test.n_samples, 90);
    assert!(test.metrics.accuracy > 0.9, "test accuracy {}", test.metrics.accuracy);
    assert_eq!(test.per_label.len(), 3);
}

#[test]
fn k_fold_accuracy_above_threshold() {
    let mut data = make_dataset(300, 7);
    let cfg = config()
        .with_training_score(TrainingScore::KFoldScore)
        .with_k_folds(5)
        .with_metric(MetricKind::F1);
    let result = train(&cfg, &mut data).unwrap();
    assert_eq!(result.metadata.training_score, TrainingScore::KFoldScore);
    assert_eq!(result.report.n_samples, result.partition.train.len());
    assert!(result.report.metrics.accuracy > 0.85);
}

// ---------------------------------------------------------------------------
// d) model file round trip
// ---------------------------------------------------------------------------

#[test]
fn saved_model_predicts_identically() {
    let dir = TempDir::new().unwrap();
    let mut data = make_dataset(300, 3);
    let forest = train(&config(), &mut data).unwrap().forest;
    let path = dir.path().join("model.bin");
    forest.save(&path).unwrap();
    let loaded = RandomForest::load(&path).unwrap();

    let rows: Vec<Vec<u8>> = (0..data.len() as u32)
        .map(|i| data.row(i).unwrap().to_vec())
        .collect();
    assert_eq!(
        loaded.predict_batch(&rows).unwrap(),
        forest.predict_batch(&rows).unwrap()
    );
    assert_eq!(loaded.quantization_bits(), 3);
}

// ---------------------------------------------------------------------------
// e) grid search over derived ranges
// ---------------------------------------------------------------------------

#[test]
fn grid_search_over_derived_ranges() {
    let mut data = make_dataset(300, 5);
    let profile = DatasetProfile::from_label_counts(
        data.len(),
        data.num_features(),
        &data.label_counts(),
    );
    let ranges = GridRanges::derive(&profile);
    let cfg = ForestConfig::new(5).unwrap().with_seed(1);
    let result = grid_search(&cfg, &mut data, &ranges, 2).unwrap();
    assert!(!result.trials.is_empty());
    assert!(result.trials.iter().all(|t| t.score <= result.best.score));
    let tuned = result.apply(cfg);
    assert_eq!(tuned.min_split(), result.best.min_split);
}

// ---------------------------------------------------------------------------
// f) streaming adaptation
// ---------------------------------------------------------------------------

#[test]
fn streaming_recovers_after_label_swap() {
    let mut data = make_dataset(600, 9);
    let forest = train(&config(), &mut data).unwrap().forest;
    let mut stream = StreamingForest::new(forest, DriftConfig::default()).unwrap();

    // Labels 0 and 1 swap after the drift point.
    let drifted = make_dataset(3000, 10);
    let samples: Vec<Sample> = (0..drifted.len() as u32)
        .map(|i| {
            let mut s = drifted.sample(i).unwrap();
            s.label = match s.label {
                0 => 1,
                1 => 0,
                l => l,
            };
            s
        })
        .collect();

    let monitor = DriftMonitor {
        window: 200,
        step: 50,
        accuracy_threshold: 0.6,
        patience: 1000,
        min_retrain_buffer: 500,
    };
    let points = monitor.run(&mut stream, &samples).unwrap();
    let first = points.first().unwrap();
    assert!(first.accuracy < 0.6);
    let last = points.last().unwrap();
    assert!(last.accuracy > 0.9, "final window accuracy {}", last.accuracy);
    assert_eq!(stream.processed(), 3000);
}
