use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use grove_io::{
    CacheOptions, ChunkedDataset, DatasetMetadata, FeatureAccess, FileSource, QuantizedDataset,
    Sample,
};
use grove_rf::{
    ClassMetrics, ConfusionMatrix, DatasetProfile, DriftConfig, DriftMonitor, EvaluationReport,
    ForestConfig, GridRanges, GridTrial, MetricSet, RandomForest, SplitCriterion,
    StreamingForest, ThresholdMetrics, TrainingScore, WindowPoint, grid_search, train,
    train_parallel,
};

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Memory-bounded random forests over chunked, quantized datasets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed; overrides the config file
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Dataset location and chunk cache shape.
#[derive(Args, Debug, Clone)]
struct DataArgs {
    /// Path to the binary dataset
    #[arg(long)]
    data: PathBuf,

    /// Path to the dataset parameter CSV
    #[arg(long)]
    metadata: PathBuf,

    /// Records per chunk (sized from a 256 KiB budget if not set)
    #[arg(long)]
    chunk_records: Option<usize>,

    /// Number of chunk cache slots
    #[arg(long, default_value_t = CacheOptions::DEFAULT_SLOTS)]
    cache_slots: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Train a forest, report its scores and optionally save it
    Train {
        #[command(flatten)]
        data: DataArgs,

        /// JSON forest config; defaults apply for missing keys
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load the whole dataset and train trees in parallel
        #[arg(long, default_value_t = false)]
        in_memory: bool,

        /// Grid-search min_split, min_leaf and max_depth before the final fit
        #[arg(long, default_value_t = false)]
        grid: bool,

        /// Step between grid candidates
        #[arg(long, default_value_t = 1)]
        grid_step: usize,

        /// Write the trained model here
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Score a saved model on a labelled dataset
    Predict {
        /// Path to the trained model binary
        #[arg(long)]
        model: PathBuf,

        #[command(flatten)]
        data: DataArgs,
    },

    /// Train on a warmup prefix, then stream the rest test-then-train
    Stream {
        #[command(flatten)]
        data: DataArgs,

        /// JSON forest config for the warmup fit
        #[arg(long)]
        config: Option<PathBuf>,

        /// Samples used for the initial fit
        #[arg(long, default_value_t = 1000)]
        warmup: usize,

        /// Predictions per accuracy window
        #[arg(long, default_value_t = 200)]
        window: usize,

        /// Samples between window reports
        #[arg(long, default_value_t = 10)]
        step: usize,

        /// Retrain when window accuracy falls below this
        #[arg(long, default_value_t = 0.5)]
        threshold: f64,

        /// Samples that must pass between retrains
        #[arg(long, default_value_t = 2000)]
        patience: usize,

        /// Retained samples a retrain needs
        #[arg(long, default_value_t = 1000)]
        min_retrain_buffer: usize,
    },

    /// Describe a dataset and suggest grid ranges
    Inspect {
        #[command(flatten)]
        data: DataArgs,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct TrainOutput {
    num_samples: u32,
    num_features: usize,
    num_labels: usize,
    num_trees: usize,
    total_nodes: usize,
    training_score: TrainingScore,
    threshold: f64,
    score: f64,
    metrics: ThresholdMetrics,
    per_label: Vec<ClassMetrics>,
    test: Option<EvaluationReport>,
    grid: Option<GridTrial>,
    cache_hit_rate: Option<f64>,
    elapsed_secs: f64,
    model: Option<PathBuf>,
}

#[derive(Serialize)]
struct PredictOutput {
    num_samples: u32,
    num_predictions: usize,
    accuracy: f64,
    per_label: Vec<ClassMetrics>,
    model_num_trees: usize,
    cache_hit_rate: Option<f64>,
}

#[derive(Serialize)]
struct StreamOutput {
    warmup: usize,
    streamed: usize,
    retrains: usize,
    final_accuracy: Option<f64>,
    points: Vec<WindowPoint>,
}

#[derive(Serialize)]
struct InspectOutput {
    num_samples: u32,
    num_features: usize,
    num_labels: usize,
    quantization_bits: u8,
    record_size: usize,
    chunk_records: u32,
    num_chunks: u32,
    profile: DatasetProfile,
    suggested_ranges: GridRanges,
    suggested_metrics: MetricSet,
    suggested_training_score: TrainingScore,
    suggested_gini_threshold: f64,
    suggested_entropy_threshold: f64,
}

fn open_dataset(args: &DataArgs) -> Result<ChunkedDataset<FileSource>> {
    let metadata = DatasetMetadata::read(&args.metadata)
        .with_context(|| format!("failed to read metadata {}", args.metadata.display()))?;
    let source = FileSource::open(&args.data)
        .with_context(|| format!("failed to open dataset {}", args.data.display()))?;
    let mut options = CacheOptions::new().with_slots(args.cache_slots);
    if let Some(records) = args.chunk_records {
        options = options.with_chunk_records(records);
    }
    let dataset = ChunkedDataset::open(source, metadata, options)?;
    info!(
        num_samples = dataset.num_samples(),
        num_chunks = dataset.num_chunks(),
        chunk_records = dataset.chunk_record_count(),
        "dataset opened"
    );
    Ok(dataset)
}

fn load_config(path: Option<&Path>, seed: Option<u64>) -> Result<ForestConfig> {
    let config = match path {
        Some(path) => ForestConfig::from_json_file(path)?,
        None => ForestConfig::default(),
    };
    Ok(match seed {
        Some(seed) => config.with_seed(seed),
        None => config,
    })
}

/// Label counts from the parameter file, or counted from the records when
/// the file does not list them.
fn label_counts(dataset: &mut ChunkedDataset<FileSource>) -> Result<Vec<u32>> {
    let listed = &dataset.metadata().label_counts;
    if listed.len() == dataset.num_labels() {
        return Ok(listed.clone());
    }
    let indices: Vec<u32> = (0..dataset.num_samples()).collect();
    let mut labels = Vec::with_capacity(indices.len());
    dataset.batch_labels(&indices, &mut labels)?;
    let mut counts = vec![0u32; dataset.num_labels()];
    for label in labels {
        if let Some(c) = counts.get_mut(usize::from(label)) {
            *c += 1;
        }
    }
    Ok(counts)
}

fn profile(dataset: &mut ChunkedDataset<FileSource>) -> Result<DatasetProfile> {
    let counts = label_counts(dataset)?;
    Ok(DatasetProfile::from_label_counts(
        dataset.num_samples() as usize,
        dataset.num_features(),
        &counts,
    ))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Configure Rayon thread pool
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    match cli.command {
        Command::Train {
            data,
            config,
            in_memory,
            grid,
            grid_step,
            model,
        } => {
            let start = Instant::now();
            let mut dataset = open_dataset(&data)?;
            let mut config = load_config(config.as_deref(), cli.seed)?;

            let grid_best = if grid {
                let ranges = GridRanges::derive(&profile(&mut dataset)?);
                info!(?ranges, "grid search ranges");
                let result = grid_search(&config, &mut dataset, &ranges, grid_step)
                    .context("grid search failed")?;
                config = result.apply(config);
                Some(result.best)
            } else {
                None
            };

            let (result, cache_hit_rate) = if in_memory {
                let loaded = QuantizedDataset::load(&mut dataset)?;
                (train_parallel(&config, &loaded).context("training failed")?, None)
            } else {
                let result = train(&config, &mut dataset).context("training failed")?;
                dataset.report_cache_health();
                (result, Some(dataset.stats().hit_rate()))
            };

            if let Some(path) = &model {
                result.forest.save(path)?;
            }

            let output = TrainOutput {
                num_samples: dataset.num_samples(),
                num_features: result.metadata.num_features,
                num_labels: result.metadata.num_labels,
                num_trees: result.metadata.num_trees,
                total_nodes: result.metadata.total_nodes,
                training_score: result.metadata.training_score,
                threshold: result.choice.threshold,
                score: result.choice.score,
                metrics: result.report.metrics,
                per_label: result.report.per_label,
                test: result.test,
                grid: grid_best,
                cache_hit_rate,
                elapsed_secs: start.elapsed().as_secs_f64(),
                model,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Predict { model, data } => {
            let forest = RandomForest::load(&model)
                .with_context(|| format!("failed to load model {}", model.display()))?;
            let mut dataset = open_dataset(&data)?;
            if dataset.num_features() != forest.num_features() {
                anyhow::bail!(
                    "dataset has {} features, model expects {}",
                    dataset.num_features(),
                    forest.num_features()
                );
            }

            let mut order: Vec<u32> = (0..dataset.num_samples()).collect();
            dataset.sort_for_locality(&mut order);
            let mut confusion = ConfusionMatrix::new(forest.num_labels());
            for &index in &order {
                let sample = dataset.sample(index)?;
                let predicted = forest.predict(&sample.features)?;
                confusion.record(sample.label, Some(predicted));
            }
            dataset.report_cache_health();

            let output = PredictOutput {
                num_samples: dataset.num_samples(),
                num_predictions: confusion.total(),
                accuracy: confusion.accuracy(),
                per_label: confusion.class_metrics(),
                model_num_trees: forest.num_trees(),
                cache_hit_rate: Some(dataset.stats().hit_rate()),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Stream {
            data,
            config,
            warmup,
            window,
            step,
            threshold,
            patience,
            min_retrain_buffer,
        } => {
            let mut dataset = open_dataset(&data)?;
            let loaded = QuantizedDataset::load(&mut dataset)?;
            let n = loaded.len();
            if warmup == 0 || warmup >= n {
                anyhow::bail!("warmup must be in [1, {}), got {warmup}", n);
            }
            let config = load_config(config.as_deref(), cli.seed)?;

            let prefix: Vec<u32> = (0..warmup as u32).collect();
            let warm = loaded.subset(&prefix)?;
            let trained = train_parallel(&config, &warm).context("warmup training failed")?;
            info!(
                warmup,
                score = trained.choice.score,
                "warmup forest trained"
            );

            let samples: Vec<Sample> = (warmup as u32..n as u32)
                .map(|i| loaded.sample(i))
                .collect::<Result<_, _>>()?;
            let mut stream = StreamingForest::new(trained.forest, DriftConfig::default())?;
            let monitor = DriftMonitor {
                window,
                step,
                accuracy_threshold: threshold,
                patience,
                min_retrain_buffer,
            };
            let points = monitor.run(&mut stream, &samples)?;

            let output = StreamOutput {
                warmup,
                streamed: samples.len(),
                retrains: points.iter().filter(|p| p.retrained).count(),
                final_accuracy: points.last().map(|p| p.accuracy),
                points,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Inspect { data } => {
            let mut dataset = open_dataset(&data)?;
            let profile = profile(&mut dataset)?;
            let layout = dataset.layout();
            let output = InspectOutput {
                num_samples: dataset.num_samples(),
                num_features: dataset.num_features(),
                num_labels: dataset.num_labels(),
                quantization_bits: layout.quantization_bits(),
                record_size: layout.record_size(),
                chunk_records: dataset.chunk_record_count(),
                num_chunks: dataset.num_chunks(),
                suggested_ranges: GridRanges::derive(&profile),
                suggested_metrics: profile.suggested_metrics(),
                suggested_training_score: profile.suggested_training_score(),
                suggested_gini_threshold: profile.suggested_impurity_threshold(SplitCriterion::Gini),
                suggested_entropy_threshold: profile
                    .suggested_impurity_threshold(SplitCriterion::Entropy),
                profile,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
