//! I/O error types for grove-io.

use std::path::PathBuf;

/// Errors from dataset files, metadata, and the chunked accessor.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Returned when the input file does not exist or is unreadable.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a byte-range read fails.
    #[error("failed to read {len} bytes at offset {offset}")]
    Read {
        /// Byte offset of the read.
        offset: u64,
        /// Number of bytes requested.
        len: usize,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a byte-range read extends past the end of the source.
    #[error("read of {len} bytes at offset {offset} exceeds source length {source_len}")]
    ShortRead {
        /// Byte offset of the read.
        offset: u64,
        /// Number of bytes requested.
        len: usize,
        /// Total length of the source.
        source_len: u64,
    },

    /// Returned when the source is too small to hold a dataset header.
    #[error("dataset too small for header: {len} bytes, need {expected}")]
    TruncatedHeader {
        /// Bytes available.
        len: u64,
        /// Header size in bytes.
        expected: u64,
    },

    /// Returned when the source length disagrees with header and record size.
    #[error(
        "dataset length {actual} bytes does not match {num_samples} records of {record_size} bytes plus header"
    )]
    RecordSizeMismatch {
        /// Sample count from the header.
        num_samples: u32,
        /// Record size implied by the metadata.
        record_size: usize,
        /// Actual source length in bytes.
        actual: u64,
    },

    /// Returned when header and metadata disagree on the feature count.
    #[error("dataset header declares {header} features but metadata declares {metadata}")]
    FeatureCountMismatch {
        /// Feature count from the binary header.
        header: u16,
        /// Feature count from the metadata file.
        metadata: u16,
    },

    /// Returned when the metadata file is absent or unreadable.
    #[error("dataset metadata missing: {path}")]
    MetadataMissing {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a required metadata key is absent.
    #[error("metadata {path} is missing required field \"{field}\"")]
    MetadataField {
        /// Path to the metadata file.
        path: PathBuf,
        /// The missing key.
        field: &'static str,
    },

    /// Returned when a metadata value does not parse.
    #[error("metadata {path}: field \"{field}\" has malformed value \"{raw}\"")]
    MetadataValue {
        /// Path to the metadata file.
        path: PathBuf,
        /// The offending key.
        field: String,
        /// The raw value.
        raw: String,
    },

    /// Returned when the CSV parser encounters a malformed record.
    #[error("CSV parse error in {path} at byte offset {offset}")]
    CsvParse {
        /// Path to the CSV file.
        path: PathBuf,
        /// Byte offset where the error occurred.
        offset: u64,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when the quantization width is outside 1..=8 bits.
    #[error("quantization bits must be in [1, 8], got {bits}")]
    InvalidQuantizationBits {
        /// The invalid bit width.
        bits: u8,
    },

    /// Returned when a dataset declares no features or no labels.
    #[error("dataset needs at least one feature and one label, got {num_features} features and {num_labels} labels")]
    EmptySchema {
        /// Declared feature count.
        num_features: u16,
        /// Declared label count.
        num_labels: u16,
    },

    /// Returned when a label space does not fit in a `u8` label.
    #[error("at most 256 labels are supported, got {got}")]
    TooManyLabels {
        /// Declared label count.
        got: u16,
    },

    /// Returned when a sample index is past the end of the dataset.
    #[error("sample index {index} out of bounds for {num_samples} samples")]
    IndexOutOfBounds {
        /// The requested sample index.
        index: u32,
        /// Number of samples in the dataset.
        num_samples: u32,
    },

    /// Returned when a feature index is past the end of a record.
    #[error("feature index {feature} out of bounds for {num_features} features")]
    FeatureOutOfBounds {
        /// The requested feature index.
        feature: usize,
        /// Number of features per sample.
        num_features: usize,
    },

    /// Returned when a stored label is outside the declared label space.
    #[error("sample {index} has label {label}, but only {num_labels} labels are declared")]
    LabelOutOfRange {
        /// The sample index.
        index: u32,
        /// The stored label.
        label: u8,
        /// Declared label count.
        num_labels: u16,
    },

    /// Returned when a feature value does not fit the quantization width.
    #[error("feature {feature} value {value} exceeds {bits}-bit quantization")]
    ValueOutOfRange {
        /// The feature index.
        feature: usize,
        /// The offending value.
        value: u8,
        /// Quantization width.
        bits: u8,
    },

    /// Returned when a sample has the wrong number of features.
    #[error("sample has {got} features, expected {expected}")]
    SampleWidthMismatch {
        /// Expected feature count.
        expected: usize,
        /// Actual feature count.
        got: usize,
    },

    /// Returned when the cache geometry is unusable.
    #[error("invalid cache configuration: {reason}")]
    InvalidCacheConfig {
        /// Human-readable description of the problem.
        reason: String,
    },

    /// Returned when a chunk buffer cannot be allocated.
    #[error("failed to allocate {bytes} bytes for chunk cache")]
    CacheAllocation {
        /// Requested allocation size.
        bytes: usize,
        /// Underlying allocation error.
        source: std::collections::TryReserveError,
    },

    /// Returned when a dataset or metadata file cannot be written.
    #[error("cannot write file {path}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
