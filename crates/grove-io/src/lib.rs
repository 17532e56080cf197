//! Quantized dataset storage for grove.
//!
//! A dataset is a binary file (6-byte header plus fixed-size, bit-packed
//! records) and a CSV parameter file. [`ChunkedDataset`] reads the binary file
//! through a small LRU cache of record chunks; [`QuantizedDataset`] holds it
//! fully in memory. Both implement [`FeatureAccess`], the interface the tree
//! engine consumes.

mod access;
mod cache;
mod chunked;
mod error;
mod format;
mod memory;
mod metadata;
mod source;

pub use access::FeatureAccess;
pub use cache::CacheStats;
pub use chunked::{
    CacheOptions, ChunkSizing, ChunkedDataset, chunk_records_for_budget, sort_by_chunk,
};
pub use error::IoError;
pub use format::{DatasetHeader, HEADER_SIZE, RecordLayout};
pub use memory::{QuantizedDataset, Sample};
pub use metadata::DatasetMetadata;
pub use source::{ByteSource, FileSource, MemorySource};
