//! Chunked, cache-backed access to a binary dataset that may not fit in memory.

use tracing::{debug, info, instrument, warn};

use crate::IoError;
use crate::cache::{CacheStats, ChunkCache};
use crate::format::{DatasetHeader, HEADER_SIZE, RecordLayout};
use crate::memory::Sample;
use crate::metadata::DatasetMetadata;
use crate::source::ByteSource;

/// Hit rate below which a finished run logs a performance warning.
const LOW_HIT_RATE: f64 = 0.5;

/// How the number of records per chunk is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSizing {
    /// A fixed number of records per chunk.
    Records(usize),
    /// Derive the chunk size from a free-memory budget in bytes: a tenth of
    /// the budget is split evenly across the cache slots.
    MemoryBudget(usize),
}

/// Cache geometry for [`ChunkedDataset`].
///
/// # Defaults
///
/// | Parameter | Default |
/// |-----------|---------|
/// | `slots`   | 4       |
/// | `sizing`  | `MemoryBudget(256 KiB)` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    slots: usize,
    sizing: ChunkSizing,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            slots: Self::DEFAULT_SLOTS,
            sizing: ChunkSizing::MemoryBudget(Self::DEFAULT_MEMORY_BUDGET),
        }
    }
}

impl CacheOptions {
    /// Default number of cache slots.
    pub const DEFAULT_SLOTS: usize = 4;
    /// Default free-memory budget used to size chunks.
    pub const DEFAULT_MEMORY_BUDGET: usize = 256 * 1024;

    /// Create options with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of cache slots.
    #[must_use]
    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    /// Use a fixed number of records per chunk.
    #[must_use]
    pub fn with_chunk_records(mut self, records: usize) -> Self {
        self.sizing = ChunkSizing::Records(records);
        self
    }

    /// Size chunks from a free-memory budget in bytes.
    #[must_use]
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.sizing = ChunkSizing::MemoryBudget(bytes);
        self
    }

    /// Number of cache slots.
    #[must_use]
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Chunk sizing strategy.
    #[must_use]
    pub fn sizing(&self) -> ChunkSizing {
        self.sizing
    }
}

/// Records per chunk for a free-memory budget: a tenth of the budget divided
/// by `slots * record_size`, never less than one.
#[must_use]
pub fn chunk_records_for_budget(budget_bytes: usize, slots: usize, record_size: usize) -> usize {
    let per_chunk = slots.max(1) * record_size.max(1);
    ((budget_bytes / 10) / per_chunk).max(1)
}

/// Stable counting sort of `indices` by `index / chunk_records`.
///
/// Three passes: count per chunk, prefix offsets, redistribute. Indices
/// keep their relative order within a chunk group. Keys at or beyond
/// `num_chunks` are grouped with the last chunk; the accessor rejects such
/// indices when they are extracted.
///
/// `counts` and `scratch` are reusable buffers.
pub fn sort_by_chunk(
    indices: &mut [u32],
    chunk_records: u32,
    num_chunks: u32,
    counts: &mut Vec<usize>,
    scratch: &mut Vec<u32>,
) {
    if indices.len() < 2 || num_chunks < 2 {
        return;
    }
    let chunk_records = chunk_records.max(1);
    let last = num_chunks - 1;
    let key = |index: u32| (index / chunk_records).min(last) as usize;

    counts.clear();
    counts.resize(num_chunks as usize + 1, 0);
    for &index in indices.iter() {
        counts[key(index) + 1] += 1;
    }
    for chunk in 1..counts.len() {
        counts[chunk] += counts[chunk - 1];
    }

    scratch.clear();
    scratch.resize(indices.len(), 0);
    for &index in indices.iter() {
        let slot = &mut counts[key(index)];
        scratch[*slot] = index;
        *slot += 1;
    }
    indices.copy_from_slice(scratch);
}

/// Read access to a binary dataset through a small LRU cache of chunks.
///
/// The dataset is split into chunks of `chunk_record_count` consecutive
/// records. Single-record lookups load at most one chunk; batch extraction
/// walks runs of same-chunk indices so a chunk-sorted batch loads each chunk
/// it touches at most once.
///
/// The cache is exclusively owned: every access takes `&mut self`.
#[derive(Debug)]
pub struct ChunkedDataset<S> {
    source: S,
    metadata: DatasetMetadata,
    layout: RecordLayout,
    num_samples: u32,
    chunk_records: u32,
    num_chunks: u32,
    cache: ChunkCache,
    counts: Vec<usize>,
    scratch: Vec<u32>,
}

impl<S: ByteSource> ChunkedDataset<S> {
    /// Validate `source` against `metadata` and build the cache.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::TruncatedHeader`] | source shorter than the header |
    /// | [`IoError::FeatureCountMismatch`] | header and metadata disagree on features |
    /// | [`IoError::RecordSizeMismatch`] | source length is not header + n * record size |
    /// | [`IoError::InvalidQuantizationBits`] | metadata width not in `1..=8` |
    /// | [`IoError::InvalidCacheConfig`] | zero slots or zero records per chunk |
    /// | [`IoError::CacheAllocation`] | chunk buffers could not be allocated |
    /// | [`IoError::Read`] | the header read failed |
    #[instrument(skip(source, metadata), fields(slots = options.slots()))]
    pub fn open(
        mut source: S,
        metadata: DatasetMetadata,
        options: CacheOptions,
    ) -> Result<Self, IoError> {
        let source_len = source.len();
        if source_len < HEADER_SIZE as u64 {
            return Err(IoError::TruncatedHeader {
                len: source_len,
                expected: HEADER_SIZE as u64,
            });
        }
        let mut raw = [0u8; HEADER_SIZE];
        source.read_at(0, &mut raw)?;
        let header = DatasetHeader::decode(&raw)?;

        if header.num_features != metadata.num_features {
            return Err(IoError::FeatureCountMismatch {
                header: header.num_features,
                metadata: metadata.num_features,
            });
        }
        let layout = metadata.layout()?;
        let record_size = layout.record_size();
        let expected = HEADER_SIZE as u64 + u64::from(header.num_samples) * record_size as u64;
        if source_len != expected {
            return Err(IoError::RecordSizeMismatch {
                num_samples: header.num_samples,
                record_size,
                actual: source_len,
            });
        }

        let requested = match options.sizing() {
            ChunkSizing::Records(0) => {
                return Err(IoError::InvalidCacheConfig {
                    reason: "chunk must hold at least one record".into(),
                });
            }
            ChunkSizing::Records(records) => records,
            ChunkSizing::MemoryBudget(bytes) => {
                chunk_records_for_budget(bytes, options.slots(), record_size)
            }
        };
        let chunk_records = requested.min(header.num_samples.max(1) as usize) as u32;
        let num_chunks = header.num_samples.div_ceil(chunk_records);
        let cache = ChunkCache::new(options.slots(), chunk_records as usize * record_size)?;

        info!(
            num_samples = header.num_samples,
            num_features = header.num_features,
            record_size,
            chunk_records,
            num_chunks,
            slots = cache.capacity(),
            "opened chunked dataset"
        );

        Ok(Self {
            source,
            metadata,
            layout,
            num_samples: header.num_samples,
            chunk_records,
            num_chunks,
            cache,
            counts: Vec::new(),
            scratch: Vec::new(),
        })
    }

    // --- Geometry ---

    /// Number of records in the dataset.
    #[must_use]
    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    /// Records per chunk (the last chunk may hold fewer).
    #[must_use]
    pub fn chunk_record_count(&self) -> u32 {
        self.chunk_records
    }

    /// Number of chunks covering the dataset.
    #[must_use]
    pub fn num_chunks(&self) -> u32 {
        self.num_chunks
    }

    /// Record layout.
    #[must_use]
    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Metadata the dataset was opened with.
    #[must_use]
    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    /// Number of cache slots.
    #[must_use]
    pub fn cache_slots(&self) -> usize {
        self.cache.capacity()
    }

    /// Cache counters accumulated since open or the last reset.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Zero the cache counters.
    pub fn reset_stats(&mut self) {
        self.cache.reset_stats();
    }

    /// Chunk indices currently held in the cache.
    #[must_use]
    pub fn resident_chunks(&self) -> Vec<u32> {
        self.cache.resident()
    }

    /// Log cache diagnostics; a hit rate below 50% is logged as a warning.
    pub fn report_cache_health(&self) {
        let stats = self.stats();
        if stats.requests() == 0 {
            return;
        }
        if stats.hit_rate() < LOW_HIT_RATE {
            warn!(
                hits = stats.hits,
                misses = stats.misses,
                loads = stats.loads,
                hit_rate = stats.hit_rate(),
                "low chunk cache hit rate; consider more slots or larger chunks"
            );
        } else {
            info!(
                hits = stats.hits,
                misses = stats.misses,
                loads = stats.loads,
                hit_rate = stats.hit_rate(),
                "chunk cache statistics"
            );
        }
    }

    /// Give back the byte source.
    pub fn into_source(self) -> S {
        self.source
    }

    // --- Chunk loading ---

    fn check_index(&self, index: u32) -> Result<(), IoError> {
        if index >= self.num_samples {
            return Err(IoError::IndexOutOfBounds {
                index,
                num_samples: self.num_samples,
            });
        }
        Ok(())
    }

    fn check_feature(&self, feature: usize) -> Result<(), IoError> {
        if feature >= self.layout.num_features() {
            return Err(IoError::FeatureOutOfBounds {
                feature,
                num_features: self.layout.num_features(),
            });
        }
        Ok(())
    }

    /// Make `chunk` resident and return its cache slot.
    fn load_chunk(&mut self, chunk: u32) -> Result<usize, IoError> {
        let record_size = self.layout.record_size();
        let first = chunk * self.chunk_records;
        let records = self.chunk_records.min(self.num_samples - first) as usize;
        let offset = HEADER_SIZE as u64 + u64::from(first) * record_size as u64;
        let len = records * record_size;
        let source = &mut self.source;
        self.cache.get_or_load(chunk, |buf| {
            debug!(chunk, offset, len, "loading chunk");
            buf.resize(len, 0);
            source.read_at(offset, buf)
        })
    }

    /// Bytes of record `index`, read from its resident chunk.
    fn record(&mut self, index: u32) -> Result<&[u8], IoError> {
        self.check_index(index)?;
        let slot = self.load_chunk(index / self.chunk_records)?;
        let record_size = self.layout.record_size();
        let start = (index % self.chunk_records) as usize * record_size;
        Ok(&self.cache.data(slot)[start..start + record_size])
    }

    /// Decode one value per index, visiting each run of same-chunk indices
    /// with a single cache lookup.
    fn extract<F>(&mut self, indices: &[u32], out: &mut Vec<u8>, decode: F) -> Result<(), IoError>
    where
        F: Fn(u32, &[u8]) -> Result<u8, IoError>,
    {
        out.clear();
        out.reserve(indices.len());
        let record_size = self.layout.record_size();
        let chunk_records = self.chunk_records;

        let mut pos = 0;
        while pos < indices.len() {
            self.check_index(indices[pos])?;
            let chunk = indices[pos] / chunk_records;
            let slot = self.load_chunk(chunk)?;
            let data = self.cache.data(slot);
            while pos < indices.len() && indices[pos] / chunk_records == chunk {
                let index = indices[pos];
                if index >= self.num_samples {
                    return Err(IoError::IndexOutOfBounds {
                        index,
                        num_samples: self.num_samples,
                    });
                }
                let start = (index % chunk_records) as usize * record_size;
                out.push(decode(index, &data[start..start + record_size])?);
                pos += 1;
            }
        }
        Ok(())
    }

    // --- Single-record access ---

    /// Label of sample `index`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::IndexOutOfBounds`] | `index >= num_samples` |
    /// | [`IoError::LabelOutOfRange`] | stored label outside the label space |
    /// | [`IoError::Read`] | chunk load failed |
    pub fn get_label(&mut self, index: u32) -> Result<u8, IoError> {
        let layout = self.layout;
        let num_labels = self.metadata.num_labels;
        let record = self.record(index)?;
        label_in_range(layout, num_labels, index, record)
    }

    /// Value of feature `feature` of sample `index`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::IndexOutOfBounds`] | `index >= num_samples` |
    /// | [`IoError::FeatureOutOfBounds`] | `feature >= num_features` |
    /// | [`IoError::Read`] | chunk load failed |
    pub fn get_feature(&mut self, index: u32, feature: usize) -> Result<u8, IoError> {
        self.check_feature(feature)?;
        let layout = self.layout;
        let record = self.record(index)?;
        Ok(layout.decode_feature(record, feature))
    }

    /// Label and every feature of sample `index`.
    ///
    /// # Errors
    ///
    /// Same as [`get_label`](Self::get_label).
    pub fn get_sample(&mut self, index: u32) -> Result<Sample, IoError> {
        let layout = self.layout;
        let num_labels = self.metadata.num_labels;
        let record = self.record(index)?;
        let label = label_in_range(layout, num_labels, index, record)?;
        let features = (0..layout.num_features())
            .map(|f| layout.decode_feature(record, f))
            .collect();
        Ok(Sample { label, features })
    }

    // --- Batch access ---

    /// Labels for `indices`, in order, written to `out`.
    ///
    /// Sort `indices` with [`sort_indices_by_chunk`](Self::sort_indices_by_chunk)
    /// first: each run of same-chunk indices costs one cache lookup.
    ///
    /// # Errors
    ///
    /// Same as [`get_label`](Self::get_label). On error `out` holds a partial result.
    pub fn batch_extract_labels(&mut self, indices: &[u32], out: &mut Vec<u8>) -> Result<(), IoError> {
        let layout = self.layout;
        let num_labels = self.metadata.num_labels;
        self.extract(indices, out, |i, record| {
            label_in_range(layout, num_labels, i, record)
        })
    }

    /// Values of feature `feature` for `indices`, in order, written to `out`.
    ///
    /// # Errors
    ///
    /// Same as [`get_feature`](Self::get_feature). On error `out` holds a partial result.
    pub fn batch_extract_feature(
        &mut self,
        indices: &[u32],
        feature: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), IoError> {
        self.check_feature(feature)?;
        let layout = self.layout;
        self.extract(indices, out, |_, record| {
            Ok(layout.decode_feature(record, feature))
        })
    }

    /// Reorder `indices` so same-chunk indices are adjacent, preserving
    /// relative order within each chunk.
    pub fn sort_indices_by_chunk(&mut self, indices: &mut [u32]) {
        sort_by_chunk(
            indices,
            self.chunk_records,
            self.num_chunks,
            &mut self.counts,
            &mut self.scratch,
        );
    }
}

fn label_in_range(
    layout: RecordLayout,
    num_labels: u16,
    index: u32,
    record: &[u8],
) -> Result<u8, IoError> {
    let label = layout.decode_label(record);
    if u16::from(label) >= num_labels {
        return Err(IoError::LabelOutOfRange {
            index,
            label,
            num_labels,
        });
    }
    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::QuantizedDataset;
    use crate::source::MemorySource;

    /// `n` samples, 2 features, 2-bit quantization; label = i % 3.
    fn dataset(n: u32) -> (MemorySource, DatasetMetadata) {
        let metadata = DatasetMetadata::new(2, 3, 2).unwrap();
        let mut data = QuantizedDataset::new(&metadata).unwrap();
        for i in 0..n {
            data.push((i % 3) as u8, &[(i % 4) as u8, ((i / 4) % 4) as u8])
                .unwrap();
        }
        (MemorySource::new(data.to_bytes().unwrap()), metadata)
    }

    fn open(n: u32, chunk: usize, slots: usize) -> ChunkedDataset<MemorySource> {
        let (src, meta) = dataset(n);
        let options = CacheOptions::new().with_slots(slots).with_chunk_records(chunk);
        ChunkedDataset::open(src, meta, options).unwrap()
    }

    #[test]
    fn budget_sizing_formula() {
        assert_eq!(chunk_records_for_budget(40_000, 4, 10), 100);
        assert_eq!(chunk_records_for_budget(10, 4, 10), 1);
    }

    #[test]
    fn geometry_with_short_last_chunk() {
        let ds = open(10, 4, 2);
        assert_eq!(ds.num_chunks(), 3);
        assert_eq!(ds.chunk_record_count(), 4);
    }

    #[test]
    fn chunk_size_is_clamped_to_dataset() {
        let ds = open(5, 100, 2);
        assert_eq!(ds.chunk_record_count(), 5);
        assert_eq!(ds.num_chunks(), 1);
    }

    #[test]
    fn single_access_decodes_records() {
        let mut ds = open(16, 4, 2);
        for i in 0..16 {
            assert_eq!(ds.get_label(i).unwrap(), (i % 3) as u8);
            assert_eq!(ds.get_feature(i, 0).unwrap(), (i % 4) as u8);
            assert_eq!(ds.get_feature(i, 1).unwrap(), ((i / 4) % 4) as u8);
        }
        let sample = ds.get_sample(6).unwrap();
        assert_eq!(sample.label, 0);
        assert_eq!(sample.features, vec![2, 1]);
    }

    #[test]
    fn single_reads_share_the_resident_chunk() {
        let mut ds = open(16, 4, 1);
        assert_eq!(ds.get_label(5).unwrap(), 2);
        assert_eq!(ds.get_feature(5, 0).unwrap(), 1);
        assert_eq!(ds.get_feature(6, 1).unwrap(), 1);
        assert_eq!(ds.get_sample(7).unwrap().features, vec![3, 1]);
        let stats = ds.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 3);
        assert_eq!(ds.resident_chunks(), vec![1]);
    }

    #[test]
    fn reversed_batch_sorted_by_chunk_loads_each_chunk_once() {
        let mut ds = open(16, 4, 4);
        let mut indices: Vec<u32> = (0..16).rev().collect();
        ds.sort_indices_by_chunk(&mut indices);
        assert_eq!(&indices[..4], &[3, 2, 1, 0]);

        let mut labels = Vec::new();
        ds.batch_extract_labels(&indices, &mut labels).unwrap();
        assert_eq!(ds.stats().loads, 4);

        let expected: Vec<u8> = indices.iter().map(|&i| (i % 3) as u8).collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn unsorted_batch_matches_single_access() {
        let mut ds = open(16, 4, 2);
        let indices = vec![15, 0, 7, 7, 3, 12, 1];
        let mut batch = Vec::new();
        ds.batch_extract_feature(&indices, 1, &mut batch).unwrap();
        let single: Vec<u8> = indices
            .iter()
            .map(|&i| ds.get_feature(i, 1).unwrap())
            .collect();
        assert_eq!(batch, single);
    }

    #[test]
    fn out_of_range_index_and_feature() {
        let mut ds = open(8, 4, 2);
        assert!(matches!(
            ds.get_label(8),
            Err(IoError::IndexOutOfBounds { index: 8, num_samples: 8 })
        ));
        assert!(matches!(
            ds.get_feature(0, 2),
            Err(IoError::FeatureOutOfBounds { feature: 2, .. })
        ));
        let mut out = Vec::new();
        assert!(ds.batch_extract_labels(&[1, 9], &mut out).is_err());
    }

    #[test]
    fn header_mismatch_detected_at_open() {
        let (src, _) = dataset(4);
        let wrong = DatasetMetadata::new(3, 3, 2).unwrap();
        let err = ChunkedDataset::open(src, wrong, CacheOptions::new()).unwrap_err();
        assert!(matches!(err, IoError::FeatureCountMismatch { header: 2, metadata: 3 }));
    }

    #[test]
    fn truncated_records_detected_at_open() {
        let (src, meta) = dataset(4);
        let mut bytes = src.as_bytes().to_vec();
        bytes.pop();
        let err = ChunkedDataset::open(MemorySource::new(bytes), meta, CacheOptions::new())
            .unwrap_err();
        assert!(matches!(err, IoError::RecordSizeMismatch { num_samples: 4, .. }));
    }

    #[test]
    fn zero_record_chunks_rejected() {
        let (src, meta) = dataset(4);
        let options = CacheOptions::new().with_chunk_records(0);
        assert!(matches!(
            ChunkedDataset::open(src, meta, options),
            Err(IoError::InvalidCacheConfig { .. })
        ));
    }

    #[test]
    fn label_outside_label_space_is_reported() {
        let (src, _) = dataset(4);
        let narrow = DatasetMetadata::new(2, 2, 2).unwrap();
        let mut ds = ChunkedDataset::open(src, narrow, CacheOptions::new()).unwrap();
        assert!(matches!(
            ds.get_label(2),
            Err(IoError::LabelOutOfRange { index: 2, label: 2, num_labels: 2 })
        ));
    }

    #[test]
    fn counting_sort_is_stable() {
        let mut indices = vec![9, 1, 8, 0, 5, 4, 2];
        let (mut counts, mut scratch) = (Vec::new(), Vec::new());
        sort_by_chunk(&mut indices, 4, 3, &mut counts, &mut scratch);
        assert_eq!(indices, vec![1, 0, 2, 5, 4, 9, 8]);
    }
}
