//! The read interface the tree engine trains and predicts through.

use crate::IoError;
use crate::cache::CacheStats;
use crate::chunked::ChunkedDataset;
use crate::memory::{QuantizedDataset, Sample};
use crate::source::ByteSource;

/// Random access to labels and quantized feature values.
///
/// Reads take `&mut self` so that cache-backed implementations can load
/// chunks. In-memory implementations ignore the mutability; `&QuantizedDataset`
/// implements the trait too, so parallel workers can share one dataset.
pub trait FeatureAccess {
    /// Number of samples.
    fn num_samples(&self) -> u32;

    /// Number of features per sample.
    fn num_features(&self) -> usize;

    /// Size of the label space.
    fn num_labels(&self) -> usize;

    /// Bits per quantized feature value.
    fn quantization_bits(&self) -> u8;

    /// Label of sample `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::IndexOutOfBounds`] for an index past the end, or a
    /// read error from the backing store.
    fn label(&mut self, index: u32) -> Result<u8, IoError>;

    /// Value of `feature` for sample `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::IndexOutOfBounds`] or [`IoError::FeatureOutOfBounds`],
    /// or a read error from the backing store.
    fn feature(&mut self, index: u32, feature: usize) -> Result<u8, IoError>;

    /// Label and all feature values of sample `index`.
    ///
    /// # Errors
    ///
    /// Same as [`label`](Self::label).
    fn sample(&mut self, index: u32) -> Result<Sample, IoError> {
        let label = self.label(index)?;
        let features = (0..self.num_features())
            .map(|f| self.feature(index, f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Sample { label, features })
    }

    /// Labels of `indices`, in order, into `out`.
    ///
    /// # Errors
    ///
    /// Same as [`label`](Self::label).
    fn batch_labels(&mut self, indices: &[u32], out: &mut Vec<u8>) -> Result<(), IoError>;

    /// Values of `feature` for `indices`, in order, into `out`.
    ///
    /// # Errors
    ///
    /// Same as [`feature`](Self::feature).
    fn batch_feature(
        &mut self,
        indices: &[u32],
        feature: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), IoError>;

    /// Reorder `indices` for cheaper batch reads. The default keeps the order.
    fn sort_for_locality(&mut self, _indices: &mut [u32]) {}

    /// Cache counters, for implementations that cache.
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }
}

macro_rules! in_memory_access {
    ($ty:ty) => {
        impl FeatureAccess for $ty {
            fn num_samples(&self) -> u32 {
                self.len() as u32
            }

            fn num_features(&self) -> usize {
                QuantizedDataset::num_features(self)
            }

            fn num_labels(&self) -> usize {
                QuantizedDataset::num_labels(self)
            }

            fn quantization_bits(&self) -> u8 {
                self.layout().quantization_bits()
            }

            fn label(&mut self, index: u32) -> Result<u8, IoError> {
                self.label_at(index)
            }

            fn feature(&mut self, index: u32, feature: usize) -> Result<u8, IoError> {
                self.value(index, feature)
            }

            fn sample(&mut self, index: u32) -> Result<Sample, IoError> {
                QuantizedDataset::sample(self, index)
            }

            fn batch_labels(&mut self, indices: &[u32], out: &mut Vec<u8>) -> Result<(), IoError> {
                out.clear();
                out.reserve(indices.len());
                for &index in indices {
                    out.push(self.label_at(index)?);
                }
                Ok(())
            }

            fn batch_feature(
                &mut self,
                indices: &[u32],
                feature: usize,
                out: &mut Vec<u8>,
            ) -> Result<(), IoError> {
                out.clear();
                out.reserve(indices.len());
                for &index in indices {
                    out.push(self.value(index, feature)?);
                }
                Ok(())
            }
        }
    };
}

in_memory_access!(QuantizedDataset);
in_memory_access!(&QuantizedDataset);

impl<S: ByteSource> FeatureAccess for ChunkedDataset<S> {
    fn num_samples(&self) -> u32 {
        ChunkedDataset::num_samples(self)
    }

    fn num_features(&self) -> usize {
        self.layout().num_features()
    }

    fn num_labels(&self) -> usize {
        usize::from(self.metadata().num_labels)
    }

    fn quantization_bits(&self) -> u8 {
        self.layout().quantization_bits()
    }

    fn label(&mut self, index: u32) -> Result<u8, IoError> {
        self.get_label(index)
    }

    fn feature(&mut self, index: u32, feature: usize) -> Result<u8, IoError> {
        self.get_feature(index, feature)
    }

    fn sample(&mut self, index: u32) -> Result<Sample, IoError> {
        self.get_sample(index)
    }

    fn batch_labels(&mut self, indices: &[u32], out: &mut Vec<u8>) -> Result<(), IoError> {
        self.batch_extract_labels(indices, out)
    }

    fn batch_feature(
        &mut self,
        indices: &[u32],
        feature: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), IoError> {
        self.batch_extract_feature(indices, feature, out)
    }

    fn sort_for_locality(&mut self, indices: &mut [u32]) {
        self.sort_indices_by_chunk(indices);
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        Some(self.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked::CacheOptions;
    use crate::metadata::DatasetMetadata;
    use crate::source::MemorySource;

    fn data() -> QuantizedDataset {
        let metadata = DatasetMetadata::new(3, 4, 3).unwrap();
        let mut data = QuantizedDataset::new(&metadata).unwrap();
        for i in 0..23u8 {
            data.push(i % 4, &[i % 8, (i * 3) % 8, 7 - i % 8]).unwrap();
        }
        data
    }

    fn read_all<A: FeatureAccess>(access: &mut A, indices: &[u32]) -> (Vec<u8>, Vec<Vec<u8>>) {
        let mut labels = Vec::new();
        access.batch_labels(indices, &mut labels).unwrap();
        let features = (0..access.num_features())
            .map(|f| {
                let mut out = Vec::new();
                access.batch_feature(indices, f, &mut out).unwrap();
                out
            })
            .collect();
        (labels, features)
    }

    #[test]
    fn chunked_and_in_memory_agree() {
        let memory = data();
        let bytes = memory.to_bytes().unwrap();
        let options = CacheOptions::new().with_slots(2).with_chunk_records(5);
        let mut chunked =
            ChunkedDataset::open(MemorySource::new(bytes), memory.metadata(), options).unwrap();

        let indices: Vec<u32> = vec![22, 3, 17, 0, 9, 9, 14];
        let mut shared = &memory;
        assert_eq!(read_all(&mut chunked, &indices), read_all(&mut shared, &indices));
        assert_eq!(chunked.sample(11).unwrap(), memory.sample(11).unwrap());
        assert!(FeatureAccess::cache_stats(&chunked).is_some());
        assert!(FeatureAccess::cache_stats(&memory).is_none());
    }

    #[test]
    fn default_sort_keeps_order() {
        let mut memory = data();
        let mut indices = vec![5, 1, 3];
        memory.sort_for_locality(&mut indices);
        assert_eq!(indices, vec![5, 1, 3]);
    }
}
