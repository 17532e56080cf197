//! Fully materialized quantized dataset.

use std::path::Path;

use tracing::{info, instrument};

use crate::IoError;
use crate::chunked::ChunkedDataset;
use crate::format::{DatasetHeader, RecordLayout};
use crate::metadata::DatasetMetadata;
use crate::source::ByteSource;

/// One labeled sample with unpacked feature values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Class label.
    pub label: u8,
    /// Quantized feature values, one byte each.
    pub features: Vec<u8>,
}

impl Sample {
    /// Create a sample.
    #[must_use]
    pub fn new(label: u8, features: Vec<u8>) -> Self {
        Self { label, features }
    }
}

/// A dataset held entirely in memory, one byte per feature value.
///
/// Rows are validated on insertion: the label must lie in the label space
/// and every value must fit the quantization width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedDataset {
    layout: RecordLayout,
    num_labels: u16,
    labels: Vec<u8>,
    values: Vec<u8>,
}

impl QuantizedDataset {
    /// Create an empty dataset shaped by `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidQuantizationBits`] if the width is not in `1..=8`.
    pub fn new(metadata: &DatasetMetadata) -> Result<Self, IoError> {
        Ok(Self {
            layout: metadata.layout()?,
            num_labels: metadata.num_labels,
            labels: Vec::new(),
            values: Vec::new(),
        })
    }

    /// Build a dataset from samples.
    ///
    /// # Errors
    ///
    /// Same as [`push`](Self::push).
    pub fn from_samples<'a>(
        metadata: &DatasetMetadata,
        samples: impl IntoIterator<Item = &'a Sample>,
    ) -> Result<Self, IoError> {
        let mut out = Self::new(metadata)?;
        for sample in samples {
            out.push(sample.label, &sample.features)?;
        }
        Ok(out)
    }

    /// Append one sample.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::SampleWidthMismatch`] | wrong number of features |
    /// | [`IoError::LabelOutOfRange`] | label outside the label space |
    /// | [`IoError::ValueOutOfRange`] | value does not fit the quantization width |
    pub fn push(&mut self, label: u8, features: &[u8]) -> Result<(), IoError> {
        if features.len() != self.layout.num_features() {
            return Err(IoError::SampleWidthMismatch {
                expected: self.layout.num_features(),
                got: features.len(),
            });
        }
        if u16::from(label) >= self.num_labels {
            return Err(IoError::LabelOutOfRange {
                index: self.labels.len() as u32,
                label,
                num_labels: self.num_labels,
            });
        }
        let max = self.layout.max_value();
        if let Some((feature, &value)) = features.iter().enumerate().find(|&(_, &v)| v > max) {
            return Err(IoError::ValueOutOfRange {
                feature,
                value,
                bits: self.layout.quantization_bits(),
            });
        }
        self.labels.push(label);
        self.values.extend_from_slice(features);
        Ok(())
    }

    /// Materialize every record of a chunked dataset, in order.
    ///
    /// # Errors
    ///
    /// Propagates any read or decode error from the accessor.
    #[instrument(skip(source), fields(num_samples = source.num_samples()))]
    pub fn load<S: ByteSource>(source: &mut ChunkedDataset<S>) -> Result<Self, IoError> {
        let mut out = Self::new(source.metadata())?;
        let n = source.num_samples();
        out.labels.reserve(n as usize);
        out.values.reserve(n as usize * out.layout.num_features());
        for index in 0..n {
            let sample = source.get_sample(index)?;
            out.labels.push(sample.label);
            out.values.extend_from_slice(&sample.features);
        }
        info!(num_samples = n, "materialized dataset in memory");
        Ok(out)
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Return `true` if the dataset holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Record layout.
    #[must_use]
    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Number of features per sample.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.layout.num_features()
    }

    /// Size of the label space.
    #[must_use]
    pub fn num_labels(&self) -> usize {
        usize::from(self.num_labels)
    }

    /// All labels, in sample order.
    #[must_use]
    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    fn check_index(&self, index: u32) -> Result<usize, IoError> {
        let i = index as usize;
        if i >= self.labels.len() {
            return Err(IoError::IndexOutOfBounds {
                index,
                num_samples: self.labels.len() as u32,
            });
        }
        Ok(i)
    }

    /// Label of sample `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::IndexOutOfBounds`] if `index` is past the end.
    pub fn label_at(&self, index: u32) -> Result<u8, IoError> {
        Ok(self.labels[self.check_index(index)?])
    }

    /// Feature values of sample `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::IndexOutOfBounds`] if `index` is past the end.
    pub fn row(&self, index: u32) -> Result<&[u8], IoError> {
        let i = self.check_index(index)?;
        let width = self.layout.num_features();
        Ok(&self.values[i * width..(i + 1) * width])
    }

    /// Value of feature `feature` of sample `index`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::IndexOutOfBounds`] | `index` is past the end |
    /// | [`IoError::FeatureOutOfBounds`] | `feature >= num_features` |
    pub fn value(&self, index: u32, feature: usize) -> Result<u8, IoError> {
        let row = self.row(index)?;
        row.get(feature).copied().ok_or(IoError::FeatureOutOfBounds {
            feature,
            num_features: row.len(),
        })
    }

    /// Owned copy of sample `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::IndexOutOfBounds`] if `index` is past the end.
    pub fn sample(&self, index: u32) -> Result<Sample, IoError> {
        Ok(Sample {
            label: self.label_at(index)?,
            features: self.row(index)?.to_vec(),
        })
    }

    /// New dataset holding the given samples, in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::IndexOutOfBounds`] if any index is past the end.
    pub fn subset(&self, indices: &[u32]) -> Result<Self, IoError> {
        let width = self.layout.num_features();
        let mut out = Self {
            layout: self.layout,
            num_labels: self.num_labels,
            labels: Vec::with_capacity(indices.len()),
            values: Vec::with_capacity(indices.len() * width),
        };
        for &index in indices {
            out.labels.push(self.label_at(index)?);
            out.values.extend_from_slice(self.row(index)?);
        }
        Ok(out)
    }

    /// Number of samples per label.
    #[must_use]
    pub fn label_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.num_labels()];
        for &label in &self.labels {
            counts[usize::from(label)] += 1;
        }
        counts
    }

    /// Metadata describing this dataset, including sample and label counts.
    #[must_use]
    pub fn metadata(&self) -> DatasetMetadata {
        DatasetMetadata {
            num_features: self.layout.num_features() as u16,
            num_labels: self.num_labels,
            quantization_bits: self.layout.quantization_bits(),
            num_samples: Some(self.len() as u32),
            label_counts: self.label_counts(),
        }
    }

    /// Encode the dataset in the binary format.
    ///
    /// # Errors
    ///
    /// Propagates record encoding errors (unreachable for validated rows).
    pub fn to_bytes(&self) -> Result<Vec<u8>, IoError> {
        let header = DatasetHeader {
            num_samples: self.len() as u32,
            num_features: self.layout.num_features() as u16,
        };
        let mut out = Vec::with_capacity(header.encode().len() + self.len() * self.layout.record_size());
        out.extend_from_slice(&header.encode());
        let width = self.layout.num_features();
        for (i, &label) in self.labels.iter().enumerate() {
            self.layout
                .encode_record(label, &self.values[i * width..(i + 1) * width], &mut out)?;
        }
        Ok(out)
    }

    /// Write the dataset in the binary format.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] if the file cannot be written.
    #[instrument(skip(self), fields(path = %path.display(), num_samples = self.len()))]
    pub fn write(&self, path: &Path) -> Result<(), IoError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes).map_err(|e| IoError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!(size_bytes = bytes.len(), "dataset written");
        Ok(())
    }
}
