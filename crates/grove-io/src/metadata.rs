//! Dataset parameter file (`<name>_dp.csv`) reader and writer.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::format::RecordLayout;
use crate::IoError;

/// Dataset parameters supplied alongside a binary dataset.
///
/// The binary header carries only sample and feature counts; the
/// quantization width and label space come from here.
///
/// File format (CSV, header row required):
///
/// ```text
/// parameter,value
/// quantization_coefficient,2
/// num_features,12
/// num_labels,3
/// num_samples,900
/// samples_label_0,300
/// ```
///
/// `quantization_coefficient`, `num_features` and `num_labels` are required.
/// Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMetadata {
    /// Number of features per sample.
    pub num_features: u16,
    /// Size of the label space.
    pub num_labels: u16,
    /// Bits per quantized feature value.
    pub quantization_bits: u8,
    /// Sample count, if recorded.
    pub num_samples: Option<u32>,
    /// Per-label sample counts, if recorded (`samples_label_<i>` keys).
    pub label_counts: Vec<u32>,
}

impl DatasetMetadata {
    /// Create metadata for the required parameters.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::InvalidQuantizationBits`] | `quantization_bits` not in `1..=8` |
    /// | [`IoError::EmptySchema`] | zero features or zero labels |
    /// | [`IoError::TooManyLabels`] | more than 256 labels |
    pub fn new(num_features: u16, num_labels: u16, quantization_bits: u8) -> Result<Self, IoError> {
        RecordLayout::new(num_features, quantization_bits)?;
        if num_features == 0 || num_labels == 0 {
            return Err(IoError::EmptySchema {
                num_features,
                num_labels,
            });
        }
        if num_labels > 256 {
            return Err(IoError::TooManyLabels { got: num_labels });
        }
        Ok(Self {
            num_features,
            num_labels,
            quantization_bits,
            num_samples: None,
            label_counts: Vec::new(),
        })
    }

    /// Record layout implied by these parameters.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidQuantizationBits`] if the width is not in `1..=8`.
    pub fn layout(&self) -> Result<RecordLayout, IoError> {
        RecordLayout::new(self.num_features, self.quantization_bits)
    }

    /// Read and validate a parameter file.
    ///
    /// A missing file or missing required key is an error; nothing is
    /// substituted for absent values.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::MetadataMissing`] | file doesn't exist or is unreadable |
    /// | [`IoError::CsvParse`] | malformed CSV record |
    /// | [`IoError::MetadataField`] | a required key is absent |
    /// | [`IoError::MetadataValue`] | a value does not parse as an integer |
    /// | [`IoError::InvalidQuantizationBits`] | quantization width not in `1..=8` |
    /// | [`IoError::EmptySchema`] | zero features or zero labels |
    /// | [`IoError::TooManyLabels`] | more than 256 labels |
    #[instrument(fields(path = %path.display()))]
    pub fn read(path: &Path) -> Result<Self, IoError> {
        let file = std::fs::File::open(path).map_err(|e| IoError::MetadataMissing {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut num_features = None;
        let mut num_labels = None;
        let mut quantization_bits = None;
        let mut num_samples = None;
        let mut label_counts: Vec<(usize, u32)> = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| IoError::CsvParse {
                path: path.to_path_buf(),
                offset: e.position().map_or(0, |p| p.byte()),
                source: e,
            })?;
            let (Some(key), Some(raw)) = (record.get(0), record.get(1)) else {
                continue;
            };
            match key {
                "num_features" => num_features = Some(parse_value::<u16>(path, key, raw)?),
                "num_labels" => num_labels = Some(parse_value::<u16>(path, key, raw)?),
                "quantization_coefficient" => {
                    quantization_bits = Some(parse_value::<u8>(path, key, raw)?);
                }
                "num_samples" => num_samples = Some(parse_value::<u32>(path, key, raw)?),
                other => {
                    if let Some(label) = other.strip_prefix("samples_label_") {
                        let label = parse_value::<usize>(path, key, label)?;
                        label_counts.push((label, parse_value::<u32>(path, key, raw)?));
                    } else {
                        debug!(key = other, "ignoring unknown metadata key");
                    }
                }
            }
        }

        let missing = |field| IoError::MetadataField {
            path: path.to_path_buf(),
            field,
        };
        let num_features = num_features.ok_or_else(|| missing("num_features"))?;
        let num_labels = num_labels.ok_or_else(|| missing("num_labels"))?;
        let quantization_bits =
            quantization_bits.ok_or_else(|| missing("quantization_coefficient"))?;

        let mut metadata = Self::new(num_features, num_labels, quantization_bits)?;
        metadata.num_samples = num_samples;
        if !label_counts.is_empty() {
            let mut counts = vec![0u32; usize::from(num_labels)];
            for (label, count) in label_counts {
                if let Some(slot) = counts.get_mut(label) {
                    *slot = count;
                }
            }
            metadata.label_counts = counts;
        }

        info!(
            num_features,
            num_labels, quantization_bits, "dataset metadata loaded"
        );
        Ok(metadata)
    }

    /// Write the parameter file.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteFile`] if the file cannot be written.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn write(&self, path: &Path) -> Result<(), IoError> {
        let write_err = |e: csv::Error| IoError::WriteFile {
            path: path.to_path_buf(),
            source: e.into(),
        };
        let mut wtr = csv::Writer::from_path(path).map_err(write_err)?;
        let mut rows: Vec<(String, String)> = vec![
            ("parameter".into(), "value".into()),
            (
                "quantization_coefficient".into(),
                self.quantization_bits.to_string(),
            ),
            ("num_features".into(), self.num_features.to_string()),
            ("num_labels".into(), self.num_labels.to_string()),
        ];
        if let Some(n) = self.num_samples {
            rows.push(("num_samples".into(), n.to_string()));
        }
        for (label, count) in self.label_counts.iter().enumerate() {
            rows.push((format!("samples_label_{label}"), count.to_string()));
        }
        for (key, value) in &rows {
            wtr.write_record([key, value]).map_err(write_err)?;
        }
        wtr.flush().map_err(|e| IoError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(path: &Path, field: &str, raw: &str) -> Result<T, IoError> {
    raw.parse().map_err(|_| IoError::MetadataValue {
        path: PathBuf::from(path),
        field: field.to_string(),
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("data_dp.csv");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn reads_required_and_optional_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "parameter,value\nquantization_coefficient,2\nmax_feature_value,3\n\
             num_features,12\nnum_samples,90\nnum_labels,3\n\
             samples_label_0,30\nsamples_label_2,60\n",
        );
        let meta = DatasetMetadata::read(&path).unwrap();
        assert_eq!(meta.num_features, 12);
        assert_eq!(meta.num_labels, 3);
        assert_eq!(meta.quantization_bits, 2);
        assert_eq!(meta.num_samples, Some(90));
        assert_eq!(meta.label_counts, vec![30, 0, 60]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = DatasetMetadata::read(&dir.path().join("absent_dp.csv")).unwrap_err();
        assert!(matches!(err, IoError::MetadataMissing { .. }));
    }

    #[test]
    fn missing_num_features_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "parameter,value\nquantization_coefficient,2\nnum_labels,3\n");
        let err = DatasetMetadata::read(&path).unwrap_err();
        assert!(matches!(err, IoError::MetadataField { field: "num_features", .. }));
    }

    #[test]
    fn malformed_value_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "parameter,value\nquantization_coefficient,two\nnum_features,4\nnum_labels,3\n",
        );
        let err = DatasetMetadata::read(&path).unwrap_err();
        assert!(matches!(err, IoError::MetadataValue { .. }));
    }

    #[test]
    fn out_of_range_quantization_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "parameter,value\nquantization_coefficient,12\nnum_features,4\nnum_labels,3\n",
        );
        let err = DatasetMetadata::read(&path).unwrap_err();
        assert!(matches!(err, IoError::InvalidQuantizationBits { bits: 12 }));
    }

    #[test]
    fn label_space_limits() {
        assert!(matches!(
            DatasetMetadata::new(4, 0, 4),
            Err(IoError::EmptySchema { num_labels: 0, .. })
        ));
        assert!(matches!(
            DatasetMetadata::new(4, 257, 4),
            Err(IoError::TooManyLabels { got: 257 })
        ));
        assert!(DatasetMetadata::new(4, 256, 4).is_ok());
    }

    #[test]
    fn write_then_read_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out_dp.csv");
        let mut meta = DatasetMetadata::new(7, 2, 4).unwrap();
        meta.num_samples = Some(10);
        meta.label_counts = vec![4, 6];
        meta.write(&path).unwrap();
        assert_eq!(DatasetMetadata::read(&path).unwrap(), meta);
    }
}
