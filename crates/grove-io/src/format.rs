//! Binary dataset layout: a 6-byte header followed by fixed-size records.
//!
//! ```text
//! header : num_samples u32 LE | num_features u16 LE
//! record : label u8 | ceil(num_features * bits / 8) packed feature bytes
//! ```
//!
//! Feature values are packed LSB-first with [`grove_ids::write_bits`], the
//! same layout `PackedArray` uses.

use grove_ids::{bytes_for, read_bits, write_bits};

use crate::IoError;

/// Size of the dataset header in bytes.
pub const HEADER_SIZE: usize = 6;

/// The dataset header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetHeader {
    /// Number of records following the header.
    pub num_samples: u32,
    /// Number of features per record.
    pub num_features: u16,
}

impl DatasetHeader {
    /// Decode a header from its 6-byte little-endian form.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::TruncatedHeader`] if fewer than [`HEADER_SIZE`] bytes are given.
    pub fn decode(bytes: &[u8]) -> Result<Self, IoError> {
        if bytes.len() < HEADER_SIZE {
            return Err(IoError::TruncatedHeader {
                len: bytes.len() as u64,
                expected: HEADER_SIZE as u64,
            });
        }
        Ok(Self {
            num_samples: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            num_features: u16::from_le_bytes([bytes[4], bytes[5]]),
        })
    }

    /// Encode the header to its 6-byte little-endian form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.num_samples.to_le_bytes());
        out[4..].copy_from_slice(&self.num_features.to_le_bytes());
        out
    }
}

/// Shape of one record: feature count and quantization width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    num_features: u16,
    quantization_bits: u8,
}

impl RecordLayout {
    /// Create a layout for `num_features` values of `quantization_bits` bits each.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidQuantizationBits`] if the width is not in `1..=8`.
    pub fn new(num_features: u16, quantization_bits: u8) -> Result<Self, IoError> {
        if !(1..=8).contains(&quantization_bits) {
            return Err(IoError::InvalidQuantizationBits {
                bits: quantization_bits,
            });
        }
        Ok(Self {
            num_features,
            quantization_bits,
        })
    }

    /// Number of features per record.
    #[must_use]
    pub fn num_features(&self) -> usize {
        usize::from(self.num_features)
    }

    /// Bits per feature value.
    #[must_use]
    pub fn quantization_bits(&self) -> u8 {
        self.quantization_bits
    }

    /// Largest representable feature value.
    #[must_use]
    pub fn max_value(&self) -> u8 {
        ((1u16 << self.quantization_bits) - 1) as u8
    }

    /// Bytes holding the packed feature values of one record.
    #[must_use]
    pub fn packed_feature_bytes(&self) -> usize {
        bytes_for(self.num_features(), self.quantization_bits)
    }

    /// Total record size: one label byte plus the packed features.
    #[must_use]
    pub fn record_size(&self) -> usize {
        1 + self.packed_feature_bytes()
    }

    /// Label byte of `record`.
    #[inline]
    #[must_use]
    pub fn decode_label(&self, record: &[u8]) -> u8 {
        record[0]
    }

    /// Value of feature `feature` in `record`. The caller keeps `feature`
    /// below [`num_features`](Self::num_features).
    #[inline]
    #[must_use]
    pub fn decode_feature(&self, record: &[u8], feature: usize) -> u8 {
        read_bits(&record[1..], self.quantization_bits, feature)
    }

    /// Encode one record, appending it to `out`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::SampleWidthMismatch`] | `features.len()` differs from the layout |
    /// | [`IoError::ValueOutOfRange`] | a value does not fit the quantization width |
    pub fn encode_record(
        &self,
        label: u8,
        features: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), IoError> {
        if features.len() != self.num_features() {
            return Err(IoError::SampleWidthMismatch {
                expected: self.num_features(),
                got: features.len(),
            });
        }
        let start = out.len();
        out.push(label);
        out.resize(start + self.record_size(), 0);
        let packed = &mut out[start + 1..];
        for (feature, &value) in features.iter().enumerate() {
            if value > self.max_value() {
                out.truncate(start);
                return Err(IoError::ValueOutOfRange {
                    feature,
                    value,
                    bits: self.quantization_bits,
                });
            }
            write_bits(packed, self.quantization_bits, feature, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip_is_little_endian() {
        let header = DatasetHeader {
            num_samples: 0x0102_0304,
            num_features: 0x0506,
        };
        let bytes = header.encode();
        assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01, 0x06, 0x05]);
        assert_eq!(DatasetHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn truncated_header_error() {
        let err = DatasetHeader::decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, IoError::TruncatedHeader { len: 3, .. }));
    }

    #[test]
    fn record_size_rounds_up_packed_bytes() {
        assert_eq!(RecordLayout::new(10, 2).unwrap().record_size(), 1 + 3);
        assert_eq!(RecordLayout::new(8, 1).unwrap().record_size(), 1 + 1);
        assert_eq!(RecordLayout::new(3, 8).unwrap().record_size(), 1 + 3);
    }

    #[test]
    fn rejects_invalid_quantization() {
        assert!(matches!(
            RecordLayout::new(4, 0),
            Err(IoError::InvalidQuantizationBits { bits: 0 })
        ));
        assert!(RecordLayout::new(4, 9).is_err());
    }

    #[test]
    fn encoded_record_decodes_back() {
        let layout = RecordLayout::new(5, 3).unwrap();
        let mut buf = Vec::new();
        layout.encode_record(2, &[7, 0, 5, 1, 6], &mut buf).unwrap();
        assert_eq!(buf.len(), layout.record_size());
        assert_eq!(layout.decode_label(&buf), 2);
        let decoded: Vec<u8> = (0..5).map(|f| layout.decode_feature(&buf, f)).collect();
        assert_eq!(decoded, vec![7, 0, 5, 1, 6]);
    }

    #[test]
    fn encode_rejects_out_of_range_value_without_partial_write() {
        let layout = RecordLayout::new(2, 2).unwrap();
        let mut buf = vec![9];
        let err = layout.encode_record(0, &[1, 4], &mut buf).unwrap_err();
        assert!(matches!(err, IoError::ValueOutOfRange { feature: 1, value: 4, bits: 2 }));
        assert_eq!(buf, vec![9]);
    }
}
