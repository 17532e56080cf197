//! Bit-addressable byte buffer holding fixed-width fields of 1 to 8 bits.
//!
//! Fields are laid out LSB-first: field `i` starts at bit `i * bits`, and a
//! field that does not fit in the remainder of its first byte continues in
//! the low bits of the next one. Since fields never exceed 8 bits, at most
//! two bytes are touched per access.

use crate::error::IdError;

/// Mask covering the low `bits` bits of a byte.
#[inline]
fn field_mask(bits: u32) -> u8 {
    ((1u16 << bits) - 1) as u8
}

/// Read the `index`-th `bits`-wide field from `bytes`.
///
/// Shared by [`PackedArray`] and by record decoders that address packed
/// feature bytes in place.
///
/// # Panics
///
/// Panics if the field extends past the end of `bytes`, or if `bits` is
/// zero or greater than 8.
#[inline]
#[must_use]
pub fn read_bits(bytes: &[u8], bits: u8, index: usize) -> u8 {
    debug_assert!((1..=8).contains(&bits));
    let bits = u32::from(bits);
    let bit_pos = index * bits as usize;
    let byte = bit_pos >> 3;
    let offset = (bit_pos & 7) as u32;

    if offset + bits <= 8 {
        (bytes[byte] >> offset) & field_mask(bits)
    } else {
        let low_bits = 8 - offset;
        let low = bytes[byte] >> offset;
        let high = bytes[byte + 1] & field_mask(bits - low_bits);
        low | (high << low_bits)
    }
}

/// Write `value` (masked to `bits`) into the `index`-th field of `bytes`.
///
/// # Panics
///
/// Panics if the field extends past the end of `bytes`, or if `bits` is
/// zero or greater than 8.
#[inline]
pub fn write_bits(bytes: &mut [u8], bits: u8, index: usize, value: u8) {
    debug_assert!((1..=8).contains(&bits));
    let bits = u32::from(bits);
    let value = value & field_mask(bits);
    let bit_pos = index * bits as usize;
    let byte = bit_pos >> 3;
    let offset = (bit_pos & 7) as u32;

    if offset + bits <= 8 {
        let mask = field_mask(bits) << offset;
        bytes[byte] = (bytes[byte] & !mask) | (value << offset);
    } else {
        let low_bits = 8 - offset;
        let high_mask = field_mask(bits - low_bits);
        bytes[byte] = (bytes[byte] & !(0xFFu8 << offset)) | (value << offset);
        bytes[byte + 1] = (bytes[byte + 1] & !high_mask) | (value >> low_bits);
    }
}

/// Number of bytes needed to hold `elements` fields of `bits` bits.
#[must_use]
pub fn bytes_for(elements: usize, bits: u8) -> usize {
    (elements * usize::from(bits)).div_ceil(8)
}

/// A byte buffer addressed as a sequence of `bits`-wide fields.
///
/// The byte capacity is fixed at construction; there is no implicit resize.
/// [`get`](Self::get) and [`set`](Self::set) are bounds-checked against the
/// element capacity. [`get_raw`](Self::get_raw) and
/// [`set_raw`](Self::set_raw) skip that check for hot loops whose indices
/// are already known to be valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedArray {
    bits: u8,
    data: Vec<u8>,
}

impl PackedArray {
    /// Create a zeroed buffer of `byte_capacity` bytes holding `bits`-wide fields.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidBitWidth`] if `bits` is not in `1..=8`.
    pub fn new(bits: u8, byte_capacity: usize) -> Result<Self, IdError> {
        if !(1..=8).contains(&bits) {
            return Err(IdError::InvalidBitWidth { bits });
        }
        Ok(Self {
            bits,
            data: vec![0; byte_capacity],
        })
    }

    /// Create a zeroed buffer large enough for `elements` fields.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidBitWidth`] if `bits` is not in `1..=8`.
    pub fn with_elements(bits: u8, elements: usize) -> Result<Self, IdError> {
        Self::new(bits, bytes_for(elements, bits))
    }

    /// Infallible constructor for callers that validated `bits` statically.
    pub(crate) fn zeroed(bits: u8, elements: usize) -> Self {
        Self {
            bits,
            data: vec![0; bytes_for(elements, bits)],
        }
    }

    /// Field width in bits.
    #[must_use]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of whole fields the buffer can address.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len() * 8 / usize::from(self.bits)
    }

    /// Size of the backing buffer in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Borrow the backing bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Read field `index`, or `None` if it lies past the capacity.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u8> {
        (index < self.capacity()).then(|| read_bits(&self.data, self.bits, index))
    }

    /// Write field `index`; `value` is masked to the field width.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::OutOfBounds`] if `index` lies past the capacity.
    pub fn set(&mut self, index: usize, value: u8) -> Result<(), IdError> {
        let len = self.capacity();
        if index >= len {
            return Err(IdError::OutOfBounds { index, len });
        }
        write_bits(&mut self.data, self.bits, index, value);
        Ok(())
    }

    /// Read field `index` without the capacity check.
    ///
    /// # Panics
    ///
    /// Panics if the field extends past the backing buffer.
    #[inline]
    #[must_use]
    pub fn get_raw(&self, index: usize) -> u8 {
        read_bits(&self.data, self.bits, index)
    }

    /// Write field `index` without the capacity check.
    ///
    /// # Panics
    ///
    /// Panics if the field extends past the backing buffer.
    #[inline]
    pub fn set_raw(&mut self, index: usize, value: u8) {
        write_bits(&mut self.data, self.bits, index, value);
    }

    /// Set every byte of the buffer to `byte`.
    pub fn fill_bytes(&mut self, byte: u8) {
        self.data.fill(byte);
    }

    /// Zero every field.
    pub fn clear(&mut self) {
        self.fill_bytes(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn rejects_invalid_widths() {
        assert_eq!(
            PackedArray::new(0, 4).unwrap_err(),
            IdError::InvalidBitWidth { bits: 0 }
        );
        assert_eq!(
            PackedArray::new(9, 4).unwrap_err(),
            IdError::InvalidBitWidth { bits: 9 }
        );
    }

    #[test]
    fn capacity_counts_whole_fields() {
        let arr = PackedArray::new(3, 4).unwrap();
        assert_eq!(arr.capacity(), 10);
        assert_eq!(PackedArray::with_elements(3, 11).unwrap().byte_len(), 5);
    }

    #[test]
    fn straddling_field_round_trip() {
        // bits=3, index 2 occupies bits 6..9: two in byte 0, one in byte 1.
        let mut arr = PackedArray::new(3, 2).unwrap();
        arr.set(2, 0b101).unwrap();
        assert_eq!(arr.get(2), Some(0b101));
        assert_eq!(arr.as_bytes(), &[0b0100_0000, 0b0000_0001]);
        assert_eq!(arr.get(1), Some(0));
        assert_eq!(arr.get(3), Some(0));
    }

    #[test]
    fn set_masks_to_width_and_preserves_neighbours() {
        let mut arr = PackedArray::new(2, 1).unwrap();
        arr.set(0, 3).unwrap();
        arr.set(2, 3).unwrap();
        arr.set(1, 0xFF).unwrap();
        assert_eq!(arr.get(0), Some(3));
        assert_eq!(arr.get(1), Some(3));
        assert_eq!(arr.get(2), Some(3));
        arr.set(1, 0).unwrap();
        assert_eq!(arr.as_bytes(), &[0b0011_0011]);
    }

    #[test]
    fn bounds_checked_access() {
        let mut arr = PackedArray::new(5, 2).unwrap();
        assert_eq!(arr.capacity(), 3);
        assert_eq!(arr.get(3), None);
        assert_eq!(
            arr.set(3, 1).unwrap_err(),
            IdError::OutOfBounds { index: 3, len: 3 }
        );
    }

    #[test]
    fn matches_reference_for_every_width() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for bits in 1..=8u8 {
            let n = 97;
            let mut arr = PackedArray::with_elements(bits, n).unwrap();
            let mut reference = vec![0u8; n];
            for _ in 0..500 {
                let idx = rng.gen_range(0..n);
                let value: u8 = rng.r#gen();
                arr.set(idx, value).unwrap();
                reference[idx] = value & field_mask(u32::from(bits));
            }
            for (idx, &expected) in reference.iter().enumerate() {
                assert_eq!(arr.get(idx), Some(expected), "bits={bits} idx={idx}");
            }
        }
    }

    #[test]
    fn eight_bit_fields_are_plain_bytes() {
        let mut arr = PackedArray::new(8, 3).unwrap();
        arr.set_raw(1, 0xAB);
        assert_eq!(arr.as_bytes(), &[0, 0xAB, 0]);
        assert_eq!(arr.get_raw(1), 0xAB);
    }
}
