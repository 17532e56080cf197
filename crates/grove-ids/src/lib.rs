//! Compact sample-identity containers.
//!
//! [`PackedArray`] addresses a byte buffer as fixed-width bit fields.
//! [`IdVector`] builds on it to store a multiset of integer ids over a
//! contiguous range, one small saturating counter per id. Random forest bags
//! and out-of-bag bookkeeping use it instead of one machine word per sample.

mod error;
mod id_vector;
mod packed;

pub use error::IdError;
pub use id_vector::{DEFAULT_MAX_ID, ID_CEILING, IdVector, Iter};
pub use packed::{PackedArray, bytes_for, read_bits, write_bits};
