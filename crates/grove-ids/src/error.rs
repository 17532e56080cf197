/// Errors from packed-array and ID-container operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// Returned when a packed field width is outside 1..=8 bits.
    #[error("bit width must be in [1, 8], got {bits}")]
    InvalidBitWidth {
        /// The invalid bit width provided.
        bits: u8,
    },

    /// Returned when an element index lies past the end of the container.
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds {
        /// The requested index.
        index: usize,
        /// The number of addressable elements.
        len: usize,
    },

    /// Returned when a range has its lower bound above its upper bound.
    #[error("invalid id range [{min_id}, {max_id}]: min exceeds max")]
    InvalidRange {
        /// Requested lower bound.
        min_id: u32,
        /// Requested upper bound.
        max_id: u32,
    },

    /// Returned when an id exceeds the platform-wide id ceiling.
    #[error("id {id} exceeds the id ceiling {ceiling}")]
    IdCeilingExceeded {
        /// The offending id.
        id: u32,
        /// The largest id any container may hold.
        ceiling: u32,
    },

    /// Returned when narrowing a range would drop ids that are still stored.
    #[error(
        "range [{requested_min}, {requested_max}] would drop stored ids in [{stored_min}, {stored_max}]"
    )]
    RangeViolation {
        /// Requested lower bound.
        requested_min: u32,
        /// Requested upper bound.
        requested_max: u32,
        /// Smallest id currently stored.
        stored_min: u32,
        /// Largest id currently stored.
        stored_max: u32,
    },
}
