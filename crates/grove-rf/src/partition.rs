//! Train / test / validation split of sample indices.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::error::RfError;

const RATIO_TOLERANCE: f64 = 1e-6;

/// Disjoint index sets drawn from `0..num_samples`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DataPartition {
    /// Training indices.
    pub train: Vec<u32>,
    /// Test indices.
    pub test: Vec<u32>,
    /// Validation indices.
    pub valid: Vec<u32>,
}

pub(crate) fn check_ratios(train: f64, test: f64, valid: f64) -> Result<(), RfError> {
    let finite = train.is_finite() && test.is_finite() && valid.is_finite();
    let sum = train + test + valid;
    if !finite
        || train <= 0.0
        || test < 0.0
        || valid < 0.0
        || sum > 1.0 + RATIO_TOLERANCE
    {
        return Err(RfError::InvalidSplitRatios { train, test, valid });
    }
    Ok(())
}

impl DataPartition {
    /// Shuffle `0..num_samples` with `seed` and cut it into three parts.
    ///
    /// Test and validation get `floor(n * ratio)` samples each. When the
    /// ratios sum to one, train takes everything left over; otherwise it gets
    /// `floor(n * train_ratio)` and the rest stays unused.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidSplitRatios`] if a ratio is negative, the sum
    /// exceeds one, or `train_ratio` is not positive.
    pub fn split(
        num_samples: u32,
        train_ratio: f64,
        test_ratio: f64,
        valid_ratio: f64,
        seed: u64,
    ) -> Result<Self, RfError> {
        check_ratios(train_ratio, test_ratio, valid_ratio)?;
        let n = num_samples as usize;
        let mut order: Vec<u32> = (0..num_samples).collect();
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

        let n_test = (n as f64 * test_ratio).floor() as usize;
        let n_valid = ((n as f64 * valid_ratio).floor() as usize).min(n - n_test);
        let rest = n - n_test - n_valid;
        let n_train = if (train_ratio + test_ratio + valid_ratio - 1.0).abs() <= RATIO_TOLERANCE {
            rest
        } else {
            ((n as f64 * train_ratio).floor() as usize).min(rest)
        };

        let valid = order.split_off(n - n_valid);
        let test = order.split_off(n - n_valid - n_test);
        order.truncate(n_train);
        Ok(Self {
            train: order,
            test,
            valid,
        })
    }
}
