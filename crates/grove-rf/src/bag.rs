//! Per-tree sample bags and deterministic RNG streams.

use std::collections::HashSet;

use grove_ids::IdVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::config::ForestConfig;
use crate::error::RfError;

/// Sample multiset a tree trains on. Counts saturate at 7.
pub type Bag = IdVector<3>;

/// Salt for the per-tree split streams.
pub(crate) const SPLIT_SALT: u64 = 0xA5A5_5A5A_C3C3_3C3C;

/// Salt for the bag stream used once duplicate retries run out.
const FALLBACK_SALT: u64 = 0x0F1E_2D3C_4B5A_6978;

/// Retries with a fresh nonce before a duplicate bag is accepted.
const MAX_BAG_RETRIES: u64 = 8;

/// One step of the splitmix64 generator.
#[must_use]
pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// An independent ChaCha8 stream for `(seed, stream, nonce)`.
#[must_use]
pub fn derive_rng(seed: u64, stream: u64, nonce: u64) -> ChaCha8Rng {
    let mixed = splitmix64(splitmix64(splitmix64(seed) ^ stream) ^ nonce);
    ChaCha8Rng::seed_from_u64(mixed)
}

/// Draws bags from a pool of sample indices.
#[derive(Debug, Clone, Copy)]
pub struct BagSampler {
    seed: u64,
    use_bootstrap: bool,
    ratio: f64,
}

impl BagSampler {
    /// Create a sampler.
    #[must_use]
    pub fn new(seed: u64, use_bootstrap: bool, ratio: f64) -> Self {
        Self {
            seed,
            use_bootstrap,
            ratio,
        }
    }

    /// A sampler using the config's seed and bagging mode.
    #[must_use]
    pub fn from_config(config: &ForestConfig) -> Self {
        Self::new(config.seed, config.use_bootstrap, config.bootstrap_ratio)
    }

    /// Draw the bag for `stream` (normally the tree index).
    ///
    /// Bootstrap draws `|pool|` samples with replacement; otherwise
    /// `round(|pool| * ratio)` samples (at least one) are drawn without
    /// replacement.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`RfError::EmptyTrainingSet`] | `pool` is empty |
    /// | [`RfError::Ids`] | a pool index exceeds the id ceiling |
    pub fn draw(&self, stream: u64, pool: &[u32]) -> Result<Bag, RfError> {
        self.draw_with(&mut derive_rng(self.seed, stream, 0), pool)
    }

    fn draw_with(&self, rng: &mut ChaCha8Rng, pool: &[u32]) -> Result<Bag, RfError> {
        let (Some(&lo), Some(&hi)) = (pool.iter().min(), pool.iter().max()) else {
            return Err(RfError::EmptyTrainingSet);
        };
        let mut bag = Bag::with_range(lo, hi)?;
        let n = pool.len();
        if self.use_bootstrap {
            for _ in 0..n {
                bag.push_back(pool[rng.gen_range(0..n)])?;
            }
        } else {
            let take = ((n as f64 * self.ratio).round() as usize).clamp(1, n);
            let mut shuffled = pool.to_vec();
            for i in 0..take {
                let j = rng.gen_range(i..n);
                shuffled.swap(i, j);
                bag.push_back(shuffled[i])?;
            }
        }
        Ok(bag)
    }

    /// Draw one bag per tree, streams `0..num_trees`.
    ///
    /// # Errors
    ///
    /// Same as [`draw`](Self::draw).
    pub fn draw_bags(&self, pool: &[u32], num_trees: usize) -> Result<Vec<Bag>, RfError> {
        self.draw_bags_from(0, pool, num_trees)
    }

    /// Draw one bag per tree on streams `base..base + num_trees`.
    ///
    /// A bag identical to one already drawn is redrawn with the next nonce,
    /// up to eight times. After that a salted stream is used and its bag is
    /// accepted as is.
    ///
    /// # Errors
    ///
    /// Same as [`draw`](Self::draw).
    pub fn draw_bags_from(
        &self,
        base: u64,
        pool: &[u32],
        num_trees: usize,
    ) -> Result<Vec<Bag>, RfError> {
        let mut seen = HashSet::with_capacity(num_trees);
        let mut bags = Vec::with_capacity(num_trees);
        for tree in 0..num_trees as u64 {
            let stream = base + tree;
            let mut accepted = None;
            for nonce in 0..=MAX_BAG_RETRIES {
                let bag = self.draw_with(&mut derive_rng(self.seed, stream, nonce), pool)?;
                if seen.insert(bag.fingerprint()) {
                    accepted = Some(bag);
                    break;
                }
            }
            let bag = match accepted {
                Some(bag) => bag,
                None => {
                    debug!(tree = stream, "duplicate bags persisted, using fallback stream");
                    let bag = self.draw_with(
                        &mut derive_rng(self.seed ^ FALLBACK_SALT, stream, MAX_BAG_RETRIES),
                        pool,
                    )?;
                    seen.insert(bag.fingerprint());
                    bag
                }
            };
            bags.push(bag);
        }
        Ok(bags)
    }
}
