//! Fixed-capacity chunk cache with least-recently-used eviction.
//!
//! Each slot owns a buffer sized for one full chunk, allocated once when the
//! cache is built. Loading a chunk reuses the victim slot's buffer, so no
//! allocation happens mid-batch.

use crate::IoError;

/// Cache counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served by a resident chunk.
    pub hits: u64,
    /// Lookups that required a chunk load.
    pub misses: u64,
    /// Chunks read from the source. Lags `misses` only by failed reads.
    pub loads: u64,
    /// Loads that displaced a resident chunk.
    pub evictions: u64,
}

impl CacheStats {
    /// Total lookups.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups served from cache; 0.0 before any lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Slot {
    chunk: Option<u32>,
    last_used: u64,
    data: Vec<u8>,
}

/// A small set of chunk buffers, evicting the slot with the oldest use.
#[derive(Debug)]
pub(crate) struct ChunkCache {
    slots: Vec<Slot>,
    clock: u64,
    stats: CacheStats,
}

impl ChunkCache {
    /// Allocate `slots` buffers of `chunk_bytes` each.
    pub(crate) fn new(slots: usize, chunk_bytes: usize) -> Result<Self, IoError> {
        if slots == 0 {
            return Err(IoError::InvalidCacheConfig {
                reason: "cache needs at least one slot".into(),
            });
        }
        let mut out = Vec::with_capacity(slots);
        for _ in 0..slots {
            let mut data = Vec::new();
            data.try_reserve_exact(chunk_bytes)
                .map_err(|e| IoError::CacheAllocation {
                    bytes: chunk_bytes * slots,
                    source: e,
                })?;
            out.push(Slot {
                chunk: None,
                last_used: 0,
                data,
            });
        }
        Ok(Self {
            slots: out,
            clock: 0,
            stats: CacheStats::default(),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.stats
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    /// Chunk indices currently resident, in slot order.
    pub(crate) fn resident(&self) -> Vec<u32> {
        self.slots.iter().filter_map(|s| s.chunk).collect()
    }

    fn touch(&mut self, slot: usize) {
        self.clock += 1;
        self.slots[slot].last_used = self.clock;
    }

    /// First empty slot, otherwise the one with the smallest last-used stamp.
    fn victim(&self) -> usize {
        if let Some(empty) = self.slots.iter().position(|s| s.chunk.is_none()) {
            return empty;
        }
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.last_used)
            .map_or(0, |(i, _)| i)
    }

    /// Return the slot holding `chunk`, loading it through `fill` on a miss.
    ///
    /// `fill` receives the cleared victim buffer. If it fails the slot is
    /// left empty and the error propagates.
    pub(crate) fn get_or_load<F>(&mut self, chunk: u32, fill: F) -> Result<usize, IoError>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<(), IoError>,
    {
        if let Some(slot) = self.slots.iter().position(|s| s.chunk == Some(chunk)) {
            self.stats.hits += 1;
            self.touch(slot);
            return Ok(slot);
        }

        self.stats.misses += 1;
        let slot = self.victim();
        if self.slots[slot].chunk.is_some() {
            self.stats.evictions += 1;
        }
        let entry = &mut self.slots[slot];
        entry.chunk = None;
        entry.data.clear();
        fill(&mut entry.data)?;
        entry.chunk = Some(chunk);
        self.stats.loads += 1;
        self.touch(slot);
        Ok(slot)
    }

    pub(crate) fn data(&self, slot: usize) -> &[u8] {
        &self.slots[slot].data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_with(tag: u8) -> impl FnOnce(&mut Vec<u8>) -> Result<(), IoError> {
        move |buf| {
            buf.extend_from_slice(&[tag; 4]);
            Ok(())
        }
    }

    #[test]
    fn zero_slots_rejected() {
        assert!(matches!(
            ChunkCache::new(0, 16),
            Err(IoError::InvalidCacheConfig { .. })
        ));
    }

    #[test]
    fn hit_after_load() {
        let mut cache = ChunkCache::new(2, 4).unwrap();
        let slot = cache.get_or_load(7, fill_with(7)).unwrap();
        assert_eq!(cache.data(slot), &[7; 4]);
        let again = cache.get_or_load(7, fill_with(0)).unwrap();
        assert_eq!(again, slot);
        assert_eq!(cache.data(again), &[7; 4]);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                loads: 1,
                evictions: 0
            }
        );
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = ChunkCache::new(2, 4).unwrap();
        cache.get_or_load(0, fill_with(0)).unwrap();
        cache.get_or_load(1, fill_with(1)).unwrap();
        // Touch chunk 0 so chunk 1 becomes the LRU slot.
        cache.get_or_load(0, fill_with(0)).unwrap();
        cache.get_or_load(2, fill_with(2)).unwrap();
        let mut resident = cache.resident();
        resident.sort_unstable();
        assert_eq!(resident, vec![0, 2]);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn failed_fill_leaves_slot_empty() {
        let mut cache = ChunkCache::new(1, 4).unwrap();
        cache.get_or_load(3, fill_with(3)).unwrap();
        let err = cache
            .get_or_load(4, |_| Err(IoError::InvalidCacheConfig { reason: "boom".into() }))
            .unwrap_err();
        assert!(matches!(err, IoError::InvalidCacheConfig { .. }));
        assert!(cache.resident().is_empty());
        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.loads, 1);
    }

    #[test]
    fn hit_rate_is_zero_without_requests() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            loads: 1,
            evictions: 0,
        };
        assert!((stats.hit_rate() - 0.75).abs() < 1e-12);
    }
}
