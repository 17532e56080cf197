//! Bounded-range ID multiset backed by a [`PackedArray`] of occurrence counts.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Sub, SubAssign};

use crate::error::IdError;
use crate::packed::PackedArray;

/// Largest id any container may hold.
pub const ID_CEILING: u32 = 1 << 29;

/// Upper bound of the range a fresh container starts with.
pub const DEFAULT_MAX_ID: u32 = 127;

const FNV_OFFSET: u64 = 1_469_598_103_934_665_603;
const FNV_PRIME: u64 = 1_099_511_628_211;

/// A multiset of integer ids drawn from a contiguous range `[min_id, max_id]`.
///
/// Every id in range owns a `BITS`-wide counter, so the container costs
/// `(max_id - min_id + 1) * BITS` bits regardless of how many ids are
/// stored. Counts saturate at [`MAX_COUNT`](Self::MAX_COUNT): pushing a
/// saturated id again is a silent no-op.
///
/// Pushing an id outside the range grows the range to include it. Narrowing
/// calls ([`set_min_id`](Self::set_min_id), [`set_max_id`](Self::set_max_id),
/// [`set_id_range`](Self::set_id_range)) refuse to drop stored ids and leave
/// the container untouched on failure.
#[derive(Clone)]
pub struct IdVector<const BITS: u8> {
    min_id: u32,
    max_id: u32,
    len: usize,
    counts: PackedArray,
}

impl<const BITS: u8> IdVector<BITS> {
    /// Largest count a single id can reach.
    pub const MAX_COUNT: u8 = ((1u16 << BITS) - 1) as u8;

    const VALID_WIDTH: () = assert!(BITS >= 1 && BITS <= 8, "BITS must be in 1..=8");

    /// Create an empty container over the default range `[0, 127]`.
    #[must_use]
    pub fn new() -> Self {
        Self::allocate(0, DEFAULT_MAX_ID)
    }

    /// Create an empty container over `[0, max_id]`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::IdCeilingExceeded`] if `max_id` exceeds [`ID_CEILING`].
    pub fn with_max_id(max_id: u32) -> Result<Self, IdError> {
        Self::with_range(0, max_id)
    }

    /// Create an empty container over `[min_id, max_id]`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IdError::InvalidRange`] | `min_id > max_id` |
    /// | [`IdError::IdCeilingExceeded`] | `max_id` exceeds [`ID_CEILING`] |
    pub fn with_range(min_id: u32, max_id: u32) -> Result<Self, IdError> {
        check_range(min_id, max_id)?;
        Ok(Self::allocate(min_id, max_id))
    }

    /// Build a container holding every id yielded by `ids`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::IdCeilingExceeded`] if any id exceeds [`ID_CEILING`].
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Result<Self, IdError> {
        let mut out = Self::new();
        for id in ids {
            out.push_back(id)?;
        }
        Ok(out)
    }

    fn allocate(min_id: u32, max_id: u32) -> Self {
        let () = Self::VALID_WIDTH;
        let width = (max_id - min_id) as usize + 1;
        Self {
            min_id,
            max_id,
            len: 0,
            counts: PackedArray::zeroed(BITS, width),
        }
    }

    fn width(&self) -> usize {
        (self.max_id - self.min_id) as usize + 1
    }

    fn slot(&self, id: u32) -> Option<usize> {
        (self.min_id..=self.max_id)
            .contains(&id)
            .then(|| (id - self.min_id) as usize)
    }

    /// Overwrite the count of an in-range id, keeping `len` consistent.
    fn put(&mut self, slot: usize, count: u8) {
        let old = self.counts.get_raw(slot);
        self.len = self.len - usize::from(old) + usize::from(count);
        self.counts.set_raw(slot, count);
    }

    /// Move the stored counts into a freshly allocated range. The caller
    /// guarantees every stored id fits.
    fn rebuild(&mut self, min_id: u32, max_id: u32) {
        let mut next = Self::allocate(min_id, max_id);
        for (id, count) in self.entries() {
            let slot = (id - min_id) as usize;
            next.counts.set_raw(slot, count);
        }
        next.len = self.len;
        *self = next;
    }

    /// Ascending `(id, count)` pairs for every id with a nonzero count.
    fn entries(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        (0..self.width()).filter_map(move |slot| {
            let count = self.counts.get_raw(slot);
            (count > 0).then(|| (self.min_id + slot as u32, count))
        })
    }

    // --- Queries ---

    /// Total number of stored instances, counting repetition.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of distinct ids with a nonzero count.
    #[must_use]
    pub fn unique_len(&self) -> usize {
        self.entries().count()
    }

    /// Return `true` if no id is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lower bound of the addressable range.
    #[must_use]
    pub fn min_id(&self) -> u32 {
        self.min_id
    }

    /// Upper bound of the addressable range.
    #[must_use]
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    /// Occurrence count of `id`; zero for ids outside the range.
    #[must_use]
    pub fn count(&self, id: u32) -> u8 {
        self.slot(id).map_or(0, |slot| self.counts.get_raw(slot))
    }

    /// Return `true` if `id` is stored at least once.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.count(id) > 0
    }

    /// Smallest stored id.
    #[must_use]
    pub fn first(&self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        self.entries().next().map(|(id, _)| id)
    }

    /// Largest stored id.
    #[must_use]
    pub fn last(&self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        (0..self.width())
            .rev()
            .find(|&slot| self.counts.get_raw(slot) > 0)
            .map(|slot| self.min_id + slot as u32)
    }

    /// The `n`-th instance in ascending order, counting repetition.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::OutOfBounds`] if `n >= self.len()`.
    pub fn nth(&self, n: usize) -> Result<u32, IdError> {
        if n >= self.len {
            return Err(IdError::OutOfBounds {
                index: n,
                len: self.len,
            });
        }
        let mut seen = 0usize;
        for (id, count) in self.entries() {
            seen += usize::from(count);
            if n < seen {
                return Ok(id);
            }
        }
        Err(IdError::OutOfBounds {
            index: n,
            len: self.len,
        })
    }

    /// Iterate ids in ascending order, each repeated by its count.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, BITS> {
        Iter {
            ids: self,
            next_slot: 0,
            current: 0,
            pending: 0,
            remaining: self.len,
        }
    }

    /// Return `true` if every id's count here is at most its count in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.len <= other.len && self.entries().all(|(id, count)| count <= other.count(id))
    }

    /// FNV-1a hash over the ascending `(id, count)` pairs.
    ///
    /// Two containers holding the same multiset hash equally regardless of
    /// their ranges.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hash = FNV_OFFSET;
        for (id, count) in self.entries() {
            for byte in id.to_le_bytes().into_iter().chain([count]) {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        hash
    }

    // --- Mutation ---

    /// Add one instance of `id`, growing the range if needed.
    ///
    /// A saturated id stays at [`MAX_COUNT`](Self::MAX_COUNT).
    ///
    /// # Errors
    ///
    /// Returns [`IdError::IdCeilingExceeded`] if `id` exceeds [`ID_CEILING`].
    pub fn push_back(&mut self, id: u32) -> Result<(), IdError> {
        if id > ID_CEILING {
            return Err(IdError::IdCeilingExceeded {
                id,
                ceiling: ID_CEILING,
            });
        }
        self.cover(id, id);
        let slot = (id - self.min_id) as usize;
        let count = self.counts.get_raw(slot);
        if count < Self::MAX_COUNT {
            self.counts.set_raw(slot, count + 1);
            self.len += 1;
        }
        Ok(())
    }

    /// Grow the range to include `[lo, hi]`. Growing never drops ids.
    fn cover(&mut self, lo: u32, hi: u32) {
        if lo < self.min_id || hi > self.max_id {
            self.rebuild(lo.min(self.min_id), hi.max(self.max_id));
        }
    }

    /// Remove one instance of `id`. Returns `false` if it was absent.
    pub fn erase(&mut self, id: u32) -> bool {
        match self.slot(id) {
            Some(slot) => {
                let count = self.counts.get_raw(slot);
                if count == 0 {
                    return false;
                }
                self.counts.set_raw(slot, count - 1);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Remove every instance of `id`, returning how many were removed.
    pub fn erase_all(&mut self, id: u32) -> u8 {
        match self.slot(id) {
            Some(slot) => {
                let count = self.counts.get_raw(slot);
                self.put(slot, 0);
                count
            }
            None => 0,
        }
    }

    /// Saturate every id in the range.
    pub fn fill(&mut self) {
        let width = self.width();
        for slot in 0..width {
            self.counts.set_raw(slot, Self::MAX_COUNT);
        }
        self.len = width * usize::from(Self::MAX_COUNT);
    }

    /// Add one instance of every id in `[start, end]`, growing the range if needed.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IdError::InvalidRange`] | `start > end` |
    /// | [`IdError::IdCeilingExceeded`] | `end` exceeds [`ID_CEILING`] |
    pub fn insert_range(&mut self, start: u32, end: u32) -> Result<(), IdError> {
        check_range(start, end)?;
        self.cover(start, end);
        for id in start..=end {
            let slot = (id - self.min_id) as usize;
            let count = self.counts.get_raw(slot);
            if count < Self::MAX_COUNT {
                self.counts.set_raw(slot, count + 1);
                self.len += 1;
            }
        }
        Ok(())
    }

    /// Remove one instance of every id in `[start, end]`. Ids outside the
    /// range are ignored. Returns the number of instances removed.
    pub fn erase_range(&mut self, start: u32, end: u32) -> usize {
        let lo = start.max(self.min_id);
        let hi = end.min(self.max_id);
        if lo > hi {
            return 0;
        }
        (lo..=hi).filter(|&id| self.erase(id)).count()
    }

    /// Remove and return the smallest stored id (one instance).
    pub fn pop_front(&mut self) -> Option<u32> {
        let id = self.first()?;
        self.erase(id);
        Some(id)
    }

    /// Remove and return the largest stored id (one instance).
    pub fn pop_back(&mut self) -> Option<u32> {
        let id = self.last()?;
        self.erase(id);
        Some(id)
    }

    /// Remove every id, keeping the range.
    pub fn clear(&mut self) {
        self.counts.clear();
        self.len = 0;
    }

    // --- Range management ---

    /// Move the lower bound to `min_id`.
    ///
    /// # Errors
    ///
    /// Same as [`set_id_range`](Self::set_id_range).
    pub fn set_min_id(&mut self, min_id: u32) -> Result<(), IdError> {
        self.set_id_range(min_id, self.max_id)
    }

    /// Move the upper bound to `max_id`.
    ///
    /// # Errors
    ///
    /// Same as [`set_id_range`](Self::set_id_range).
    pub fn set_max_id(&mut self, max_id: u32) -> Result<(), IdError> {
        self.set_id_range(self.min_id, max_id)
    }

    /// Replace the range with `[min_id, max_id]`, preserving every stored
    /// `(id, count)` pair. On error the container is unchanged.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IdError::InvalidRange`] | `min_id > max_id` |
    /// | [`IdError::IdCeilingExceeded`] | `max_id` exceeds [`ID_CEILING`] |
    /// | [`IdError::RangeViolation`] | a stored id lies outside the new range |
    pub fn set_id_range(&mut self, min_id: u32, max_id: u32) -> Result<(), IdError> {
        check_range(min_id, max_id)?;
        if let (Some(stored_min), Some(stored_max)) = (self.first(), self.last()) {
            if stored_min < min_id || stored_max > max_id {
                return Err(IdError::RangeViolation {
                    requested_min: min_id,
                    requested_max: max_id,
                    stored_min,
                    stored_max,
                });
            }
        }
        if min_id != self.min_id || max_id != self.max_id {
            self.rebuild(min_id, max_id);
        }
        Ok(())
    }

    /// Grow the upper bound to at least `max_id`. Never shrinks.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::IdCeilingExceeded`] if `max_id` exceeds [`ID_CEILING`].
    pub fn reserve(&mut self, max_id: u32) -> Result<(), IdError> {
        if max_id > self.max_id {
            self.set_max_id(max_id)?;
        }
        Ok(())
    }

    /// Shrink the range to exactly the stored ids. No-op when empty.
    pub fn fit(&mut self) {
        if let (Some(lo), Some(hi)) = (self.first(), self.last()) {
            if lo != self.min_id || hi != self.max_id {
                self.rebuild(lo, hi);
            }
        }
    }

    // --- Set algebra ---

    /// Per-id maximum of counts; the range is the union of both ranges.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = Self::allocate(
            self.min_id.min(other.min_id),
            self.max_id.max(other.max_id),
        );
        for (id, count) in self.entries() {
            out.put((id - out.min_id) as usize, count);
        }
        for (id, count) in other.entries() {
            let slot = (id - out.min_id) as usize;
            if count > out.counts.get_raw(slot) {
                out.put(slot, count);
            }
        }
        out
    }

    /// Per-id minimum of counts over the overlap of both ranges.
    ///
    /// Disjoint ranges yield an empty container over `[self.min_id, self.min_id]`.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let lo = self.min_id.max(other.min_id);
        let hi = self.max_id.min(other.max_id);
        if lo > hi {
            return Self::allocate(self.min_id, self.min_id);
        }
        let mut out = Self::allocate(lo, hi);
        for (id, count) in self.entries().filter(|&(id, _)| (lo..=hi).contains(&id)) {
            let shared = count.min(other.count(id));
            if shared > 0 {
                out.put((id - lo) as usize, shared);
            }
        }
        out
    }

    /// Ids of `self` that are absent from `other`, with their counts intact.
    ///
    /// An id present in `other` is removed entirely, not decremented.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut out = Self::allocate(self.min_id, self.max_id);
        for (id, count) in self.entries() {
            if !other.contains(id) {
                out.put((id - self.min_id) as usize, count);
            }
        }
        out
    }
}

fn check_range(min_id: u32, max_id: u32) -> Result<(), IdError> {
    if min_id > max_id {
        return Err(IdError::InvalidRange { min_id, max_id });
    }
    if max_id > ID_CEILING {
        return Err(IdError::IdCeilingExceeded {
            id: max_id,
            ceiling: ID_CEILING,
        });
    }
    Ok(())
}

impl<const BITS: u8> Default for IdVector<BITS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BITS: u8> PartialEq for IdVector<BITS> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.entries().eq(other.entries())
    }
}

impl<const BITS: u8> Eq for IdVector<BITS> {}

impl<const BITS: u8> fmt::Debug for IdVector<BITS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdVector")
            .field("range", &(self.min_id..=self.max_id))
            .field("len", &self.len)
            .field("entries", &self.entries().collect::<Vec<_>>())
            .finish()
    }
}

/// Ascending cursor over an [`IdVector`], yielding each id `count` times.
#[derive(Clone)]
pub struct Iter<'a, const BITS: u8> {
    ids: &'a IdVector<BITS>,
    next_slot: usize,
    current: usize,
    pending: u8,
    remaining: usize,
}

impl<const BITS: u8> Iterator for Iter<'_, BITS> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.pending == 0 {
            if self.remaining == 0 || self.next_slot >= self.ids.width() {
                return None;
            }
            self.pending = self.ids.counts.get_raw(self.next_slot);
            self.current = self.next_slot;
            self.next_slot += 1;
        }
        self.pending -= 1;
        self.remaining -= 1;
        Some(self.ids.min_id + self.current as u32)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<const BITS: u8> ExactSizeIterator for Iter<'_, BITS> {}

impl<'a, const BITS: u8> IntoIterator for &'a IdVector<BITS> {
    type Item = u32;
    type IntoIter = Iter<'a, BITS>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<const BITS: u8> BitOr for &IdVector<BITS> {
    type Output = IdVector<BITS>;

    fn bitor(self, rhs: Self) -> IdVector<BITS> {
        self.union(rhs)
    }
}

impl<const BITS: u8> BitAnd for &IdVector<BITS> {
    type Output = IdVector<BITS>;

    fn bitand(self, rhs: Self) -> IdVector<BITS> {
        self.intersection(rhs)
    }
}

impl<const BITS: u8> Sub for &IdVector<BITS> {
    type Output = IdVector<BITS>;

    fn sub(self, rhs: Self) -> IdVector<BITS> {
        self.difference(rhs)
    }
}

impl<const BITS: u8> BitOrAssign<&IdVector<BITS>> for IdVector<BITS> {
    fn bitor_assign(&mut self, rhs: &IdVector<BITS>) {
        *self = self.union(rhs);
    }
}

impl<const BITS: u8> BitAndAssign<&IdVector<BITS>> for IdVector<BITS> {
    fn bitand_assign(&mut self, rhs: &IdVector<BITS>) {
        *self = self.intersection(rhs);
    }
}

impl<const BITS: u8> SubAssign<&IdVector<BITS>> for IdVector<BITS> {
    fn sub_assign(&mut self, rhs: &IdVector<BITS>) {
        *self = self.difference(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Ids2 = IdVector<2>;

    fn ids(values: &[u32]) -> Ids2 {
        Ids2::from_ids(values.iter().copied()).unwrap()
    }

    #[test]
    fn fill_saturates_every_id_in_range() {
        let mut v = Ids2::with_range(10, 20).unwrap();
        v.fill();
        assert_eq!(v.len(), 33);
        assert_eq!(v.count(15), 3);
        assert_eq!(v.unique_len(), 11);
    }

    #[test]
    fn push_back_saturates_silently() {
        let mut v = Ids2::new();
        for _ in 0..10 {
            v.push_back(5).unwrap();
        }
        assert_eq!(v.count(5), Ids2::MAX_COUNT);
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn push_back_expands_range_both_ways() {
        let mut v = Ids2::with_range(50, 60).unwrap();
        v.push_back(55).unwrap();
        v.push_back(200).unwrap();
        v.push_back(3).unwrap();
        assert_eq!((v.min_id(), v.max_id()), (3, 200));
        assert_eq!(v.iter().collect::<Vec<_>>(), vec![3, 55, 200]);
    }

    #[test]
    fn push_back_rejects_ids_above_ceiling() {
        let mut v = Ids2::new();
        let err = v.push_back(ID_CEILING + 1).unwrap_err();
        assert!(matches!(err, IdError::IdCeilingExceeded { .. }));
        assert!(v.is_empty());
    }

    #[test]
    fn erase_and_erase_all() {
        let mut v = ids(&[4, 4, 4, 9]);
        assert!(v.erase(4));
        assert_eq!(v.count(4), 2);
        assert!(!v.erase(7));
        assert!(!v.erase(1000));
        assert_eq!(v.erase_all(4), 2);
        assert_eq!(v.len(), 1);
        assert!(!v.contains(4));
    }

    #[test]
    fn narrowing_that_drops_ids_fails_and_leaves_container_unchanged() {
        let mut v = ids(&[10, 12, 12, 40]);
        let before = v.clone();
        let before_range = (v.min_id(), v.max_id());

        let err = v.set_max_id(30).unwrap_err();
        assert_eq!(
            err,
            IdError::RangeViolation {
                requested_min: 0,
                requested_max: 30,
                stored_min: 10,
                stored_max: 40,
            }
        );
        assert!(v.set_min_id(11).is_err());
        assert!(v.set_id_range(20, 10).is_err());
        assert_eq!(v, before);
        assert_eq!((v.min_id(), v.max_id()), before_range);
        assert_eq!(v.counts.as_bytes(), before.counts.as_bytes());
    }

    #[test]
    fn successful_range_change_preserves_pairs() {
        let mut v = ids(&[10, 12, 12, 40]);
        v.set_id_range(10, 40).unwrap();
        assert_eq!((v.min_id(), v.max_id()), (10, 40));
        assert_eq!(v.count(12), 2);
        v.set_id_range(0, 1000).unwrap();
        assert_eq!(v.iter().collect::<Vec<_>>(), vec![10, 12, 12, 40]);
    }

    #[test]
    fn fit_shrinks_to_stored_ids() {
        let mut v = ids(&[30, 31, 31]);
        v.fit();
        assert_eq!((v.min_id(), v.max_id()), (30, 31));
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn range_insert_and_erase() {
        let mut v = Ids2::new();
        v.insert_range(5, 9).unwrap();
        v.insert_range(7, 130).unwrap();
        assert_eq!(v.count(6), 1);
        assert_eq!(v.count(8), 2);
        assert_eq!(v.max_id(), 130);
        assert_eq!(v.erase_range(0, 8), 4);
        assert_eq!(v.count(8), 1);
        assert_eq!(v.count(5), 0);
        assert!(v.insert_range(9, 3).is_err());
    }

    #[test]
    fn first_last_and_pops() {
        let mut v = ids(&[7, 3, 3, 100]);
        assert_eq!(v.first(), Some(3));
        assert_eq!(v.last(), Some(100));
        assert_eq!(v.pop_front(), Some(3));
        assert_eq!(v.pop_back(), Some(100));
        assert_eq!(v.iter().collect::<Vec<_>>(), vec![3, 7]);
        v.clear();
        assert_eq!(v.first(), None);
        assert_eq!(v.pop_back(), None);
    }

    #[test]
    fn nth_follows_repetition_and_checks_bounds() {
        let v = ids(&[2, 2, 5]);
        assert_eq!(v.nth(0).unwrap(), 2);
        assert_eq!(v.nth(1).unwrap(), 2);
        assert_eq!(v.nth(2).unwrap(), 5);
        assert_eq!(v.nth(3).unwrap_err(), IdError::OutOfBounds { index: 3, len: 3 });
    }

    #[test]
    fn iterator_is_restartable_and_exact() {
        let v = ids(&[1, 1, 4]);
        let iter = v.iter();
        assert_eq!(iter.len(), 3);
        let again = iter.clone();
        assert_eq!(iter.collect::<Vec<_>>(), again.collect::<Vec<_>>());
        assert_eq!((&v).into_iter().count(), 3);
    }

    #[test]
    fn union_takes_max_counts_over_union_range() {
        let a = ids(&[1, 1, 5]);
        let mut b = Ids2::with_range(4, 300).unwrap();
        b.push_back(5).unwrap();
        b.push_back(5).unwrap();
        b.push_back(250).unwrap();
        let u = &a | &b;
        assert_eq!((u.min_id(), u.max_id()), (0, 300));
        assert_eq!(u.count(1), 2);
        assert_eq!(u.count(5), 2);
        assert_eq!(u.count(250), 1);
        assert_eq!(u.len(), 5);
    }

    #[test]
    fn intersection_takes_min_counts() {
        let a = ids(&[1, 1, 5, 5, 5]);
        let b = ids(&[1, 5, 5, 9]);
        let i = &a & &b;
        assert_eq!(i.count(1), 1);
        assert_eq!(i.count(5), 2);
        assert_eq!(i.count(9), 0);
        assert_eq!(i.len(), 3);
    }

    #[test]
    fn disjoint_intersection_is_empty() {
        let a = Ids2::with_range(0, 10).unwrap();
        let b = Ids2::with_range(20, 30).unwrap();
        assert!((&a & &b).is_empty());
    }

    #[test]
    fn difference_removes_ids_entirely() {
        let a = ids(&[1, 1, 1, 2, 3]);
        let b = ids(&[1, 3]);
        let d = &a - &b;
        assert_eq!(d.iter().collect::<Vec<_>>(), vec![2]);

        let mut c = a.clone();
        c -= &b;
        assert_eq!(c, d);
    }

    #[test]
    fn compound_assignment_operators() {
        let mut a = ids(&[1]);
        a |= &ids(&[2, 2]);
        assert_eq!(a.len(), 3);
        a &= &ids(&[2]);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn subset_respects_counts() {
        let a = ids(&[1, 2]);
        let b = ids(&[1, 1, 2, 3]);
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        assert!(!ids(&[1, 1, 1]).is_subset_of(&b));
        assert!(Ids2::new().is_subset_of(&a));
    }

    #[test]
    fn equality_and_fingerprint_ignore_range_width() {
        let a = ids(&[3, 3, 8]);
        let mut b = Ids2::with_range(0, 5000).unwrap();
        for id in [8, 3, 3] {
            b.push_back(id).unwrap();
        }
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), ids(&[3, 8]).fingerprint());
    }

    #[test]
    fn wide_counters_hold_large_counts() {
        let mut v = IdVector::<8>::new();
        for _ in 0..300 {
            v.push_back(0).unwrap();
        }
        assert_eq!(v.count(0), 255);
    }
}
