//! In-memory free-extent list.
//!
//! WiredTiger keeps two skip lists over shared nodes (one ordered by offset
//! for coalescing, one by size for best/first-fit allocation) so neither
//! index needs a separate allocation. This port keeps the same *interface*
//! and invariants but backs them with two [`std::collections::BTreeMap`]s
//! instead of a hand-rolled shared-node skip list: this crate denies
//! `unsafe_code`, and a pointer-shared skip list cannot be expressed safely
//! without an arena of indices that buys nothing a `BTreeMap` doesn't
//! already give for free.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A free byte range `[offset, offset + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub size: u64,
}

/// Allocation strategy toggle: a tunable toggle to prefer first-fit for
/// compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStrategy {
    BestFit,
    FirstFit,
}

/// The free-extent list for one file.
#[derive(Debug, Default)]
pub struct ExtentList {
    /// offset -> size, for neighbor coalescing.
    by_offset: BTreeMap<u64, u64>,
    /// (size, offset) -> (), for fit-based allocation.
    by_size: BTreeMap<(u64, u64), ()>,
}

impl ExtentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_offset.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_offset.len()
    }

    /// Total free bytes tracked by the list.
    pub fn total_free(&self) -> u64 {
        self.by_offset.values().sum()
    }

    fn insert_raw(&mut self, offset: u64, size: u64) {
        self.by_offset.insert(offset, size);
        self.by_size.insert((size, offset), ());
    }

    fn remove_raw(&mut self, offset: u64, size: u64) {
        self.by_offset.remove(&offset);
        self.by_size.remove(&(size, offset));
    }

    /// Frees `[offset, offset+size)`, merging with an abutting left and/or
    /// right neighbor.
    pub fn insert(&mut self, offset: u64, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let mut new_offset = offset;
        let mut new_size = size;

        // Left neighbor: the extent (if any) ending exactly at `new_offset`.
        if let Some((&left_off, &left_size)) = self.by_offset.range(..new_offset).next_back() {
            if left_off + left_size == new_offset {
                self.remove_raw(left_off, left_size);
                new_offset = left_off;
                new_size += left_size;
            }
        }

        // Right neighbor: the extent (if any) starting exactly at the new end.
        let new_end = new_offset + new_size;
        if let Some((&right_off, &right_size)) = self.by_offset.range(new_end..).next() {
            if right_off == new_end {
                self.remove_raw(right_off, right_size);
                new_size += right_size;
            }
        }

        self.assert_no_overlap(new_offset, new_size)?;
        self.insert_raw(new_offset, new_size);
        Ok(())
    }

    fn assert_no_overlap(&self, offset: u64, size: u64) -> Result<()> {
        let end = offset + size;
        if let Some((&left_off, &left_size)) = self.by_offset.range(..offset).next_back() {
            if left_off + left_size > offset {
                return Err(Error::CorruptFile("extent list: overlapping left neighbor".into()));
            }
        }
        if let Some((&right_off, _)) = self.by_offset.range(offset..).next() {
            if right_off < end {
                return Err(Error::CorruptFile("extent list: overlapping right neighbor".into()));
            }
        }
        Ok(())
    }

    /// Allocates `size` bytes, splitting the chosen extent if it is larger.
    /// Returns the offset of the allocated range, or `None` if no extent fits.
    pub fn alloc(&mut self, size: u64, strategy: AllocStrategy) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let candidate = match strategy {
            AllocStrategy::BestFit => self.by_size.range((size, 0)..).next().map(|(&k, _)| k),
            AllocStrategy::FirstFit => self
                .by_size
                .range((size, 0)..)
                .map(|(&k, _)| k)
                .min_by_key(|&(_, off)| off),
        }?;
        let (found_size, found_offset) = candidate;
        self.remove_raw(found_offset, found_size);
        if found_size > size {
            self.insert_raw(found_offset + size, found_size - size);
        }
        Some(found_offset)
    }

    /// Removes the overlap between `[offset, offset+size)` and any tracked
    /// extents, used during salvage when a range turns out to be live.
    pub fn remove_overlap(&mut self, offset: u64, size: u64) {
        let end = offset + size;
        let overlapping: Vec<(u64, u64)> = self
            .by_offset
            .range(..end)
            .filter(|&(&o, &s)| o + s > offset)
            .map(|(&o, &s)| (o, s))
            .collect();
        for (o, s) in overlapping {
            self.remove_raw(o, s);
            if o < offset {
                self.insert_raw(o, offset - o);
            }
            let tail_start = o + s;
            if tail_start > end {
                self.insert_raw(end, tail_start - end);
            }
        }
    }

    /// Serializes the list for persistence as its own "avail" block.
    pub fn extlist_write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * 16 + 8);
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for (&offset, &size) in &self.by_offset {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }
        out
    }

    /// Reverses [`ExtentList::extlist_write`] (`extlist_read`).
    pub fn extlist_read(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(Error::CorruptFile("extent list block truncated".into()));
        }
        let count = u64::from_le_bytes(buf[0..8].try_into().unwrap()) as usize;
        let mut list = ExtentList::new();
        let mut pos = 8;
        for _ in 0..count {
            if pos + 16 > buf.len() {
                return Err(Error::CorruptFile("extent list block truncated".into()));
            }
            let offset = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
            let size = u64::from_le_bytes(buf[pos + 8..pos + 16].try_into().unwrap());
            pos += 16;
            list.insert_raw(offset, size);
        }
        Ok(list)
    }

    /// Checks two invariants: no overlapping/abutting extents, and the two
    /// indexes agree on membership.
    #[cfg(any(test, feature = "diagnostic"))]
    pub fn check_invariants(&self) -> Result<()> {
        let mut prev_end: Option<u64> = None;
        for (&offset, &size) in &self.by_offset {
            if let Some(end) = prev_end {
                if offset <= end {
                    return Err(Error::CorruptFile("extent list: adjacent/overlapping entries not merged".into()));
                }
            }
            prev_end = Some(offset + size);
        }
        if self.by_offset.len() != self.by_size.len() {
            return Err(Error::CorruptFile("extent list: index size mismatch".into()));
        }
        for (&offset, &size) in &self.by_offset {
            if !self.by_size.contains_key(&(size, offset)) {
                return Err(Error::CorruptFile("extent list: size index missing entry".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn merges_adjacent_extents() {
        let mut list = ExtentList::new();
        list.insert(0, 100).unwrap();
        list.insert(100, 50).unwrap();
        list.check_invariants().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.total_free(), 150);
    }

    #[test]
    fn merges_both_sides() {
        let mut list = ExtentList::new();
        list.insert(0, 100).unwrap();
        list.insert(200, 100).unwrap();
        list.insert(100, 100).unwrap();
        list.check_invariants().unwrap();
        assert_eq!(list.len(), 1);
        let (&off, &size) = list.by_offset.iter().next().unwrap();
        assert_eq!((off, size), (0, 300));
    }

    #[test]
    fn alloc_splits_larger_extent() {
        let mut list = ExtentList::new();
        list.insert(0, 1000).unwrap();
        let off = list.alloc(100, AllocStrategy::BestFit).unwrap();
        assert_eq!(off, 0);
        list.check_invariants().unwrap();
        assert_eq!(list.total_free(), 900);
    }

    #[test]
    fn alloc_returns_none_when_nothing_fits() {
        let mut list = ExtentList::new();
        list.insert(0, 10).unwrap();
        assert_eq!(list.alloc(100, AllocStrategy::BestFit), None);
    }

    #[test]
    fn extlist_roundtrip() {
        let mut list = ExtentList::new();
        list.insert(0, 100).unwrap();
        list.insert(500, 200).unwrap();
        let bytes = list.extlist_write();
        let back = ExtentList::extlist_read(&bytes).unwrap();
        assert_eq!(back.total_free(), list.total_free());
        assert_eq!(back.len(), list.len());
    }

    #[test]
    fn remove_overlap_splits_around_live_range() {
        let mut list = ExtentList::new();
        list.insert(0, 1000).unwrap();
        list.remove_overlap(400, 100);
        list.check_invariants().unwrap();
        assert_eq!(list.total_free(), 900);
        assert!(list.by_offset.contains_key(&0));
        assert!(list.by_offset.contains_key(&500));
    }

    proptest! {
        #[test]
        fn random_free_sequences_keep_invariants(
            ops in proptest::collection::vec((0u64..20, 1u64..5), 1..30)
        ) {
            let mut list = ExtentList::new();
            for (slot, size) in ops {
                let offset = slot * 5;
                // insert() tolerates re-inserting overlapping ranges by only
                // being called with disjoint ranges in this generator: scale
                // slots so ranges [slot*5, slot*5+size) rarely collide, and
                // skip when they would (checked via remove_overlap first).
                list.remove_overlap(offset, size);
                list.insert(offset, size).unwrap();
                list.check_invariants().unwrap();
            }
        }
    }
}
