//! Cursor / search.
//!
//! This port's cursor operates against a single in-memory [`Page`] (the
//! leaf the cursor is currently positioned on); walking across leaves via
//! parent refs is the data-handle/tree layer's job and is out of scope for
//! the cursor type itself, which only needs to know how to search and step
//! within one page plus report when it has run off the end.

use crate::btree::page::Page;
use crate::btree::update::{ModifyOp, UpdateKind};
use crate::error::{Error, Result};
use crate::txn::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Unset,
    Positioned,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Less,
    Equal,
    Greater,
}

/// An inclusive/exclusive key bound for `bound(lower|upper, ...)`.
#[derive(Debug, Clone)]
pub struct Bound {
    pub key: Vec<u8>,
    pub inclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    OnDiskSlot(usize),
    InsertListGap(usize),
}

/// A cursor bound to one page: owns a key buffer, a positioning state, and
/// a pointer to the page and slot it is currently on.
pub struct Cursor<'p> {
    page: &'p Page,
    position: Position,
    key: Vec<u8>,
    source: Option<Source>,
    pub lower_bound: Option<Bound>,
    pub upper_bound: Option<Bound>,
}

impl<'p> Cursor<'p> {
    pub fn new(page: &'p Page) -> Self {
        Self {
            page,
            position: Position::Unset,
            key: Vec::new(),
            source: None,
            lower_bound: None,
            upper_bound: None,
        }
    }

    pub fn bound(&mut self, lower: bool, key: Vec<u8>, inclusive: bool) {
        let b = Bound { key, inclusive };
        if lower {
            self.lower_bound = Some(b);
        } else {
            self.upper_bound = Some(b);
        }
    }

    fn within_bounds(&self, key: &[u8]) -> bool {
        if let Some(lb) = &self.lower_bound {
            match (key.cmp(lb.key.as_slice()), lb.inclusive) {
                (std::cmp::Ordering::Less, _) => return false,
                (std::cmp::Ordering::Equal, false) => return false,
                _ => {}
            }
        }
        if let Some(ub) = &self.upper_bound {
            match (key.cmp(ub.key.as_slice()), ub.inclusive) {
                (std::cmp::Ordering::Greater, _) => return false,
                (std::cmp::Ordering::Equal, false) => return false,
                _ => {}
            }
        }
        true
    }

    /// Binary searches the on-disk slots, then falls back to the relevant
    /// insert head's own search on a miss.
    pub fn search(&mut self, key: &[u8]) -> Compare {
        match self.page.search_slot(key) {
            Ok(slot) => {
                self.position = Position::Positioned;
                self.key = key.to_vec();
                self.source = Some(Source::OnDiskSlot(slot));
                Compare::Equal
            }
            Err(gap) => {
                if let Some(list) = self.page.insert_head(gap) {
                    if list.get(key).is_some() {
                        self.position = Position::Positioned;
                        self.key = key.to_vec();
                        self.source = Some(Source::InsertListGap(gap));
                        return Compare::Equal;
                    }
                }
                self.position = Position::Unset;
                Compare::Greater
            }
        }
    }

    /// On miss, returns the nearest key present, searching outward from the
    /// gap the key would occupy.
    pub fn search_near(&mut self, key: &[u8]) -> Option<Compare> {
        if self.search(key) == Compare::Equal {
            return Some(Compare::Equal);
        }
        // Fall back to the nearest on-disk neighbor of the gap.
        let gap = match self.page.search_slot(key) {
            Err(gap) => gap,
            Ok(slot) => slot,
        };
        if let Some(slot) = self.page.leaf_slots().get(gap) {
            self.position = Position::Positioned;
            self.key = slot.key.clone();
            self.source = Some(Source::OnDiskSlot(gap));
            return Some(Compare::Greater);
        }
        if gap > 0 {
            if let Some(slot) = self.page.leaf_slots().get(gap - 1) {
                self.position = Position::Positioned;
                self.key = slot.key.clone();
                self.source = Some(Source::OnDiskSlot(gap - 1));
                return Some(Compare::Less);
            }
        }
        None
    }

    /// Current key, if positioned.
    pub fn key(&self) -> Option<&[u8]> {
        matches!(self.position, Position::Positioned).then_some(self.key.as_slice())
    }

    /// Materializes the currently positioned value according to `txn`'s
    /// visibility rules.
    pub fn value(&self, txn: &Transaction) -> Result<Option<Vec<u8>>> {
        let Some(source) = self.source else {
            return Err(Error::NotFound);
        };
        match source {
            Source::OnDiskSlot(slot) => {
                let base = match &self.page.leaf_slots()[slot].value {
                    crate::btree::cell::Cell::Value(v) => Some(v.clone()),
                    _ => None,
                };
                self.materialize(self.page.update_chain(slot), base, txn)
            }
            Source::InsertListGap(gap) => {
                let list = self.page.insert_head(gap).ok_or(Error::NotFound)?;
                let chain = list.get(&self.key).ok_or(Error::NotFound)?;
                self.materialize_chain(chain, None, txn)
            }
        }
    }

    fn materialize(
        &self,
        chain: Option<&crate::btree::update::UpdateChain>,
        base: Option<Vec<u8>>,
        txn: &Transaction,
    ) -> Result<Option<Vec<u8>>> {
        match chain {
            Some(c) => self.materialize_chain(c, base, txn),
            None => Ok(base),
        }
    }

    fn materialize_chain(
        &self,
        chain: &crate::btree::update::UpdateChain,
        base: Option<Vec<u8>>,
        txn: &Transaction,
    ) -> Result<Option<Vec<u8>>> {
        let visible: Vec<_> = chain.snapshot().into_iter().filter(|u| txn.visible(u)).collect();
        let Some(newest) = visible.first() else {
            return Ok(base);
        };
        match &newest.kind {
            UpdateKind::Standard(v) => Ok(Some(v.clone())),
            UpdateKind::Tombstone => Ok(None),
            UpdateKind::Reserve => Ok(base),
            UpdateKind::Modify(_) => {
                // Walk down through the visible chain collecting the
                // Modify run starting at `newest`. The run's base is the
                // first visible non-Modify value found underneath it (a
                // Standard value, or none for a Tombstone), falling back
                // to the on-disk `base` only if no such update exists.
                let mut modify_run: Vec<&Vec<ModifyOp>> = Vec::new();
                let mut underlying = None;
                let mut found_underlying = false;
                for u in &visible {
                    match &u.kind {
                        UpdateKind::Modify(ops) => modify_run.push(ops),
                        UpdateKind::Standard(v) => {
                            underlying = Some(v.clone());
                            found_underlying = true;
                            break;
                        }
                        UpdateKind::Tombstone => {
                            found_underlying = true;
                            break;
                        }
                        UpdateKind::Reserve => {}
                    }
                }
                let materialize_base = if found_underlying { underlying } else { base };
                let ops: Vec<ModifyOp> = modify_run.into_iter().rev().flatten().cloned().collect();
                let materialized = crate::btree::update::apply_modifies(&materialize_base.unwrap_or_default(), &ops)?;
                Ok(Some(materialized))
            }
        }
    }

    /// Advances to the next key, stepping across the insert list covering
    /// the current gap before falling through to the next on-disk slot,
    /// honoring any configured upper bound.
    pub fn next(&mut self) -> bool {
        let Some(source) = self.source else { return false };
        let next_candidate = match source {
            Source::OnDiskSlot(slot) => self.first_after_gap(slot + 1, slot + 1),
            Source::InsertListGap(gap) => self.first_after_gap(gap, gap),
        };
        match next_candidate {
            Some((key, source)) => {
                if !self.within_bounds(&key) {
                    self.position = Position::End;
                    return false;
                }
                self.key = key;
                self.source = Some(source);
                self.position = Position::Positioned;
                true
            }
            None => {
                self.position = Position::End;
                false
            }
        }
    }

    fn first_after_gap(&self, gap: usize, on_disk_slot: usize) -> Option<(Vec<u8>, Source)> {
        if let Some(list) = self.page.insert_head(gap) {
            if let Some((key, _)) = list.iter().next() {
                return Some((key.to_vec(), Source::InsertListGap(gap)));
            }
        }
        self.page
            .leaf_slots()
            .get(on_disk_slot)
            .map(|s| (s.key.clone(), Source::OnDiskSlot(on_disk_slot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::cell::Cell;
    use crate::btree::page::LeafSlot;
    use crate::txn::transaction::{Isolation, TransactionManager};

    fn page() -> Page {
        Page::new_leaf(vec![
            LeafSlot { key: b"b".to_vec(), value: Cell::Value(b"2".to_vec()) },
            LeafSlot { key: b"d".to_vec(), value: Cell::Value(b"4".to_vec()) },
        ])
    }

    #[test]
    fn search_exact_match() {
        let page = page();
        let mut cursor = Cursor::new(&page);
        assert_eq!(cursor.search(b"d"), Compare::Equal);
        assert_eq!(cursor.key(), Some(b"d".as_slice()));
    }

    #[test]
    fn search_near_returns_nearest_on_miss() {
        let page = page();
        let mut cursor = Cursor::new(&page);
        let result = cursor.search_near(b"c");
        assert_eq!(result, Some(Compare::Greater));
        assert_eq!(cursor.key(), Some(b"d".as_slice()));
    }

    #[test]
    fn value_reads_plain_on_disk_cell() {
        let page = page();
        let mgr = TransactionManager::new();
        let txn = mgr.begin(Isolation::Snapshot);
        let mut cursor = Cursor::new(&page);
        cursor.search(b"b");
        assert_eq!(cursor.value(&txn).unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn next_walks_across_slots() {
        let page = page();
        let mut cursor = Cursor::new(&page);
        cursor.search(b"b");
        assert!(cursor.next());
        assert_eq!(cursor.key(), Some(b"d".as_slice()));
        assert!(!cursor.next());
    }

    #[test]
    fn bound_stops_iteration() {
        let page = page();
        let mut cursor = Cursor::new(&page);
        cursor.bound(false, b"b".to_vec(), true);
        cursor.search(b"b");
        assert!(!cursor.next());
    }
}
