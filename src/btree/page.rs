//! In-memory page representation.
//!
//! A row-store leaf page carries a sorted array of on-disk keys and two
//! auxiliary structures for runtime mutation: insert heads (one skip list
//! per gap between on-disk keys, plus a leading and trailing one) and an
//! update array (one update chain per on-disk key).

use crate::block::addr::AddressCookie;
use crate::btree::cell::Cell;
use crate::btree::refs::Ref;
use crate::btree::skiplist::InsertList;
use crate::btree::update::UpdateChain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    RowInt,
    RowLeaf,
    ColFix,
    ColVar,
    ColInt,
    Ovfl,
}

/// Header carried inside a page's on-disk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub recno: u64,
    pub write_gen: u64,
    pub mem_size: u32,
    pub entries: u32,
    pub page_type: PageType,
}

/// One on-disk key/value slot of a row-store leaf, before any runtime
/// mutation is applied.
pub struct LeafSlot {
    pub key: Vec<u8>,
    pub value: Cell,
}

/// One child slot of a row-store internal page: its separator key and the
/// `Ref` naming the child.
pub struct InternalSlot {
    pub key: Vec<u8>,
    pub child: Ref,
}

enum PageBody {
    Leaf {
        slots: Vec<LeafSlot>,
        /// `updates[i]` is the chain overriding `slots[i]`.
        updates: Vec<UpdateChain>,
        /// `inserts[i]` holds keys between `slots[i-1]` and `slots[i]`;
        /// `inserts[0]` is the leading head, `inserts[slots.len()]` trailing.
        inserts: Vec<InsertList>,
    },
    Internal {
        slots: Vec<InternalSlot>,
    },
}

/// The in-memory image of one B-tree node.
pub struct Page {
    pub page_type: PageType,
    pub write_gen: u64,
    pub dirty: bool,
    /// Set when this page's on-disk image is known (it was read from disk,
    /// or reconciled and not yet re-dirtied).
    pub disk_addr: Option<AddressCookie>,
    body: PageBody,
}

impl Page {
    pub fn new_leaf(slots: Vec<LeafSlot>) -> Self {
        let inserts = (0..=slots.len()).map(|_| InsertList::new()).collect();
        let updates = slots.iter().map(|_| UpdateChain::new()).collect();
        Self {
            page_type: PageType::RowLeaf,
            write_gen: 0,
            dirty: false,
            disk_addr: None,
            body: PageBody::Leaf { slots, updates, inserts },
        }
    }

    pub fn new_internal(slots: Vec<InternalSlot>) -> Self {
        Self {
            page_type: PageType::RowInt,
            write_gen: 0,
            dirty: false,
            disk_addr: None,
            body: PageBody::Internal { slots },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, PageBody::Leaf { .. })
    }

    pub fn leaf_slots(&self) -> &[LeafSlot] {
        match &self.body {
            PageBody::Leaf { slots, .. } => slots,
            PageBody::Internal { .. } => &[],
        }
    }

    pub fn internal_slots(&self) -> &[InternalSlot] {
        match &self.body {
            PageBody::Internal { slots } => slots,
            PageBody::Leaf { .. } => &[],
        }
    }

    pub fn internal_slots_mut(&mut self) -> &mut [InternalSlot] {
        match &mut self.body {
            PageBody::Internal { slots } => slots,
            PageBody::Leaf { .. } => &mut [],
        }
    }

    /// Binary search over on-disk keys for a row-store leaf. Returns
    /// `Ok(i)` for an exact match at slot `i`, or `Err(i)` for the gap index
    /// (the insert head a new key between neighbors would live in).
    pub fn search_slot(&self, key: &[u8]) -> Result<usize, usize> {
        let slots = self.leaf_slots();
        slots.binary_search_by(|slot| slot.key.as_slice().cmp(key))
    }

    /// Binary search over an internal page's separator keys, returning the
    /// child slot index a descent for `key` should follow.
    pub fn search_child(&self, key: &[u8]) -> usize {
        let slots = self.internal_slots();
        match slots.binary_search_by(|slot| slot.key.as_slice().cmp(key)) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    pub fn update_chain(&self, slot: usize) -> Option<&UpdateChain> {
        match &self.body {
            PageBody::Leaf { updates, .. } => updates.get(slot),
            PageBody::Internal { .. } => None,
        }
    }

    pub fn update_chain_mut(&mut self, slot: usize) -> Option<&mut UpdateChain> {
        match &mut self.body {
            PageBody::Leaf { updates, .. } => updates.get_mut(slot),
            PageBody::Internal { .. } => None,
        }
    }

    pub fn insert_head(&self, gap: usize) -> Option<&InsertList> {
        match &self.body {
            PageBody::Leaf { inserts, .. } => inserts.get(gap),
            PageBody::Internal { .. } => None,
        }
    }

    pub fn insert_head_mut(&mut self, gap: usize) -> Option<&mut InsertList> {
        match &mut self.body {
            PageBody::Leaf { inserts, .. } => inserts.get_mut(gap),
            PageBody::Internal { .. } => None,
        }
    }

    /// Total number of on-disk slots (row-store leaves) or children
    /// (internal pages).
    pub fn len(&self) -> usize {
        match &self.body {
            PageBody::Leaf { slots, .. } => slots.len(),
            PageBody::Internal { slots } => slots.len(),
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.disk_addr = None;
    }

    /// Approximate in-memory footprint, used by the cache's accounting;
    /// intentionally coarse, counting only key/value bytes.
    pub fn mem_size(&self) -> usize {
        match &self.body {
            PageBody::Leaf { slots, .. } => slots
                .iter()
                .map(|s| s.key.len() + cell_payload_len(&s.value))
                .sum(),
            PageBody::Internal { slots } => slots.iter().map(|s| s.key.len() + 32).sum(),
        }
    }
}

fn cell_payload_len(cell: &Cell) -> usize {
    match cell {
        Cell::Value(v) => v.len(),
        Cell::Key(v) | Cell::KeyShort(v) => v.len(),
        Cell::KeyPfx { suffix, .. } => suffix.len(),
        _ => 16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::update::{Update, UpdateKind};

    fn leaf() -> Page {
        Page::new_leaf(vec![
            LeafSlot { key: b"b".to_vec(), value: Cell::Value(b"2".to_vec()) },
            LeafSlot { key: b"d".to_vec(), value: Cell::Value(b"4".to_vec()) },
            LeafSlot { key: b"f".to_vec(), value: Cell::Value(b"6".to_vec()) },
        ])
    }

    #[test]
    fn search_slot_finds_exact_and_gap() {
        let page = leaf();
        assert_eq!(page.search_slot(b"d"), Ok(1));
        assert_eq!(page.search_slot(b"c"), Err(1));
        assert_eq!(page.search_slot(b"a"), Err(0));
        assert_eq!(page.search_slot(b"z"), Err(3));
    }

    #[test]
    fn insert_head_count_is_slots_plus_one() {
        let page = leaf();
        assert!(page.insert_head(0).is_some());
        assert!(page.insert_head(3).is_some());
        assert!(page.insert_head(4).is_none());
    }

    #[test]
    fn update_chain_install_marks_visible_override() {
        let mut page = leaf();
        let chain = page.update_chain_mut(1).unwrap();
        chain.install(Update::new(99, UpdateKind::Standard(b"new-d".to_vec())));
        assert_eq!(page.update_chain(1).unwrap().head().unwrap().txnid, 99);
    }

    #[test]
    fn search_child_picks_floor_separator() {
        let page = Page::new_internal(vec![
            InternalSlot { key: b"a".to_vec(), child: Ref::on_disk(AddressCookie::NONE) },
            InternalSlot { key: b"m".to_vec(), child: Ref::on_disk(AddressCookie::NONE) },
        ]);
        assert_eq!(page.search_child(b"b"), 0);
        assert_eq!(page.search_child(b"z"), 1);
        assert_eq!(page.search_child(b"a"), 0);
    }
}
