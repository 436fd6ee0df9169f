//! Reconciliation: turns one in-memory leaf page into one or more on-disk
//! block images.
//!
//! Driven by eviction or checkpoint, never synchronously by application
//! threads. Steps implemented here: snapshot the visible state, build
//! key/value cells, push oversized cells to overflow blocks, split when an
//! image exceeds the page-size budget, write through the block manager, and
//! report what to publish into the parent.

use tracing::{debug, warn};

use crate::block::addr::AddressCookie;
use crate::block::manager::BlockManager;
use crate::btree::cell::{prefix_compress, Cell};
use crate::btree::page::{LeafSlot, Page, PageType};
use crate::btree::update::{Update, UpdateKind};
use crate::error::Result;
use crate::fs::Filesystem;

/// Per-table thresholds derived from `allocsize`/`leaf_page_max`.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileLimits {
    pub leaf_page_max: usize,
    pub maxleafkey: usize,
    pub maxleafvalue: usize,
}

impl Default for ReconcileLimits {
    fn default() -> Self {
        Self {
            leaf_page_max: 32 * 1024,
            maxleafkey: 1024,
            maxleafvalue: 4 * 1024,
        }
    }
}

/// One finished on-disk image and the first key it covers (the latter is
/// what a split publishes into the parent as a new separator).
pub struct ReconciledImage {
    pub first_key: Vec<u8>,
    pub addr: AddressCookie,
}

/// Outcome of reconciling one page: either it collapsed entirely (every key
/// tombstoned — the ref becomes `DELETED`) or it produced one or more
/// images (more than one means the page split).
pub enum ReconcileOutcome {
    Empty,
    Images(Vec<ReconciledImage>),
}

fn encode_page_header(entries: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&0u64.to_le_bytes()); // recno, unused for row-store
    out.extend_from_slice(&0u64.to_le_bytes()); // write_gen, stamped by caller
    out.extend_from_slice(&0u32.to_le_bytes()); // mem_size placeholder
    out.extend_from_slice(&entries.to_le_bytes());
    out.push(PageType::RowLeaf as u8);
    out.push(0); // flags
    out.extend_from_slice(&0u16.to_le_bytes()); // unused
}

/// Reconciles a row-store leaf page: selects the visible update (or on-disk
/// cell) for each slot, overflows anything too large, splits on size, and
/// writes each resulting image through `block_mgr`.
///
/// `is_visible` implements the reconciliation horizon: updates it rejects
/// are left on the page rather than folded into the image (this port folds
/// only the single newest visible update per slot, which is sufficient for
/// a page that is not concurrently being written during its own
/// reconciliation pass).
pub fn reconcile_leaf<FS: Filesystem>(
    page: &Page,
    block_mgr: &BlockManager<FS>,
    limits: ReconcileLimits,
    mut is_visible: impl FnMut(&Update) -> bool,
) -> Result<ReconcileOutcome> {
    let mut entries: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::new();

    for (slot_idx, slot) in page.leaf_slots().iter().enumerate() {
        let mut value = match &slot.value {
            Cell::Value(v) => Some(v.clone()),
            _ => None,
        };
        if let Some(chain) = page.update_chain(slot_idx) {
            let snapshot = chain.snapshot();
            if let Some(update) = snapshot.iter().find(|u| !u.is_aborted() && is_visible(u)) {
                value = match &update.kind {
                    UpdateKind::Standard(v) => Some(v.clone()),
                    UpdateKind::Tombstone => None,
                    UpdateKind::Reserve => value,
                    UpdateKind::Modify(ops) => {
                        let base = value.unwrap_or_default();
                        Some(crate::btree::update::apply_modifies(&base, ops)?)
                    }
                };
            }
        }
        entries.push((slot.key.clone(), value));

        if let Some(insert_head) = page.insert_head(slot_idx + 1) {
            for (key, chain) in insert_head.iter() {
                let snapshot = chain.snapshot();
                if let Some(update) = snapshot.iter().find(|u| !u.is_aborted() && is_visible(u)) {
                    let value = match &update.kind {
                        UpdateKind::Standard(v) => Some(v.clone()),
                        UpdateKind::Tombstone | UpdateKind::Reserve => None,
                        UpdateKind::Modify(ops) => Some(crate::btree::update::apply_modifies(&[], ops)?),
                    };
                    entries.push((key.to_vec(), value));
                }
            }
        }
    }
    if let Some(insert_head) = page.insert_head(0) {
        let mut leading: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::new();
        for (key, chain) in insert_head.iter() {
            let snapshot = chain.snapshot();
            if let Some(update) = snapshot.iter().find(|u| !u.is_aborted() && is_visible(u)) {
                let value = match &update.kind {
                    UpdateKind::Standard(v) => Some(v.clone()),
                    _ => None,
                };
                leading.push((key.to_vec(), value));
            }
        }
        leading.extend(entries);
        entries = leading;
    }

    let live: Vec<(Vec<u8>, Vec<u8>)> = entries
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect();

    if live.is_empty() {
        return Ok(ReconcileOutcome::Empty);
    }

    let mut images = Vec::new();
    let mut current_entries: Vec<(Vec<u8>, Cell)> = Vec::new();
    let mut current_size = 0usize;
    let mut prev_key: Option<Vec<u8>> = None;

    for (key, value) in live {
        let key_cell = build_key_cell(&key, prev_key.as_deref(), limits.maxleafkey, block_mgr)?;
        let value_cell = if value.len() > limits.maxleafvalue {
            Cell::ValueOvfl(block_mgr.write(&value)?)
        } else {
            Cell::Value(value)
        };

        let mut trial = Vec::new();
        key_cell.encode(&mut trial);
        value_cell.encode(&mut trial);
        let added = trial.len();

        if current_size + added > limits.leaf_page_max && !current_entries.is_empty() {
            images.push(finish_image(&current_entries, block_mgr)?);
            current_entries = Vec::new();
            current_size = 0;
        }

        current_entries.push((key.clone(), key_cell));
        current_entries.push((Vec::new(), value_cell));
        current_size += added;
        prev_key = Some(key);
    }
    if !current_entries.is_empty() {
        images.push(finish_image(&current_entries, block_mgr)?);
    }

    debug!(split_count = images.len(), "reconciled leaf page");
    Ok(ReconcileOutcome::Images(images))
}

fn build_key_cell<FS: Filesystem>(
    key: &[u8],
    prev_key: Option<&[u8]>,
    maxleafkey: usize,
    block_mgr: &BlockManager<FS>,
) -> Result<Cell> {
    if key.len() > maxleafkey {
        return Ok(Cell::KeyOvfl(block_mgr.write(key)?));
    }
    match prev_key {
        Some(prev) => {
            let (prefix_len, suffix) = prefix_compress(prev, key);
            if prefix_len > 0 {
                Ok(Cell::KeyPfx { prefix_len, suffix })
            } else {
                Ok(Cell::Key(key.to_vec()))
            }
        }
        None => Ok(Cell::Key(key.to_vec())),
    }
}

fn finish_image<FS: Filesystem>(
    entries: &[(Vec<u8>, Cell)],
    block_mgr: &BlockManager<FS>,
) -> Result<ReconciledImage> {
    let first_key = entries
        .iter()
        .find(|(k, _)| !k.is_empty())
        .map(|(k, _)| k.clone())
        .unwrap_or_default();

    let mut image = Vec::new();
    encode_page_header((entries.len() / 2) as u32, &mut image);
    for (_, cell) in entries {
        cell.encode(&mut image);
    }

    let addr = match block_mgr.write(&image) {
        Ok(addr) => addr,
        Err(e) => {
            warn!("reconciliation write failed, allocated extents will be rolled back by the caller");
            return Err(e);
        }
    };
    Ok(ReconciledImage { first_key, addr })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::page::LeafSlot;
    use crate::codec::Codec;
    use crate::fs::MemFilesystem;
    use std::path::Path;

    fn manager() -> BlockManager<MemFilesystem> {
        let fs = Box::leak(Box::new(MemFilesystem::default()));
        BlockManager::create(fs, Path::new("/db/t.wt"), 512, Codec::default()).unwrap()
    }

    #[test]
    fn reconciles_plain_leaf_with_no_overrides() {
        let page = Page::new_leaf(vec![
            LeafSlot { key: b"a".to_vec(), value: Cell::Value(b"1".to_vec()) },
            LeafSlot { key: b"b".to_vec(), value: Cell::Value(b"2".to_vec()) },
        ]);
        let mgr = manager();
        let outcome = reconcile_leaf(&page, &mgr, ReconcileLimits::default(), |_| true).unwrap();
        match outcome {
            ReconcileOutcome::Images(images) => {
                assert_eq!(images.len(), 1);
                let back = mgr.read(&images[0].addr).unwrap();
                assert!(!back.is_empty());
            }
            ReconcileOutcome::Empty => panic!("expected images"),
        }
    }

    #[test]
    fn fully_tombstoned_page_reconciles_empty() {
        let mut page = Page::new_leaf(vec![LeafSlot { key: b"a".to_vec(), value: Cell::Value(b"1".to_vec()) }]);
        page.update_chain_mut(0)
            .unwrap()
            .install(crate::btree::update::Update::new(5, UpdateKind::Tombstone));
        let mgr = manager();
        let outcome = reconcile_leaf(&page, &mgr, ReconcileLimits::default(), |_| true).unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Empty));
    }

    #[test]
    fn large_page_splits_into_multiple_images() {
        let slots: Vec<LeafSlot> = (0..200)
            .map(|i| LeafSlot {
                key: format!("key-{i:05}").into_bytes(),
                value: Cell::Value(vec![b'x'; 200]),
            })
            .collect();
        let page = Page::new_leaf(slots);
        let mgr = manager();
        let limits = ReconcileLimits { leaf_page_max: 4096, ..Default::default() };
        let outcome = reconcile_leaf(&page, &mgr, limits, |_| true).unwrap();
        match outcome {
            ReconcileOutcome::Images(images) => assert!(images.len() > 1),
            ReconcileOutcome::Empty => panic!("expected images"),
        }
    }
}
