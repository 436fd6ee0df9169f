//! Per-key update chains.
//!
//! A chain is a LIFO singly-linked list of [`Update`] nodes, newest first.
//! Installs are append-to-head; this port uses a lock (one per page, held by
//! the page's caller) in place of the lock-free CAS the concurrency model
//! describes, since this crate targets a single-process embedding and a
//! `parking_lot::Mutex` around the page's slot array already serializes
//! writers at a coarser grain.
//!
//! Each node is wrapped in an `Arc<Mutex<Update>>` rather than stored inline,
//! so `install` can hand the caller a handle that reaches back into the
//! chain: a transaction's op log holds onto that handle and stamps the
//! update's commit/durable timestamps through it at commit time, without
//! `Transaction` needing to borrow or own any page memory.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::txn::timestamp::Timestamp;

pub const ABORTED_TXN_ID: u64 = u64::MAX;

/// What an update represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// A full replacement value.
    Standard(Vec<u8>),
    /// A tombstone: the key is deleted as of this update.
    Tombstone,
    /// A byte-range patch relative to the value visible before this update,
    /// materialized lazily on read.
    Modify(Vec<ModifyOp>),
    /// A no-op write-intent, installed by `reserve` purely for conflict
    /// detection at commit.
    Reserve,
}

/// One `{offset, size, new_bytes}` patch op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyOp {
    pub offset: usize,
    pub size: usize,
    pub new_bytes: Vec<u8>,
}

/// One node in a key's update chain.
#[derive(Debug, Clone)]
pub struct Update {
    pub txnid: u64,
    pub start_ts: Timestamp,
    pub durable_ts: Timestamp,
    /// Set once a tombstone with a later update makes this value's visible
    /// range bounded above; `None` means still open-ended.
    pub stop_ts: Option<Timestamp>,
    pub kind: UpdateKind,
}

impl Update {
    pub fn new(txnid: u64, kind: UpdateKind) -> Self {
        Self {
            txnid,
            start_ts: Timestamp::NONE,
            durable_ts: Timestamp::NONE,
            stop_ts: None,
            kind,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.txnid == ABORTED_TXN_ID
    }
}

/// The update chain for one key slot: newest update first.
#[derive(Debug, Default)]
pub struct UpdateChain {
    head: Vec<Arc<Mutex<Update>>>,
}

impl UpdateChain {
    pub fn new() -> Self {
        Self { head: Vec::new() }
    }

    /// Installs `update` as the new head, returning a handle the caller can
    /// use to stamp this specific update later (e.g. at transaction commit)
    /// without holding any borrow into the chain itself.
    pub fn install(&mut self, update: Update) -> Arc<Mutex<Update>> {
        let handle = Arc::new(Mutex::new(update));
        self.head.push(Arc::clone(&handle));
        handle
    }

    /// Newest-first snapshot of every update currently on the chain.
    pub fn snapshot(&self) -> Vec<Update> {
        self.head.iter().rev().map(|u| u.lock().clone()).collect()
    }

    /// Applies `f` to every update in the chain, newest first, used by
    /// rollback-to-stable to abort updates in place.
    pub fn for_each_mut_newest_first(&mut self, mut f: impl FnMut(&mut Update)) {
        for u in self.head.iter().rev() {
            f(&mut u.lock());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    /// The most recently installed update, regardless of visibility.
    pub fn head(&self) -> Option<Update> {
        self.head.last().map(|u| u.lock().clone())
    }

    /// Marks every update in the chain aborted.
    pub fn abort_all(&mut self) {
        for u in &self.head {
            u.lock().txnid = ABORTED_TXN_ID;
        }
    }
}

/// Materializes a base value against a sequence of `Modify` patches, newest
/// patch applied last in the sequence passed here (callers collect patches
/// oldest-to-newest before calling this).
pub fn apply_modifies(base: &[u8], ops: &[ModifyOp]) -> Result<Vec<u8>> {
    let mut out = base.to_vec();
    for op in ops {
        let end = op.offset + op.size;
        if op.offset > out.len() {
            return Err(Error::CorruptFile("modify offset past end of value".into()));
        }
        let tail = if end < out.len() { out.split_off(end) } else { Vec::new() };
        out.truncate(op.offset);
        out.extend_from_slice(&op.new_bytes);
        out.extend_from_slice(&tail);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_lifo() {
        let mut chain = UpdateChain::new();
        chain.install(Update::new(1, UpdateKind::Standard(b"a".to_vec())));
        chain.install(Update::new(2, UpdateKind::Standard(b"b".to_vec())));
        let newest = chain.head().unwrap();
        assert_eq!(newest.txnid, 2);
        let order: Vec<u64> = chain.snapshot().iter().map(|u| u.txnid).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn abort_all_marks_every_update() {
        let mut chain = UpdateChain::new();
        chain.install(Update::new(1, UpdateKind::Standard(b"a".to_vec())));
        chain.install(Update::new(2, UpdateKind::Tombstone));
        chain.abort_all();
        assert!(chain.snapshot().iter().all(|u| u.is_aborted()));
    }

    #[test]
    fn apply_modifies_patches_in_order() {
        let base = b"hello world".to_vec();
        let ops = vec![
            ModifyOp { offset: 6, size: 5, new_bytes: b"there".to_vec() },
        ];
        let out = apply_modifies(&base, &ops).unwrap();
        assert_eq!(out, b"hello there");
    }

    #[test]
    fn apply_modifies_can_grow_value() {
        let base = b"abc".to_vec();
        let ops = vec![ModifyOp { offset: 3, size: 0, new_bytes: b"def".to_vec() }];
        let out = apply_modifies(&base, &ops).unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn apply_modifies_rejects_out_of_range_offset() {
        let base = b"abc".to_vec();
        let ops = vec![ModifyOp { offset: 10, size: 0, new_bytes: vec![] }];
        assert!(apply_modifies(&base, &ops).is_err());
    }
}
