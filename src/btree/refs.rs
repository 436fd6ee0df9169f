//! Page reference state machine.
//!
//! A `Ref` is a parent's slot pointing at a child: either an on-disk address
//! the child hasn't been read into cache yet (`Disk`), a resident in-memory
//! page (`Mem`), transiently locked by a reconciliation/eviction pass
//! (`Locked`), logically absent (`Deleted`, possibly a fast-truncate), mid
//! reconciliation-split (`Split`), or parked pending free (`Limbo`).

use crate::block::addr::AddressCookie;
use crate::txn::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefState {
    Disk,
    Mem,
    Locked,
    Deleted,
    Split,
    Limbo,
}

/// Recorded on a `Deleted` ref created by a fast truncate, so a concurrent
/// reader whose snapshot predates the truncate can instantiate the subtree
/// back to `Mem` instead of seeing it as empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDel {
    pub txnid: u64,
    pub timestamp: Timestamp,
}

/// One parent-to-child pointer.
#[derive(Debug, Clone)]
pub struct Ref {
    pub state: RefState,
    pub addr: AddressCookie,
    pub page_del: Option<PageDel>,
}

impl Ref {
    pub fn on_disk(addr: AddressCookie) -> Self {
        Self {
            state: RefState::Disk,
            addr,
            page_del: None,
        }
    }

    /// Whether a reader in `reader_txn`'s snapshot with `reader_read_ts` set
    /// must instantiate this (possibly fast-deleted) ref back to `Mem`
    /// rather than treat it as absent.
    pub fn must_instantiate(&self, visible: impl Fn(u64, Option<Timestamp>) -> bool) -> bool {
        match (&self.state, &self.page_del) {
            (RefState::Deleted, Some(del)) => visible(del.txnid, Some(del.timestamp)),
            _ => false,
        }
    }

    pub fn mark_deleted(&mut self, txnid: u64, timestamp: Timestamp) {
        self.state = RefState::Deleted;
        self.page_del = Some(PageDel { txnid, timestamp });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_disk_ref_never_needs_instantiation() {
        let r = Ref::on_disk(AddressCookie::NONE);
        assert!(!r.must_instantiate(|_, _| true));
    }

    #[test]
    fn fast_deleted_ref_instantiates_when_predating_snapshot() {
        let mut r = Ref::on_disk(AddressCookie::NONE);
        r.mark_deleted(5, Timestamp(100));
        assert!(r.must_instantiate(|txnid, ts| txnid == 5 && ts == Some(Timestamp(100))));
    }
}
