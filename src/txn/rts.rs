//! Rollback-to-stable.
//!
//! Run on an explicit `stable_ts` regression or at crash recovery: erases
//! every update newer than the new `stable_ts` and every fast-delete whose
//! `page_del` timestamp is newer than it. Internal pages are never rewritten
//! by this pass — only leaves and fast-delete refs need review, since an
//! internal page's child pointers are unaffected by which updates within a
//! child's update chains remain visible.

use crate::btree::refs::{PageDel, Ref, RefState};
use crate::btree::update::UpdateChain;
use crate::txn::timestamp::Timestamp;

/// Summary of what one rollback-to-stable pass discarded, for diagnostics
/// and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RtsStats {
    pub updates_aborted: usize,
    pub fast_deletes_reverted: usize,
}

/// Removes every update in `chain` newer than `stable_ts`, aborting it in
/// place. Returns the count removed.
pub fn rollback_chain(chain: &mut UpdateChain, stable_ts: Timestamp) -> usize {
    let mut count = 0;
    chain.for_each_mut_newest_first(|update| {
        if update.is_aborted() {
            return;
        }
        if update.durable_ts > stable_ts && !update.durable_ts.is_none() {
            update.txnid = crate::btree::update::ABORTED_TXN_ID;
            count += 1;
        }
    });
    count
}

/// Reverts a fast-delete ref whose truncate happened after `stable_ts` back
/// to a normal `MEM`/`DISK` ref.
pub fn revert_fast_delete(r: &mut Ref, stable_ts: Timestamp) -> bool {
    let reverted = match (&r.state, &r.page_del) {
        (RefState::Deleted, Some(PageDel { timestamp, .. })) if *timestamp > stable_ts => true,
        _ => false,
    };
    if reverted {
        r.state = RefState::Disk;
        r.page_del = None;
    }
    reverted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::refs::{PageDel, Ref, RefState};
    use crate::btree::update::{Update, UpdateKind};
    use crate::block::addr::AddressCookie;

    #[test]
    fn rolls_back_updates_newer_than_stable() {
        let mut chain = UpdateChain::new();
        let mut old = Update::new(1, UpdateKind::Standard(b"old".to_vec()));
        old.durable_ts = Timestamp(5);
        let mut new = Update::new(2, UpdateKind::Standard(b"new".to_vec()));
        new.durable_ts = Timestamp(20);
        chain.install(old);
        chain.install(new);

        let removed = rollback_chain(&mut chain, Timestamp(10));
        assert_eq!(removed, 1);
        let live: Vec<_> = chain.snapshot().into_iter().filter(|u| !u.is_aborted()).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].txnid, 1);
    }

    #[test]
    fn reverts_fast_delete_newer_than_stable() {
        let mut r = Ref {
            state: RefState::Deleted,
            addr: AddressCookie::NONE,
            page_del: Some(PageDel { txnid: 7, timestamp: Timestamp(50) }),
        };
        assert!(revert_fast_delete(&mut r, Timestamp(10)));
        assert_eq!(r.state, RefState::Disk);
        assert!(r.page_del.is_none());
    }

    #[test]
    fn leaves_fast_delete_older_than_stable_untouched() {
        let mut r = Ref {
            state: RefState::Deleted,
            addr: AddressCookie::NONE,
            page_del: Some(PageDel { txnid: 7, timestamp: Timestamp(5) }),
        };
        assert!(!revert_fast_delete(&mut r, Timestamp(10)));
        assert_eq!(r.state, RefState::Deleted);
    }
}
