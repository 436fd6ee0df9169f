//! Transaction context and the global transaction table: snapshot isolation,
//! visibility, commit/rollback/prepare, and write-write conflict detection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::btree::update::{Update, ABORTED_TXN_ID};
use crate::error::{Error, Result};
use crate::txn::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    ReadUncommitted,
    ReadCommitted,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Running,
    Committed,
    Aborted,
}

/// Per-transaction state: the running set of other transaction ids needed
/// to evaluate visibility, plus the timestamps assigned at begin/read/
/// prepare/commit.
pub struct Transaction {
    pub id: u64,
    pub isolation: Isolation,
    pub snapshot: HashSet<u64>,
    pub snap_min: u64,
    pub snap_max: u64,
    pub read_ts: Option<Timestamp>,
    pub prepare_ts: Option<Timestamp>,
    pub commit_ts: Option<Timestamp>,
    /// Updates this transaction installed, in program order, so commit can
    /// stamp them and rollback can abort them.
    op_log: Vec<OpLogEntry>,
}

struct OpLogEntry {
    /// Handle into the chain node this op installed, so commit can reach
    /// back and stamp `start_ts`/`durable_ts` without `Transaction` owning
    /// any page memory.
    handle: Arc<Mutex<Update>>,
}

impl Transaction {
    fn new(id: u64, isolation: Isolation, snapshot: HashSet<u64>, snap_min: u64, snap_max: u64) -> Self {
        Self {
            id,
            isolation,
            snapshot,
            snap_min,
            snap_max,
            read_ts: None,
            prepare_ts: None,
            commit_ts: None,
            op_log: Vec::new(),
        }
    }

    /// Records that this transaction installed `handle`, so commit can stamp
    /// it and rollback can find it again.
    pub fn record_op(&mut self, handle: Arc<Mutex<Update>>) {
        self.op_log.push(OpLogEntry { handle });
    }

    pub fn op_count(&self) -> usize {
        self.op_log.len()
    }

    /// The visibility test: an update is visible to this transaction if it
    /// isn't aborted, isn't outside its snapshot, and (under an active
    /// `read_ts`) started no later and didn't stop before that timestamp.
    pub fn visible(&self, update: &Update) -> bool {
        if update.is_aborted() {
            return false;
        }
        if self.isolation == Isolation::ReadUncommitted {
            return true;
        }
        if update.txnid == self.id {
            return true;
        }
        if self.snapshot.contains(&update.txnid) || update.txnid >= self.snap_max {
            return false;
        }
        if let Some(read_ts) = self.read_ts {
            if update.start_ts > read_ts {
                return false;
            }
            if let Some(stop_ts) = update.stop_ts {
                if stop_ts <= read_ts {
                    return false;
                }
            }
        }
        true
    }
}

struct SlotState {
    state: TxnState,
    snap_min: u64,
}

/// Global transaction table: the running-id set, the id counter, and the
/// per-transaction commit/abort state every session's snapshot is computed
/// against.
#[derive(Default)]
pub struct TransactionManager {
    id_counter: AtomicU64,
    slots: RwLock<HashMap<u64, SlotState>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a new transaction id, copies the running-id set, and publishes
    /// the new id as running.
    pub fn begin(&self, isolation: Isolation) -> Transaction {
        let mut slots = self.slots.write();
        let snapshot: HashSet<u64> = slots
            .iter()
            .filter(|(_, s)| s.state == TxnState::Running)
            .map(|(&id, _)| id)
            .collect();
        let snap_min = snapshot.iter().copied().min().unwrap_or_else(|| self.id_counter.load(Ordering::Acquire));
        let id = self.id_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let snap_max = self.id_counter.load(Ordering::Acquire) + 1;
        slots.insert(id, SlotState { state: TxnState::Running, snap_min });
        Transaction::new(id, isolation, snapshot, snap_min, snap_max)
    }

    /// Conflict detection on write: returns `Err(Rollback)` if `head` was
    /// written by a transaction this one cannot see past.
    pub fn check_conflict(&self, txn: &Transaction, head: Option<&Update>) -> Result<()> {
        let Some(head) = head else { return Ok(()) };
        if head.is_aborted() {
            return Ok(());
        }
        if head.txnid == txn.id {
            return Ok(());
        }
        if !txn.snapshot.contains(&head.txnid) && head.txnid != txn.id && head.txnid >= txn.snap_min {
            return Err(Error::Rollback);
        }
        Ok(())
    }

    /// Commits the transaction: stamps every update it installed with
    /// `commit_ts` (its `start_ts`, and its `durable_ts` unless one was
    /// already set by an earlier `set_durable_ts` call), then publishes it
    /// as committed and releases its slot from the running set.
    pub fn commit(&self, txn: Transaction, commit_ts: Option<Timestamp>) -> Result<()> {
        if let (Some(prepare_ts), Some(commit_ts)) = (txn.prepare_ts, commit_ts) {
            if commit_ts < prepare_ts {
                return Err(Error::InvalidArgument(
                    "commit_ts must be >= prepare_ts for a prepared transaction".into(),
                ));
            }
        }
        if let Some(commit_ts) = commit_ts {
            for op in &txn.op_log {
                let mut update = op.handle.lock();
                if update.is_aborted() {
                    continue;
                }
                update.start_ts = commit_ts;
                if update.durable_ts.is_none() {
                    update.durable_ts = commit_ts;
                }
            }
        }
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(&txn.id) {
            slot.state = TxnState::Committed;
        }
        Ok(())
    }

    /// Rolls back the transaction: callers are responsible for calling
    /// `UpdateChain::abort_all` on every chain this transaction touched
    /// before calling this.
    pub fn rollback(&self, txn: Transaction) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(&txn.id) {
            slot.state = TxnState::Aborted;
        }
    }

    /// Marks `txn` prepared; conflict checks on keys it touched must now
    /// return [`Error::PrepareConflict`] instead of racing resurrection.
    pub fn prepare(&self, txn: &mut Transaction, prepare_ts: Timestamp) {
        txn.prepare_ts = Some(prepare_ts);
    }

    /// Drops a transaction's slot entirely once no reader's snapshot can
    /// reference it any longer (called by the cleanup sweep, not by commit
    /// or rollback directly, so concurrent `visible()` calls racing the
    /// state transition still see a slot to read).
    pub fn reap(&self, id: u64) {
        self.slots.write().remove(&id);
    }

    pub fn oldest_running_id(&self) -> Option<u64> {
        self.slots
            .read()
            .iter()
            .filter(|(_, s)| s.state == TxnState::Running)
            .map(|(&id, _)| id)
            .min()
    }

    /// Pins the running-id set for a checkpoint: every id still running at
    /// this instant, plus the id ceiling a transaction started after this
    /// call must not be mistaken for one already accounted for. A
    /// checkpoint must not see a write from any id in the returned set, nor
    /// from any id at or above the returned ceiling.
    pub fn pin_snapshot(&self) -> (HashSet<u64>, u64) {
        let slots = self.slots.read();
        let snapshot: HashSet<u64> = slots
            .iter()
            .filter(|(_, s)| s.state == TxnState::Running)
            .map(|(&id, _)| id)
            .collect();
        let ceiling = self.id_counter.load(Ordering::Acquire) + 1;
        (snapshot, ceiling)
    }
}
