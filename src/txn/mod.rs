//! Transactions: isolation, visibility, snapshots,
//! commit/rollback/prepare, timestamp oracles, and rollback-to-stable.

pub mod rts;
pub mod timestamp;
pub mod transaction;

pub use rts::{revert_fast_delete, rollback_chain, RtsStats};
pub use timestamp::{Timestamp, TimestampOracle};
pub use transaction::{Isolation, Transaction, TransactionManager};
