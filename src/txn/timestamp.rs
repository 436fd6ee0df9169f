//! Timestamp type and the global timestamp oracles: `oldest_ts` and
//! `stable_ts`, both monotone non-decreasing.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// An application-assigned logical timestamp. `NONE` (zero) means "not set".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const NONE: Timestamp = Timestamp(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

/// Holds the connection-wide `oldest_ts`/`stable_ts` watermarks. Both are
/// monotone non-decreasing; callers attempting to move one backwards get
/// [`Error::InvalidArgument`] rather than silent clamping.
#[derive(Debug)]
pub struct TimestampOracle {
    oldest: AtomicU64,
    stable: AtomicU64,
}

impl Default for TimestampOracle {
    fn default() -> Self {
        Self {
            oldest: AtomicU64::new(0),
            stable: AtomicU64::new(0),
        }
    }
}

impl TimestampOracle {
    pub fn oldest(&self) -> Timestamp {
        Timestamp(self.oldest.load(Ordering::Acquire))
    }

    pub fn stable(&self) -> Timestamp {
        Timestamp(self.stable.load(Ordering::Acquire))
    }

    /// Advances `oldest_ts`. Must never exceed `stable_ts`.
    pub fn set_oldest(&self, ts: Timestamp) -> Result<()> {
        let stable = self.stable.load(Ordering::Acquire);
        if ts.0 > stable {
            return Err(Error::InvalidArgument(
                "oldest_ts may not exceed stable_ts".into(),
            ));
        }
        self.monotone_advance(&self.oldest, ts.0, "oldest_ts")
    }

    /// Advances `stable_ts`. A regression is the rollback-to-stable trigger
    /// and must go through the dedicated API, not this setter.
    pub fn set_stable(&self, ts: Timestamp) -> Result<()> {
        self.monotone_advance(&self.stable, ts.0, "stable_ts")
    }

    /// Forces `stable_ts` backwards, the one legitimate way to regress it
    /// (callers must then run rollback-to-stable, see [`crate::txn::rts`]).
    pub fn force_stable(&self, ts: Timestamp) {
        self.stable.store(ts.0, Ordering::Release);
    }

    fn monotone_advance(&self, counter: &AtomicU64, ts: u64, name: &'static str) -> Result<()> {
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if ts < current {
                return Err(Error::InvalidArgument(format!("{name} may not move backwards")));
            }
            match counter.compare_exchange_weak(current, ts, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }
}
