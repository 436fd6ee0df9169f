//! Cache and eviction: memory accounting, normalized
//! tree-walk diversification, the eviction queue/worker pool, and hazard
//! pointers.

pub mod eviction;
pub mod hazard;

pub use eviction::{
    child_npos, seek_child, CacheAccounting, EvictionCandidate, EvictionPool, EvictionQueue,
    EvictionThresholds, PageClass, Pressure, ROOT_NPOS,
};
pub use hazard::{HazardRegistry, HazardStack};
