//! Cache accounting and eviction: memory budget tracking, normalized-position
//! tree diversification, the eviction queue, and the worker pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

/// The three memory-class counters plus dirty bytes.
#[derive(Debug, Default)]
pub struct CacheAccounting {
    internal_bytes: AtomicI64,
    leaf_bytes: AtomicI64,
    overflow_bytes: AtomicI64,
    dirty_bytes: AtomicI64,
}

#[derive(Debug, Clone, Copy)]
pub enum PageClass {
    Internal,
    Leaf,
    Overflow,
}

impl CacheAccounting {
    pub fn add(&self, class: PageClass, delta: i64, dirty_delta: i64) {
        let counter = match class {
            PageClass::Internal => &self.internal_bytes,
            PageClass::Leaf => &self.leaf_bytes,
            PageClass::Overflow => &self.overflow_bytes,
        };
        counter.fetch_add(delta, Ordering::Relaxed);
        self.dirty_bytes.fetch_add(dirty_delta, Ordering::Relaxed);
    }

    pub fn total_bytes(&self) -> i64 {
        self.internal_bytes.load(Ordering::Relaxed)
            + self.leaf_bytes.load(Ordering::Relaxed)
            + self.overflow_bytes.load(Ordering::Relaxed)
    }

    pub fn dirty_bytes(&self) -> i64 {
        self.dirty_bytes.load(Ordering::Relaxed)
    }
}

/// The admission thresholds: `cache_size` plus soft/hard triggers for total
/// and dirty bytes.
#[derive(Debug, Clone, Copy)]
pub struct EvictionThresholds {
    pub cache_size: i64,
    pub target_pct: f64,
    pub trigger_pct: f64,
    pub dirty_target_pct: f64,
    pub dirty_trigger_pct: f64,
}

impl Default for EvictionThresholds {
    fn default() -> Self {
        Self {
            cache_size: 100 * 1024 * 1024,
            target_pct: 0.80,
            trigger_pct: 0.95,
            dirty_target_pct: 0.05,
            dirty_trigger_pct: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    None,
    Soft,
    Hard,
}

impl EvictionThresholds {
    pub fn pressure(&self, accounting: &CacheAccounting) -> Pressure {
        let total = accounting.total_bytes() as f64;
        let dirty = accounting.dirty_bytes() as f64;
        let cache = self.cache_size as f64;
        if total >= cache * self.trigger_pct || dirty >= cache * self.dirty_trigger_pct {
            Pressure::Hard
        } else if total >= cache * self.target_pct || dirty >= cache * self.dirty_target_pct {
            Pressure::Soft
        } else {
            Pressure::None
        }
    }
}

/// Computes the normalized position of child `index` of `count` under a
/// parent at `parent_npos`.
pub fn child_npos(parent_npos: f64, index: usize, count: usize) -> f64 {
    debug_assert!(count > 0);
    (index as f64 + parent_npos) / count as f64
}

/// Inverts [`child_npos`]: given a normalized position and a page with
/// `count` children, returns `(child_index, child_npos)`.
pub fn seek_child(npos: f64, count: usize) -> (usize, f64) {
    debug_assert!(count > 0);
    let scaled = npos * count as f64;
    let mut index = scaled.floor() as usize;
    if index >= count {
        index = count - 1;
    }
    (index, scaled - index as f64)
}

pub const ROOT_NPOS: f64 = 0.5;

/// A candidate page queued for eviction, identified opaquely: the worker
/// pool only needs to call back into the tree-walk logic that produced it.
pub struct EvictionCandidate {
    pub ref_id: u64,
    pub npos: f64,
}

/// A bounded queue of eviction candidates the supervisor populates and
/// workers drain.
#[derive(Default)]
pub struct EvictionQueue {
    items: Mutex<VecDeque<EvictionCandidate>>,
    not_empty: Condvar,
    capacity: usize,
}

impl EvictionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    pub fn push(&self, candidate: EvictionCandidate) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(candidate);
        self.not_empty.notify_one();
        true
    }

    /// Pops one candidate, waiting up to `timeout` for the queue to become
    /// non-empty.
    pub fn pop(&self, timeout: Duration) -> Option<EvictionCandidate> {
        let mut items = self.items.lock();
        if items.is_empty() {
            let result = self.not_empty.wait_for(&mut items, timeout);
            if result.timed_out() && items.is_empty() {
                return None;
            }
        }
        items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

/// A pool of eviction worker threads, sized between some minimum and maximum.
/// `reconcile` is the callback each worker invokes on a popped candidate; it
/// stands in for the full reconciliation pipeline, kept generic here so the
/// cache module does not depend on the B-tree/reconciliation modules directly.
pub struct EvictionPool {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    active_workers: Arc<AtomicUsize>,
}

impl EvictionPool {
    /// Spawns `count` workers, each looping `pop -> reconcile -> repeat`
    /// until `shutdown` is called; workers poll a running flag between pages.
    pub fn spawn<F>(queue: Arc<EvictionQueue>, count: usize, reconcile: F) -> Self
    where
        F: Fn(EvictionCandidate) + Send + Sync + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let active_workers = Arc::new(AtomicUsize::new(0));
        let reconcile = Arc::new(reconcile);
        let mut handles = Vec::with_capacity(count);
        for worker_id in 0..count {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let active_workers = Arc::clone(&active_workers);
            let reconcile = Arc::clone(&reconcile);
            handles.push(thread::spawn(move || {
                debug!(worker_id, "eviction worker started");
                while running.load(Ordering::Acquire) {
                    if let Some(candidate) = queue.pop(Duration::from_millis(100)) {
                        active_workers.fetch_add(1, Ordering::Relaxed);
                        reconcile(candidate);
                        active_workers.fetch_sub(1, Ordering::Relaxed);
                    }
                }
                debug!(worker_id, "eviction worker stopped");
            }));
        }
        Self { running, handles, active_workers }
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Signals workers to drain and joins them.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::Release);
        for h in self.handles {
            let _ = h.join();
        }
        info!("eviction pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_escalates_with_usage() {
        let thresholds = EvictionThresholds {
            cache_size: 1000,
            target_pct: 0.8,
            trigger_pct: 0.95,
            dirty_target_pct: 0.5,
            dirty_trigger_pct: 0.8,
        };
        let accounting = CacheAccounting::default();
        assert_eq!(thresholds.pressure(&accounting), Pressure::None);
        accounting.add(PageClass::Leaf, 850, 0);
        assert_eq!(thresholds.pressure(&accounting), Pressure::Soft);
        accounting.add(PageClass::Leaf, 150, 0);
        assert_eq!(thresholds.pressure(&accounting), Pressure::Hard);
    }

    #[test]
    fn child_and_seek_are_inverse() {
        let parent_npos = 0.3;
        for index in 0..5 {
            let npos = child_npos(parent_npos, index, 5);
            let (back_index, back_npos) = seek_child(npos, 5);
            assert_eq!(back_index, index);
            assert!((back_npos - parent_npos).abs() < 1e-9);
        }
    }

    #[test]
    fn root_seek_is_centered() {
        let (index, _) = seek_child(ROOT_NPOS, 4);
        assert_eq!(index, 2);
    }

    #[test]
    fn queue_respects_capacity() {
        let queue = EvictionQueue::new(1);
        assert!(queue.push(EvictionCandidate { ref_id: 1, npos: 0.1 }));
        assert!(!queue.push(EvictionCandidate { ref_id: 2, npos: 0.2 }));
    }

    #[test]
    fn pool_drains_queued_candidates() {
        let queue = Arc::new(EvictionQueue::new(16));
        for i in 0..5 {
            queue.push(EvictionCandidate { ref_id: i, npos: 0.0 });
        }
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = Arc::clone(&processed);
        let pool = EvictionPool::spawn(Arc::clone(&queue), 2, move |_| {
            processed_clone.fetch_add(1, Ordering::Relaxed);
        });
        thread::sleep(Duration::from_millis(200));
        pool.shutdown();
        assert_eq!(processed.load(Ordering::Relaxed), 5);
    }
}
