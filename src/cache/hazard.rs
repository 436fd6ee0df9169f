//! Hazard pointers.
//!
//! Before reading a page, a session pushes `(ref_id, generation)` onto its
//! own stack. An eviction worker may free a page only once no session's
//! stack still references its ref id — the generation counter exists so a
//! worker can tell "the page I meant" apart from "a different page that
//! later reused the same ref id".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// One session's hazard-pointer stack.
#[derive(Default)]
pub struct HazardStack {
    entries: parking_lot::Mutex<Vec<(u64, u64)>>,
}

impl HazardStack {
    pub fn push(&self, ref_id: u64, generation: u64) {
        self.entries.lock().push((ref_id, generation));
    }

    pub fn pop(&self, ref_id: u64, generation: u64) {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().rposition(|&(r, g)| r == ref_id && g == generation) {
            entries.remove(pos);
        }
    }

    fn references(&self, ref_id: u64) -> bool {
        self.entries.lock().iter().any(|&(r, _)| r == ref_id)
    }
}

/// Connection-wide registry of every session's hazard stack, plus the
/// monotone generation counter ref ids are stamped with on (re)instantiation.
#[derive(Default)]
pub struct HazardRegistry {
    stacks: RwLock<HashMap<u64, Arc<HazardStack>>>,
    next_generation: AtomicU64,
}

impl HazardRegistry {
    pub fn register_session(&self, session_id: u64) -> Arc<HazardStack> {
        let stack = Arc::new(HazardStack::default());
        self.stacks.write().insert(session_id, Arc::clone(&stack));
        stack
    }

    pub fn unregister_session(&self, session_id: u64) {
        self.stacks.write().remove(&session_id);
    }

    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// True if any registered session currently holds a hazard pointer on
    /// `ref_id`, across any generation. An eviction worker must not free a
    /// page while this holds.
    pub fn is_referenced(&self, ref_id: u64) -> bool {
        self.stacks.read().values().any(|s| s.references(ref_id))
    }
}
