//! Normalized-position invariance and hazard-gated eviction, wired together
//! as the cache layer's callers actually use them: a tree walk computes
//! child positions top-down, and an eviction worker must never select a
//! page a reader still holds a hazard pointer on.

use std::time::Duration;

use wt_core::cache::eviction::{child_npos, seek_child, EvictionCandidate, EvictionQueue};
use wt_core::cache::hazard::HazardRegistry;

#[test]
fn normalized_position_is_stable_across_a_multi_level_walk() {
    // A synthetic 3-level tree: root has 4 children, each with 6 children
    // of its own. Descending through `child_npos` and inverting with
    // `seek_child` at each level must recover the exact child index taken.
    for root_child in 0..4 {
        let level1_npos = child_npos(0.0, root_child, 4);
        let (recovered_root_child, recovered_root_npos) = seek_child(level1_npos, 4);
        assert_eq!(recovered_root_child, root_child);
        assert!(recovered_root_npos.abs() < 1e-9);

        for leaf_child in 0..6 {
            let level2_npos = child_npos(level1_npos, leaf_child, 6);
            let (recovered_leaf_child, recovered_level1_npos) = seek_child(level2_npos, 6);
            assert_eq!(recovered_leaf_child, leaf_child);
            assert!((recovered_level1_npos - level1_npos).abs() < 1e-9);
        }
    }
}

#[test]
fn single_level_child_npos_and_seek_child_are_inverses() {
    for count in [1usize, 2, 5, 16, 100] {
        for index in 0..count {
            let parent_npos = 0.42;
            let npos = child_npos(parent_npos, index, count);
            let (back_index, back_npos) = seek_child(npos, count);
            assert_eq!(back_index, index);
            assert!((back_npos - parent_npos).abs() < 1e-9);
        }
    }
}

#[test]
fn eviction_worker_cannot_select_a_hazard_protected_page() {
    let registry = HazardRegistry::default();
    let reader_session = registry.register_session(1);
    reader_session.push(7, 1);

    let queue = EvictionQueue::new(4);
    assert!(queue.push(EvictionCandidate { ref_id: 7, npos: 0.5 }));

    // The worker pops the candidate but must defer freeing it while the
    // reader's hazard pointer is still up.
    let candidate = queue.pop(Duration::from_millis(50)).unwrap();
    assert_eq!(candidate.ref_id, 7);
    assert!(registry.is_referenced(candidate.ref_id));

    reader_session.pop(7, 1);
    assert!(!registry.is_referenced(candidate.ref_id));
}
