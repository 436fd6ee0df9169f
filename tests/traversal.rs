//! Prefix-search correctness: cursor search/search_near/next across a page
//! built from a larger, unsorted-at-insertion-time key set, checked against
//! a reference `BTreeMap`.

use std::collections::BTreeMap;

use wt_core::btree::cell::Cell;
use wt_core::btree::page::{LeafSlot, Page};
use wt_core::cursor::{Compare, Cursor};
use wt_core::txn::transaction::{Isolation, TransactionManager};

fn reference_and_page() -> (BTreeMap<Vec<u8>, Vec<u8>>, Page) {
    let mut reference = BTreeMap::new();
    for i in 0..200 {
        let key = format!("key-{i:05}").into_bytes();
        let value = format!("value-{i}").into_bytes();
        reference.insert(key, value);
    }
    let slots: Vec<LeafSlot> = reference
        .iter()
        .map(|(k, v)| LeafSlot { key: k.clone(), value: Cell::Value(v.clone()) })
        .collect();
    (reference, Page::new_leaf(slots))
}

#[test]
fn exact_search_matches_reference_for_every_key() {
    let (reference, page) = reference_and_page();
    let txn_mgr = TransactionManager::new();
    let txn = txn_mgr.begin(Isolation::Snapshot);
    let mut cursor = Cursor::new(&page);
    for (key, value) in &reference {
        assert_eq!(cursor.search(key), Compare::Equal);
        assert_eq!(cursor.value(&txn).unwrap().as_ref(), Some(value));
    }
}

#[test]
fn search_near_finds_nearest_neighbor_for_gap_keys() {
    let (reference, page) = reference_and_page();
    let mut cursor = Cursor::new(&page);

    // A key between key-00010 and key-00011 lexicographically but absent.
    let probe = b"key-00010x".to_vec();
    let result = cursor.search_near(&probe).unwrap();
    assert_eq!(result, Compare::Greater);
    let found = cursor.key().unwrap().to_vec();
    assert!(reference.contains_key(&found));
    assert!(found.as_slice() > probe.as_slice());
}

#[test]
fn next_walks_the_full_page_in_order() {
    let (reference, page) = reference_and_page();
    let ordered_keys: Vec<Vec<u8>> = reference.keys().cloned().collect();
    let mut cursor = Cursor::new(&page);
    cursor.search(&ordered_keys[0]);
    let mut seen = vec![cursor.key().unwrap().to_vec()];
    while cursor.next() {
        seen.push(cursor.key().unwrap().to_vec());
    }
    assert_eq!(seen, ordered_keys);
}

#[test]
fn bounded_cursor_stops_at_upper_bound() {
    let (_reference, page) = reference_and_page();
    let mut cursor = Cursor::new(&page);
    cursor.bound(false, b"key-00005".to_vec(), true);
    cursor.search(b"key-00000");
    let mut count = 1;
    while cursor.next() {
        count += 1;
    }
    // key-00000 through key-00005 inclusive.
    assert_eq!(count, 6);
}
