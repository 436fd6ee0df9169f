//! Insert skip lists.
//!
//! WiredTiger shares skip-list nodes across levels via raw `next` pointer
//! arrays; this crate denies `unsafe_code`, so nodes live in a `Vec` arena
//! and links are arena indices rather than pointers. The level geometry
//! (`p = 1/4`, `WT_SKIP_MAXDEPTH = 10`) and the top-down prefix-skip search
//! are unchanged.

use rand::Rng;

use crate::btree::update::UpdateChain;

pub const MAX_DEPTH: usize = 10;
const PROBABILITY_NUMERATOR: u32 = 1;
const PROBABILITY_DENOMINATOR: u32 = 4;

type NodeIndex = usize;

struct Node {
    key: Vec<u8>,
    chain: UpdateChain,
    /// `next[level]` is the arena index of this node's successor at that
    /// level, or `None` at the tail.
    next: Vec<Option<NodeIndex>>,
}

/// One gap's worth of newly inserted keys: one per on-disk-key boundary,
/// plus a leading and trailing head.
pub struct InsertList {
    arena: Vec<Node>,
    /// `head[level]` is the arena index of the first node at that level.
    head: Vec<Option<NodeIndex>>,
}

impl Default for InsertList {
    fn default() -> Self {
        Self {
            arena: Vec::new(),
            head: vec![None; MAX_DEPTH],
        }
    }
}

/// Chooses a node height with `p = 1/4` per level, capped at [`MAX_DEPTH`].
pub fn random_height(rng: &mut impl Rng) -> usize {
    let mut height = 1;
    while height < MAX_DEPTH && rng.gen_ratio(PROBABILITY_NUMERATOR, PROBABILITY_DENOMINATOR) {
        height += 1;
    }
    height
}

/// Result of a skip-list search: the node found (if any key-equal match),
/// and for each level the immediately-preceding node index (for splice-in).
pub struct SearchResult {
    pub found: Option<NodeIndex>,
    pub before: Vec<Option<NodeIndex>>,
}

impl InsertList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head.iter().all(|h| h.is_none())
    }

    fn key_at(&self, idx: NodeIndex) -> &[u8] {
        &self.arena[idx].key
    }

    /// Top-down prefix-skip search: descending from level *L* to *L-1*
    /// carries `min(skiphigh, skiplow)`, the bytes already known to
    /// match the bracketing keys, forward as the starting comparison offset
    /// at the next level down.
    pub fn search(&self, key: &[u8]) -> SearchResult {
        let mut before = vec![None; MAX_DEPTH];
        let mut cur: Option<NodeIndex> = None;
        let mut skiplow = 0usize;
        let mut skiphigh = 0usize;

        for level in (0..MAX_DEPTH).rev() {
            let mut next = match cur {
                Some(idx) => self.arena[idx].next[level],
                None => self.head[level],
            };
            loop {
                let Some(idx) = next else { break };
                let skip = skiplow.min(skiphigh);
                let node_key = self.key_at(idx);
                match compare_from(key, node_key, skip) {
                    std::cmp::Ordering::Greater => {
                        skiplow = common_prefix_len(key, node_key);
                        cur = Some(idx);
                        next = self.arena[idx].next[level];
                    }
                    std::cmp::Ordering::Equal => {
                        before[level] = cur;
                        return SearchResult {
                            found: Some(idx),
                            before,
                        };
                    }
                    std::cmp::Ordering::Less => {
                        skiphigh = common_prefix_len(key, node_key);
                        break;
                    }
                }
            }
            before[level] = cur;
        }

        SearchResult { found: None, before }
    }

    /// Inserts `key` with the given chain at a randomly chosen height,
    /// splicing it in after the predecessors found by [`InsertList::search`].
    /// Returns `false` without modifying the list if `key` is already present.
    pub fn insert(&mut self, key: Vec<u8>, chain: UpdateChain, rng: &mut impl Rng) -> bool {
        let result = self.search(&key);
        if result.found.is_some() {
            return false;
        }
        let height = random_height(rng);
        let idx = self.arena.len();
        self.arena.push(Node {
            key,
            chain,
            next: vec![None; height],
        });
        for level in 0..height {
            let before = result.before[level];
            match before {
                Some(b) => {
                    let succ = self.arena[b].next[level];
                    self.arena[idx].next[level] = succ;
                    self.arena[b].next[level] = Some(idx);
                }
                None => {
                    self.arena[idx].next[level] = self.head[level];
                    self.head[level] = Some(idx);
                }
            }
        }
        true
    }

    pub fn get(&self, key: &[u8]) -> Option<&UpdateChain> {
        self.search(key).found.map(|idx| &self.arena[idx].chain)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut UpdateChain> {
        let idx = self.search(key).found?;
        Some(&mut self.arena[idx].chain)
    }

    /// In-order iterator over `(key, chain)`, used for cursor `next`/`prev`
    /// traversal and diagnostic key-order assertions.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &UpdateChain)> {
        let mut cur = self.head[0];
        std::iter::from_fn(move || {
            let idx = cur?;
            cur = self.arena[idx].next[0];
            Some((self.arena[idx].key.as_slice(), &self.arena[idx].chain))
        })
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Compares `key` to `node_key`, skipping the first `skip` bytes (already
/// known equal from the bracketing search state).
fn compare_from(key: &[u8], node_key: &[u8], skip: usize) -> std::cmp::Ordering {
    let skip = skip.min(key.len()).min(node_key.len());
    key[skip..].cmp(&node_key[skip..])
}
