use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::{BTreeMap, BTreeSet};

/// A node header and the record it was initialized with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry {
    node: Pos,
    record: Pos,
}

struct Harness {
    arena: Arena,
    tree: AvlTree<U64Keys>,
}

impl Harness {
    fn new() -> Self {
        Self::with_order(U64Keys::default())
    }

    fn with_order(order: U64Keys) -> Self {
        let mut arena = Arena::new();
        let header = arena.alloc(TREE_HEADER_SIZE, 8).unwrap();
        arena.set_anchor(Some(header));
        let tree = AvlTree::create(&mut arena, header, order);
        Self { arena, tree }
    }

    fn entry(&mut self, key: u64) -> Entry {
        let record = self.arena.alloc_bytes(&key.to_le_bytes()).unwrap();
        let node = self.arena.alloc_node().unwrap();
        node::init(&mut self.arena, node, Some(record));
        Entry { node, record }
    }

    fn node(&mut self, key: u64) -> Pos {
        self.entry(key).node
    }

    fn keys(&self) -> Vec<u64> {
        self.tree
            .iter(&self.arena)
            .map(|n| self.tree.key_of(&self.arena, n))
            .collect()
    }
}

fn validate_tree(h: &Harness, expected: usize) {
    let audit = h.tree.audit(&h.arena).unwrap();
    assert_eq!(audit.nodes, expected, "reachable nodes must match the model");
    assert!(audit.height <= MAX_HEIGHT);

    // AVL height bound: h < 1.4405 * log2(n + 2)
    let bound = 1.4405 * ((expected + 2) as f64).log2();
    assert!(
        (audit.height as f64) < bound,
        "height {} too large for {expected} nodes",
        audit.height
    );

    for n in h.tree.iter(&h.arena) {
        let view = node::read(&h.arena, n);
        assert!((-1..=1).contains(&view.balance));
    }
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 5)]
    Insert(#[proptest(strategy = "1u64..256")] u64),
    #[proptest(weight = 3)]
    Delete(#[proptest(strategy = "1u64..256")] u64),
    #[proptest(weight = 2)]
    Find(#[proptest(strategy = "0u64..260")] u64),
    Next(#[proptest(strategy = "0u64..260")] u64),
    Prev(#[proptest(strategy = "0u64..260")] u64),
    NextFreeKey(#[proptest(strategy = "0u64..256")] u64),
}

/// Reference answer for free-key search over `min..=max`: walk the cycle
/// after `start` (the wrap value `min - 1` is never a candidate) until a free
/// key turns up or the walk comes back to `start`.
fn model_next_free(taken: impl Fn(u64) -> bool, start: u64, min: u64, max: u64) -> Option<u64> {
    let mut k = start;
    for _ in min..=max {
        k = if k >= max { min } else { k + 1 };
        if k == start {
            return None;
        }
        if !taken(k) {
            return Some(k);
        }
    }
    None
}

/// Narrow key ranges with most keys present, so exhaustion and wrap are common.
fn dense_range_strategy() -> impl Strategy<Value = (u64, u64, Vec<bool>)> {
    (1u64..10, 0u64..16).prop_flat_map(|(min, span)| {
        (
            Just(min),
            Just(min + span),
            prop::collection::vec(prop::bool::weighted(0.8), (span + 1) as usize),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in prop::collection::vec(any::<Op>(), 0..=600)) {
        let mut h = Harness::with_order(U64Keys::new(1, 255));
        let mut m: BTreeMap<u64, Entry> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key) => {
                    let entry = h.entry(key);
                    let inserted = h.tree.insert(&mut h.arena, entry.node);
                    prop_assert_eq!(inserted, !m.contains_key(&key));
                    if inserted {
                        m.insert(key, entry);
                    }
                }
                Op::Delete(key) => {
                    let removed = h.tree.delete(&mut h.arena, &key);
                    let expected = m.remove(&key).map(|e| Removed {
                        node: e.node,
                        payload: Some(e.record),
                    });
                    prop_assert_eq!(removed, expected);
                }
                Op::Find(key) => {
                    prop_assert_eq!(h.tree.find(&h.arena, &key), m.get(&key).map(|e| e.node));
                }
                Op::Next(key) => {
                    let expected = m.range(key + 1..).next().map(|(_, e)| e.node);
                    prop_assert_eq!(h.tree.next(&h.arena, &key), expected);
                    let expected = m.range(key..).next().map(|(_, e)| e.node);
                    prop_assert_eq!(h.tree.equal_or_next(&h.arena, &key), expected);
                }
                Op::Prev(key) => {
                    let expected = m.range(..key).next_back().map(|(_, e)| e.node);
                    prop_assert_eq!(h.tree.prev(&h.arena, &key), expected);
                    let expected = m.range(..=key).next_back().map(|(_, e)| e.node);
                    prop_assert_eq!(h.tree.equal_or_prev(&h.arena, &key), expected);
                }
                Op::NextFreeKey(start) => {
                    prop_assert_eq!(
                        h.tree.next_free_key(&h.arena, &start),
                        model_next_free(|k| m.contains_key(&k), start, 1, 255)
                    );
                }
            }
        }

        validate_tree(&h, m.len());
        let expected: Vec<u64> = m.keys().copied().collect();
        prop_assert_eq!(h.keys(), expected);
        let entries: Vec<Entry> = h
            .tree
            .iter(&h.arena)
            .map(|node| Entry {
                node,
                record: h.tree.payload_of(&h.arena, node).unwrap(),
            })
            .collect();
        let expected: Vec<Entry> = m.values().copied().collect();
        prop_assert_eq!(entries, expected);
    }

    #[test]
    fn prop_free_key_dense((min, max, present) in dense_range_strategy()) {
        let mut h = Harness::with_order(U64Keys::new(min, max));
        let mut taken = BTreeSet::new();
        for (key, &keep) in (min..=max).zip(&present) {
            if keep {
                let n = h.node(key);
                prop_assert!(h.tree.insert(&mut h.arena, n));
                taken.insert(key);
            }
        }

        for start in min - 1..=max {
            prop_assert_eq!(
                h.tree.next_free_key(&h.arena, &start),
                model_next_free(|k| taken.contains(&k), start, min, max),
                "start {} in {}..={} with {:?}",
                start,
                min,
                max,
                taken
            );
        }
    }

    #[test]
    fn prop_relocated_copy_matches(keys in prop::collection::btree_set(1u64..10_000, 0..300)) {
        let mut h = Harness::new();
        for &k in &keys {
            let n = h.node(k);
            prop_assert!(h.tree.insert(&mut h.arena, n));
        }

        let copy = Arena::from_bytes(h.arena.as_bytes().to_vec()).unwrap();
        let header = copy.anchor().unwrap();
        let reopened = AvlTree::open(header, U64Keys::default());
        let got: Vec<u64> = reopened.iter(&copy).map(|n| reopened.key_of(&copy, n)).collect();
        let expected: Vec<u64> = keys.iter().copied().collect();
        prop_assert_eq!(got, expected);
        prop_assert_eq!(reopened.audit(&copy).unwrap().nodes, keys.len());
    }

    #[test]
    fn prop_rebuild_after_unbalanced(keys in prop::collection::vec(1u64..1_000, 0..200)) {
        let mut h = Harness::new();
        let mut set = BTreeSet::new();
        for k in keys {
            let n = h.node(k);
            prop_assert_eq!(h.tree.insert_unbalanced(&mut h.arena, n), set.insert(k));
            // Readers see a valid search tree after every step.
            prop_assert_eq!(
                h.tree.find(&h.arena, &k).map(|n| h.tree.key_of(&h.arena, n)),
                Some(k)
            );
        }

        prop_assert_eq!(h.tree.rebuild(&mut h.arena), set.len());
        validate_tree(&h, set.len());
        let expected: Vec<u64> = set.iter().copied().collect();
        prop_assert_eq!(h.keys(), expected);
    }
}

/// Calls `f` once with every ordering of `keys` (Heap's algorithm, in place).
fn each_ordering(keys: &[u64], mut f: impl FnMut(&[u64])) {
    let mut order = keys.to_vec();
    let mut counters = vec![0usize; order.len()];
    f(&order);
    let mut i = 1;
    while i < order.len() {
        if counters[i] < i {
            let j = if i % 2 == 0 { 0 } else { counters[i] };
            order.swap(j, i);
            f(&order);
            counters[i] += 1;
            i = 1;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys = [10u64, 20, 30, 40, 50, 60, 70];

    each_ordering(&keys, |order| {
        let mut h = Harness::new();
        for &k in order {
            let n = h.node(k);
            assert!(h.tree.insert(&mut h.arena, n));
            validate_tree(&h, h.tree.iter(&h.arena).count());
        }
        validate_tree(&h, keys.len());
        assert_eq!(h.keys(), keys);
    });
}

#[test]
fn exhaustive_delete_order_small_set() {
    let keys = [4u64, 2, 6, 1, 3, 5, 7];

    // Insert in a fixed order, then delete in all permutations.
    let mut base = Harness::new();
    for &k in &keys {
        let n = base.node(k);
        assert!(base.tree.insert(&mut base.arena, n));
    }
    let bytes = base.arena.as_bytes().to_vec();
    let header = base.tree.header();

    each_ordering(&keys, |order| {
        let mut h = Harness {
            arena: Arena::from_bytes(bytes.clone()).unwrap(),
            tree: AvlTree::open(header, U64Keys::default()),
        };
        let mut m: BTreeSet<u64> = keys.iter().copied().collect();

        for &k in order {
            let removed = h.tree.delete(&mut h.arena, &k).unwrap();
            assert_eq!(h.tree.key_of(&h.arena, removed.node), k);
            assert!(m.remove(&k));
            validate_tree(&h, m.len());
            assert_eq!(h.keys(), m.iter().copied().collect::<Vec<_>>());
        }
        assert!(h.tree.is_empty(&h.arena));
    });
}

#[test]
fn exhaustive_leaf_first_restore() {
    let keys = [1u64, 2, 3, 4, 5, 6];

    each_ordering(&keys, |order| {
        let mut h = Harness::new();
        for &k in order {
            let n = h.node(k);
            h.tree.insert(&mut h.arena, n);
        }
        let before = h.arena.as_bytes().to_vec();

        let visited: Vec<Pos> = h.tree.leaf_first(&mut h.arena).collect();
        assert_eq!(visited.len(), keys.len());
        assert!(h.tree.is_empty(&h.arena));
        for &n in visited.iter().rev() {
            h.tree.replace(&mut h.arena, n);
        }
        assert_eq!(h.arena.as_bytes(), &before[..]);
    });
}
