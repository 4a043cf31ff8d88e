use super::*;

use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;

/// Check BST ordering, reachability and slot accounting.
fn validate_tree<K: Ord + Clone + Debug, V>(t: &ConcurrentTree<K, V>) {
    let inner = t.inner.read();

    // (node, exclusive lower bound, exclusive upper bound)
    let mut stack: Vec<(NodeId, Option<K>, Option<K>)> = Vec::new();
    if !inner.root.is_null() {
        stack.push((inner.root, None, None));
    }

    let mut seen = HashSet::new();
    while let Some((id, lo, hi)) = stack.pop() {
        assert!(seen.insert(id), "slot {id:?} reachable twice");

        let guard = inner.arena.lock(id);
        let node = guard.node();
        if let Some(lo) = &lo {
            assert!(node.key > *lo, "{:?} not above lower bound {:?}", node.key, lo);
        }
        if let Some(hi) = &hi {
            assert!(node.key < *hi, "{:?} not below upper bound {:?}", node.key, hi);
        }

        if !node.left.is_null() {
            stack.push((node.left, lo.clone(), Some(node.key.clone())));
        }
        if !node.right.is_null() {
            stack.push((node.right, Some(node.key.clone()), hi.clone()));
        }
    }

    assert_eq!(seen.len(), inner.len, "reachable nodes must match len");
    assert_eq!(
        seen.len() + inner.arena.num_vacant(),
        inner.arena.num_slots(),
        "every slot is either linked or on the free list"
    );
}

#[derive(Clone, Debug)]
enum Op<V> {
    Insert(String, V),
    Remove(String),
    Get(String),
}

fn key_strategy() -> impl Strategy<Value = String> + Clone {
    // Small alphabet so inserts, replaces and removes hit the same keys
    "[a-f]{0,3}"
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op<u64>>> {
    let key = key_strategy();
    let op = prop_oneof![
        50 => (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        25 => key.clone().prop_map(Op::Remove),
        25 => key.prop_map(Op::Get),
    ];
    prop::collection::vec(op, 0..=500)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in ops_strategy()) {
        let t: ConcurrentTree<String, u64> = ConcurrentTree::new();
        let mut m: BTreeMap<String, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = t.insert(key.clone(), value).unwrap().replaced();
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Remove(key) => {
                    let old_t = t.remove(key.as_str());
                    let old_m = m.remove(key.as_str());
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    let got_t = t.get(key.as_str());
                    let got_m = m.get(key.as_str()).copied();
                    prop_assert_eq!(got_t, got_m);
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_tree(&t);
        let expected: Vec<(String, u64)> = m.into_iter().collect();
        prop_assert_eq!(t.snapshot(), expected);
    }

    #[test]
    fn prop_inserts_keep_order(keys in prop::collection::vec(any::<u16>(), 0..300)) {
        let t: ConcurrentTree<u16, ()> = ConcurrentTree::new();
        for k in &keys {
            let _ = t.insert(*k, ()).unwrap();
        }
        validate_tree(&t);

        let got = t.keys();
        prop_assert!(got.windows(2).all(|w| w[0] < w[1]), "in-order keys must strictly increase");
        let mut expected = keys.clone();
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_remove_drops_exactly_one_key(
        keys in prop::collection::btree_set(any::<u16>(), 1..200),
        pick in any::<prop::sample::Index>(),
    ) {
        let t: ConcurrentTree<u16, u16> = ConcurrentTree::new();
        let keys: Vec<u16> = keys.into_iter().collect();
        // Insert in a scrambled but deterministic order to get varied shapes
        for (i, k) in keys.iter().enumerate() {
            let idx = (i * 7919) % keys.len();
            let _ = t.insert(keys[idx], keys[idx]).unwrap();
            let _ = t.insert(*k, *k).unwrap();
        }

        let victim = keys[pick.index(keys.len())];
        prop_assert_eq!(t.remove(&victim), Some(victim));
        validate_tree(&t);

        let expected: Vec<u16> = keys.iter().copied().filter(|k| *k != victim).collect();
        prop_assert_eq!(t.keys(), expected);
        prop_assert_eq!(t.remove(&victim), None);
    }
}

fn for_each_permutation<T: Copy>(items: &[T], mut f: impl FnMut(&[T])) {
    // Heap's algorithm, iterative
    let mut perm = items.to_vec();
    let mut counters = vec![0usize; perm.len()];
    f(&perm);
    let mut i = 1;
    while i < perm.len() {
        if counters[i] < i {
            let j = if i % 2 == 0 { 0 } else { counters[i] };
            perm.swap(j, i);
            f(&perm);
            counters[i] += 1;
            i = 1;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
}

const SMALL_SET: [&str; 6] = ["a", "b", "c", "aa", "ab", "ba"];

#[test]
fn exhaustive_insert_order_small_set() {
    for_each_permutation(&SMALL_SET, |perm| {
        let t: ConcurrentTree<&str, u64> = ConcurrentTree::new();
        let mut m: BTreeMap<&str, u64> = BTreeMap::new();

        for (i, &k) in perm.iter().enumerate() {
            let v = i as u64;
            assert_eq!(t.insert(k, v).unwrap().replaced(), m.insert(k, v));
        }

        validate_tree(&t);
        let expected: Vec<(&str, u64)> = m.into_iter().collect();
        assert_eq!(t.snapshot(), expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    // Every insert order crossed with every removal order is 518k trees; a
    // few fixed shapes are enough to reach each deletion case.
    let shapes: [[&str; 6]; 3] = [
        ["b", "a", "c", "aa", "ab", "ba"],
        ["ab", "a", "c", "aa", "b", "ba"],
        ["a", "aa", "ab", "b", "ba", "c"],
    ];

    for shape in shapes {
        for_each_permutation(&SMALL_SET, |perm| {
            let t: ConcurrentTree<&str, usize> = ConcurrentTree::new();
            let mut m: BTreeMap<&str, usize> = BTreeMap::new();
            for (i, k) in shape.iter().enumerate() {
                let _ = t.insert(*k, i).unwrap();
                m.insert(*k, i);
            }

            for &k in perm {
                assert_eq!(t.remove(k), m.remove(k));
                assert_eq!(t.len(), m.len());
                validate_tree(&t);
                assert_eq!(t.keys(), m.keys().copied().collect::<Vec<_>>());
            }
            assert!(t.is_empty());
            assert!(t.inner.read().root.is_null());
        });
    }
}

#[test]
fn two_children_delete_promotes_successor_key() {
    for_each_permutation(&SMALL_SET, |perm| {
        let t: ConcurrentTree<&str, ()> = ConcurrentTree::new();
        for k in perm {
            let _ = t.insert(*k, ()).unwrap();
        }
        let root = perm[0];
        let has_two_children = {
            let inner = t.inner.read();
            let guard = inner.arena.lock(inner.root);
            !guard.node().left.is_null() && !guard.node().right.is_null()
        };
        if !has_two_children {
            return;
        }

        let before = t.keys();
        let pos = before.iter().position(|k| *k == root).unwrap();
        let successor = before[pos + 1];

        assert_eq!(t.remove(root), Some(()));
        assert_eq!(t.root_key(), Some(successor));
        validate_tree(&t);

        let mut expected = before.clone();
        expected.remove(pos);
        assert_eq!(t.keys(), expected);
    });
}
