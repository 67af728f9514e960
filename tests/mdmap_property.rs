use dataloom::mdmap::MdMap;
use dataloom::types::VertexIndex;
use proptest::prelude::*;
use std::collections::BTreeMap;

// Generators shared by the MdMap property tests: rank-2 indices with small
// components keep the space dense enough to exercise overwrites and prefix
// scans.

fn index_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..4, 2)
}

fn entries_strategy() -> impl Strategy<Value = Vec<(Vec<usize>, i32)>> {
    prop::collection::vec((index_strategy(), any::<i32>()), 0..32)
}

fn build(entries: &[(Vec<usize>, i32)]) -> (MdMap<i32>, BTreeMap<Vec<usize>, i32>) {
    let mut reference: BTreeMap<Vec<usize>, i32> = BTreeMap::new();
    let mut map: MdMap<i32> = MdMap::new(2);
    for (k, v) in entries {
        reference.insert(k.clone(), *v);
        map = map.add(VertexIndex::from(k.clone()), *v);
    }
    (map, reference)
}

proptest! {
    #[test]
    fn behaves_like_an_ordered_map(entries in entries_strategy()) {
        let (map, reference) = build(&entries);
        prop_assert_eq!(map.len(), reference.len());
        for (k, v) in &reference {
            prop_assert_eq!(map.find(&VertexIndex::from(k.clone())), Some(v));
        }
        let got: Vec<Vec<usize>> = map.indices().map(|i| i.components().to_vec()).collect();
        let expected: Vec<Vec<usize>> = reference.keys().cloned().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prefix_scan_equals_filter(entries in entries_strategy(), first in 0usize..4) {
        let (map, _) = build(&entries);
        let prefix = VertexIndex::from(vec![first]);
        let scanned: Vec<VertexIndex> = map
            .starting_with(&prefix)
            .map(|(i, _)| i.clone())
            .collect();
        let filtered: Vec<VertexIndex> = map
            .iter()
            .filter(|(i, _)| i.starts_with(&prefix))
            .map(|(i, _)| i.clone())
            .collect();
        prop_assert_eq!(scanned, filtered);
    }

    #[test]
    fn snapshots_survive_later_mutation(entries in entries_strategy(), extra in index_strategy()) {
        let (map, reference) = build(&entries);
        let snapshot = map.clone();
        let mutated = map.add(VertexIndex::from(extra.clone()), i32::MAX);
        prop_assert_eq!(mutated.find(&VertexIndex::from(extra)), Some(&i32::MAX));
        // The snapshot taken before the mutation is untouched.
        prop_assert_eq!(snapshot.len(), reference.len());
        prop_assert_eq!(&snapshot, &build(&entries).0);
    }

    #[test]
    fn map_preserves_structure(entries in entries_strategy()) {
        let (map, _) = build(&entries);
        let doubled = map.map(|_, v| i64::from(*v) * 2);
        prop_assert_eq!(map.len(), doubled.len());
        for (i, v) in map.iter() {
            prop_assert_eq!(doubled.find(i), Some(&(i64::from(*v) * 2)));
        }
    }
}
