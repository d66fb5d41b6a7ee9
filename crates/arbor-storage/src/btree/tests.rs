use super::*;
use crate::btree::constants::MAX_FIELD_LEN;
use arbor_common::{ArborError, TreeConfig};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;

fn memory_tree<K, V>(
    inner_order: usize,
    leaf_order: usize,
    codec: Arc<dyn NodeCodec<K, V>>,
    comparator: Arc<dyn KeyComparator<K>>,
) -> (Arc<MemoryPageStore>, BPlusTree<K, V>)
where
    K: Field,
    V: Field,
{
    let store = Arc::new(MemoryPageStore::new(0));
    let tree = BPlusTree::create(
        store.clone(),
        TreeConfig::with_orders(inner_order, leaf_order),
        codec,
        comparator,
    )
    .unwrap();
    (store, tree)
}

fn u64_tree(inner_order: usize, leaf_order: usize) -> (Arc<MemoryPageStore>, BPlusTree<u64, u64>) {
    memory_tree(inner_order, leaf_order, Arc::new(PlainCodec), Arc::new(NaturalOrder))
}

fn collect<K: Field, V: Field>(tree: &BPlusTree<K, V>) -> Vec<(K, V)> {
    tree.iter().unwrap().collect::<arbor_common::Result<Vec<_>>>().unwrap()
}

fn assert_no_leaks<K: Field, V: Field>(store: &MemoryPageStore, tree: &BPlusTree<K, V>) {
    let summary = tree.verify().unwrap();
    assert_eq!(store.live_pages(), summary.pages);
}

// =============================================================================
// Lookups and inserts
// =============================================================================

#[test]
fn test_empty_tree() {
    let (store, tree) = u64_tree(2, 2);
    assert_eq!(tree.len(), 0);
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    assert_eq!(tree.root(), tree.first_leaf());
    assert_eq!(tree.get(&1).unwrap(), None);
    assert!(collect(&tree).is_empty());
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_put_get_overwrite() {
    let (_store, mut tree) = u64_tree(2, 2);
    assert_eq!(tree.put(5, 50).unwrap(), None);
    assert_eq!(tree.put(3, 30).unwrap(), None);
    assert_eq!(tree.put(5, 55).unwrap(), Some(50));
    assert_eq!(tree.len(), 2);
    assert_eq!(tree.get(&5).unwrap(), Some(55));
    assert_eq!(tree.get(&3).unwrap(), Some(30));
    assert_eq!(tree.get(&4).unwrap(), None);
    assert!(tree.contains_key(&3).unwrap());
    assert!(!tree.contains_key(&4).unwrap());
}

#[test]
fn test_ascending_inserts_split_root() {
    let (store, mut tree) = u64_tree(2, 2);
    for key in 1..=10u64 {
        tree.put(key, key * 10).unwrap();
    }
    let stats = tree.stats();
    assert_eq!(stats.root_splits, 1);
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.len(), 10);
    for key in 1..=10u64 {
        assert_eq!(tree.get(&key).unwrap(), Some(key * 10));
    }
    let keys: Vec<u64> = collect(&tree).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, (1..=10).collect::<Vec<_>>());
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_shuffled_inserts_grow_several_levels() {
    let (store, mut tree) = u64_tree(2, 2);
    let mut keys: Vec<u64> = (0..2_000).collect();
    keys.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));
    for &key in &keys {
        tree.put(key, key + 1).unwrap();
    }
    assert!(tree.height() >= 4);
    assert!(tree.stats().inner_splits > 0);
    for key in 0..2_000u64 {
        assert_eq!(tree.get(&key).unwrap(), Some(key + 1));
    }
    assert_eq!(tree.verify().unwrap().entries, 2_000);
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_descending_inserts_keep_separators() {
    let (_store, mut tree) = u64_tree(2, 3);
    for key in (0..300u64).rev() {
        tree.put(key, key).unwrap();
        if key % 50 == 0 {
            tree.verify().unwrap();
        }
    }
    tree.verify().unwrap();
    assert_eq!(collect(&tree).len(), 300);
}

#[test]
fn test_inserts_past_maximum_update_separators() {
    let (_store, mut tree) = u64_tree(2, 2);
    for key in [10u64, 20, 30, 40, 50, 60] {
        tree.put(key, 0).unwrap();
    }
    tree.put(65, 0).unwrap();
    tree.put(70, 0).unwrap();
    tree.verify().unwrap();
    assert_eq!(tree.get(&65).unwrap(), Some(0));
    assert_eq!(tree.get(&70).unwrap(), Some(0));
    assert_eq!(tree.get(&66).unwrap(), None);
}

// =============================================================================
// Removal
// =============================================================================

#[test]
fn test_remove_absent_key_writes_nothing() {
    let (store, mut tree) = u64_tree(2, 2);
    for key in 1..=10u64 {
        tree.put(key, key).unwrap();
    }
    store.reset_counters();
    assert_eq!(tree.remove(&42).unwrap(), None);
    assert_eq!(store.write_count(), 0);
    assert_eq!(tree.len(), 10);
}

#[test]
fn test_remove_collapses_root() {
    let (store, mut tree) = u64_tree(2, 2);
    for key in 1..=10u64 {
        tree.put(key, key).unwrap();
    }
    assert_eq!(tree.height(), 2);
    for key in 1..=8u64 {
        assert_eq!(tree.remove(&key).unwrap(), Some(key));
        tree.verify().unwrap();
    }
    assert_eq!(tree.height(), 1);
    assert!(tree.stats().root_collapses >= 1);
    assert_eq!(collect(&tree), vec![(9, 9), (10, 10)]);
    assert_eq!(tree.root(), tree.first_leaf());
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_remove_everything_in_random_order() {
    let (store, mut tree) = u64_tree(2, 2);
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let mut keys: Vec<u64> = (0..1_000).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        tree.put(key, key).unwrap();
    }
    keys.shuffle(&mut rng);
    for (i, &key) in keys.iter().enumerate() {
        assert_eq!(tree.remove(&key).unwrap(), Some(key));
        if i % 97 == 0 {
            assert_no_leaks(&store, &tree);
        }
    }
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    let stats = tree.stats();
    assert!(stats.merges > 0);
    assert!(stats.borrows > 0);
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_remove_largest_keys_updates_separators() {
    let (_store, mut tree) = u64_tree(2, 2);
    for key in 1..=40u64 {
        tree.put(key, key).unwrap();
    }
    for key in (21..=40u64).rev() {
        tree.remove(&key).unwrap();
        tree.verify().unwrap();
    }
    for key in 1..=20u64 {
        assert_eq!(tree.get(&key).unwrap(), Some(key));
    }
    assert_eq!(tree.get(&21).unwrap(), None);
}

#[test]
fn test_split_then_merge_restores_content() {
    let (store, mut tree) = u64_tree(2, 2);
    for key in 1..=4u64 {
        tree.put(key, key).unwrap();
    }
    let before = collect(&tree);
    let pages_before = store.live_pages();

    tree.put(5, 5).unwrap();
    assert_eq!(tree.stats().leaf_splits, 1);
    assert_eq!(tree.height(), 2);
    tree.remove(&5).unwrap();
    assert_eq!(collect(&tree), before);

    // Underflow the left leaf so the pair merges and the root collapses.
    tree.remove(&1).unwrap();
    assert_eq!(tree.stats().merges, 1);
    assert_eq!(tree.stats().root_collapses, 1);
    tree.put(1, 1).unwrap();

    assert_eq!(collect(&tree), before);
    assert_eq!(store.live_pages(), pages_before);
    assert_eq!(tree.height(), 1);
}

// =============================================================================
// Bulk loading
// =============================================================================

#[test]
fn test_bulk_load_partitions_leaves() {
    let (store, mut tree) = u64_tree(2, 2);
    tree.bulk_load((1..=10u64).map(|k| (k, k * 2)), 10).unwrap();

    let summary = tree.verify().unwrap();
    assert_eq!(summary.leaf_nodes, 5);
    assert_eq!(summary.inner_nodes, 1);
    assert_eq!(summary.height, 2);
    assert_eq!(tree.len(), 10);

    let first = tree.read_leaf(tree.first_leaf()).unwrap();
    assert_eq!(first.entries.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(collect(&tree), (1..=10u64).map(|k| (k, k * 2)).collect::<Vec<_>>());
    assert_no_leaks(&store, &tree);

    // 10 entries do not split into leaves of 4, so the remainder is spread.
    let (store, mut tree) = u64_tree(2, 4);
    tree.bulk_load((1..=10u64).map(|k| (k, k)), 10).unwrap();
    let summary = tree.verify().unwrap();
    assert_eq!(summary.leaf_nodes, 2);
    let first = tree.read_leaf(tree.first_leaf()).unwrap();
    assert_eq!(first.entries.len(), 5);
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_bulk_load_inner_levels_respect_fill_bounds() {
    let (store, mut tree) = u64_tree(2, 2);
    // 40 leaves of 2, then 13 and 4 inner nodes, then the root.
    tree.bulk_load((0..80u64).map(|k| (k, k)), 80).unwrap();
    let summary = tree.verify().unwrap();
    assert_eq!(summary.leaf_nodes, 40);
    assert_eq!(summary.inner_nodes, 13 + 4 + 1);
    assert_eq!(summary.height, 4);
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_bulk_load_large_builds_valid_tree() {
    let (store, mut tree) = u64_tree(3, 4);
    let count = 25_000u64;
    tree.bulk_load((0..count).map(|k| (k * 3, k)), count).unwrap();
    let summary = tree.verify().unwrap();
    assert_eq!(summary.entries, count);
    assert!(summary.height >= 4);
    assert_eq!(tree.get(&(3 * 1234)).unwrap(), Some(1234));
    assert_eq!(tree.get(&(3 * 1234 + 1)).unwrap(), None);
    assert_eq!(tree.stats().bulk_loads, 1);
    assert_no_leaks(&store, &tree);

    // The loaded tree stays mutable.
    tree.put(1, 1).unwrap();
    tree.remove(&0).unwrap();
    tree.verify().unwrap();
}

#[test]
fn test_bulk_load_empty_and_small() {
    let (store, mut tree) = u64_tree(2, 2);
    tree.put(1, 1).unwrap();
    tree.bulk_load(std::iter::empty(), 0).unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    assert_no_leaks(&store, &tree);

    tree.bulk_load([(4u64, 4u64), (7, 7)], 2).unwrap();
    assert_eq!(collect(&tree), vec![(4, 4), (7, 7)]);
    assert_eq!(tree.height(), 1);
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_bulk_load_rejects_unsorted_input() {
    let (store, mut tree) = u64_tree(2, 2);
    for key in 1..=6u64 {
        tree.put(key, key).unwrap();
    }
    let before = collect(&tree);
    let pages = store.live_pages();

    let input = vec![(1u64, 0u64), (2, 0), (3, 0), (3, 0), (5, 0)];
    let err = tree.bulk_load(input, 5).unwrap_err();
    assert!(matches!(err, ArborError::UnsortedInput { position: 3 }));
    assert_eq!(collect(&tree), before);
    assert_eq!(store.live_pages(), pages);
}

#[test]
fn test_oversized_value_is_rejected_and_tree_stays_usable() {
    let (store, mut tree) =
        memory_tree::<u64, Vec<u8>>(2, 2, Arc::new(PlainCodec), Arc::new(NaturalOrder));
    for key in [1u64, 3, 5] {
        tree.put(key, vec![key as u8; 8]).unwrap();
    }
    let pages = store.live_pages();

    let oversized = vec![7u8; MAX_FIELD_LEN + 1];
    let err = tree.put(2, oversized.clone()).unwrap_err();
    assert!(matches!(err, ArborError::FieldTooLarge { .. }));
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.get(&2).unwrap(), None);
    assert_eq!(store.live_pages(), pages);

    let err = tree
        .bulk_load([(1u64, vec![1u8]), (2, oversized)], 2)
        .unwrap_err();
    assert!(matches!(err, ArborError::FieldTooLarge { .. }));
    assert_eq!(store.live_pages(), pages);

    assert_eq!(tree.remove(&3).unwrap(), Some(vec![3u8; 8]));
    tree.put(2, vec![2u8; MAX_FIELD_LEN]).unwrap();
    assert_eq!(tree.get(&2).unwrap().map(|v| v.len()), Some(MAX_FIELD_LEN));
    assert_eq!(tree.remove(&2).unwrap().map(|v| v.len()), Some(MAX_FIELD_LEN));
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_bulk_load_rejects_count_mismatch() {
    let (store, mut tree) = u64_tree(2, 2);
    let pages = store.live_pages();

    let err = tree.bulk_load((0..5u64).map(|k| (k, k)), 6).unwrap_err();
    assert!(matches!(
        err,
        ArborError::CountMismatch {
            expected: 6,
            actual: 5
        }
    ));
    let err = tree.bulk_load((0..7u64).map(|k| (k, k)), 6).unwrap_err();
    assert!(matches!(err, ArborError::CountMismatch { expected: 6, .. }));
    assert_eq!(store.live_pages(), pages);
    assert!(tree.is_empty());
}

// =============================================================================
// SIP cursors
// =============================================================================

#[test]
fn test_prefix_search_exact_keys() {
    let (_store, mut tree) = u64_tree(2, 2);
    tree.bulk_load((0..100u64).map(|k| (k * 2, k)), 100).unwrap();

    let mut cursor = tree.prefix_search(10).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap(), (10, 5));
    assert!(cursor.next().is_none());

    let mut cursor = tree.prefix_search(11).unwrap();
    assert!(cursor.next().is_none());
}

#[test]
fn test_prefix_search_byte_prefixes() {
    let (_store, mut tree) = memory_tree::<String, u32>(
        2,
        2,
        Arc::new(PrefixCodec),
        Arc::new(PrefixOrder),
    );
    let words = ["apple", "apricot", "banana", "band", "bandana", "bank", "cherry"];
    for (i, word) in words.iter().enumerate() {
        tree.put(word.to_string(), i as u32).unwrap();
    }

    let matches: Vec<String> = tree
        .prefix_search("ban".to_string())
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(matches, vec!["banana", "band", "bandana", "bank"]);

    let matches: Vec<String> = tree
        .prefix_search_from("ban".to_string(), "band".to_string())
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(matches, vec!["band", "bandana", "bank"]);

    let matches: Vec<String> = tree
        .prefix_search_max("ban".to_string(), "bandana".to_string())
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(matches, vec!["banana", "band", "bandana"]);

    assert!(tree
        .prefix_search("zzz".to_string())
        .unwrap()
        .next()
        .is_none());
}

#[test]
fn test_next_probe_walks_forward() {
    let (_store, mut tree) = u64_tree(2, 2);
    tree.bulk_load((0..1_000u64).map(|k| (k, k * 10)), 1_000).unwrap();

    let mut cursor = tree.prefix_search(3).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap(), (3, 30));
    assert_eq!(cursor.next_probe(250).unwrap(), Some((250, 2_500)));
    assert_eq!(cursor.next_probe(251).unwrap(), Some((251, 2_510)));
    assert_eq!(cursor.next_probe(999).unwrap(), Some((999, 9_990)));
    assert_eq!(cursor.next_probe(1_500).unwrap(), None);
    assert!(cursor.is_closed());
}

#[test]
fn test_next_probe_rejects_smaller_probe() {
    let (_store, mut tree) = u64_tree(2, 2);
    tree.bulk_load((0..50u64).map(|k| (k, k)), 50).unwrap();

    let mut cursor = tree.prefix_search(20).unwrap();
    assert!(matches!(
        cursor.next_probe(10),
        Err(ArborError::InvalidProbeOrder)
    ));
    assert_eq!(cursor.next_probe(20).unwrap(), Some((20, 20)));
}

#[test]
fn test_repeated_search_key_matches_again() {
    let (_store, mut tree) = u64_tree(2, 2);
    tree.bulk_load((0..100u64).map(|k| (k, k)), 100).unwrap();

    let mut cursor = tree.prefix_search(40).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap(), (40, 40));
    assert_eq!(cursor.next_probe(40).unwrap(), Some((40, 40)));
    assert_eq!(cursor.next_probe(40).unwrap(), Some((40, 40)));
    assert_eq!(cursor.next_probe(41).unwrap(), Some((41, 41)));
    assert_eq!(cursor.next_probe(99).unwrap(), Some((99, 99)));
    assert_eq!(cursor.next_probe(99).unwrap(), Some((99, 99)));
    assert_eq!(cursor.next_probe(100).unwrap(), None);
}

#[test]
fn test_repeated_prefix_replays_every_match() {
    let (_store, mut tree) = memory_tree::<String, u32>(
        2,
        2,
        Arc::new(PrefixCodec),
        Arc::new(PrefixOrder),
    );
    let words = ["apple", "banana", "band", "bandana", "bank", "cherry"];
    for (i, word) in words.iter().enumerate() {
        tree.put(word.to_string(), i as u32).unwrap();
    }

    let mut cursor = tree.prefix_search("ban".to_string()).unwrap();
    assert_eq!(cursor.by_ref().count(), 4);
    let first = cursor.next_probe("ban".to_string()).unwrap();
    assert_eq!(first.map(|(k, _)| k), Some("banana".to_string()));
    let rest: Vec<String> = cursor.by_ref().map(|entry| entry.unwrap().0).collect();
    assert_eq!(rest, vec!["band", "bandana", "bank"]);
    let next = cursor.next_probe("ch".to_string()).unwrap();
    assert_eq!(next.map(|(k, _)| k), Some("cherry".to_string()));
}

#[test]
fn test_next_probe_bounded_stops_at_largest() {
    let (_store, mut tree) = u64_tree(2, 2);
    tree.bulk_load((0..100u64).map(|k| (k * 10, k)), 100).unwrap();

    let mut cursor = tree.prefix_search(0).unwrap();
    assert_eq!(cursor.next_probe_bounded(500, 600).unwrap(), Some((500, 50)));
    assert_eq!(cursor.next_probe(700).unwrap(), None);
    assert!(cursor.is_closed());
}

#[test]
fn test_rejected_bounded_move_keeps_previous_bound() {
    let (_store, mut tree) = u64_tree(2, 2);
    tree.bulk_load((0..100u64).map(|k| (k * 10, k)), 100).unwrap();

    let mut cursor = tree.prefix_search(500).unwrap();
    assert!(matches!(
        cursor.next_probe_bounded(400, 450),
        Err(ArborError::InvalidProbeOrder)
    ));
    assert!(!cursor.is_closed());
    assert_eq!(cursor.next_probe(700).unwrap(), Some((700, 70)));
}

#[test]
fn test_next_probe_missing_keys_keep_lookahead() {
    let (_store, mut tree) = u64_tree(2, 2);
    let keys: Vec<u64> = (0..200).map(|k| k * 5).collect();
    tree.bulk_load(keys.iter().map(|&k| (k, k)), keys.len() as u64).unwrap();

    let mut cursor = tree.prefix_search(1).unwrap();
    assert!(cursor.next().is_none());
    for probe in 2..1_000u64 {
        let expected = (probe % 5 == 0).then_some((probe, probe));
        assert_eq!(cursor.next_probe(probe).unwrap(), expected, "probe {probe}");
    }
}

#[test]
fn test_sip_reads_fewer_pages_than_point_lookups() {
    let (store, mut tree) = u64_tree(4, 4);
    tree.bulk_load((0..10_000u64).map(|k| (k, k)), 10_000).unwrap();
    let probes: Vec<u64> = (0..100).map(|i| i * 100).collect();

    store.reset_counters();
    for probe in &probes {
        assert_eq!(tree.get(probe).unwrap(), Some(*probe));
    }
    let lookup_reads = store.read_count();

    store.reset_counters();
    let mut cursor = tree.prefix_search(probes[0]).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap().0, probes[0]);
    for &probe in &probes[1..] {
        assert_eq!(cursor.next_probe(probe).unwrap().map(|(k, _)| k), Some(probe));
    }
    drop(cursor);
    let sip_reads = store.read_count();

    assert!(
        sip_reads < lookup_reads,
        "SIP read {sip_reads} pages, lookups read {lookup_reads}"
    );
}

#[test]
fn test_cursor_close_is_idempotent() {
    let (_store, mut tree) = u64_tree(2, 2);
    tree.bulk_load((0..20u64).map(|k| (k, k)), 20).unwrap();
    let mut cursor = tree.prefix_search(5).unwrap();
    cursor.close();
    cursor.close();
    assert!(cursor.next().is_none());
    assert_eq!(cursor.next_probe(6).unwrap(), None);
}

#[test]
fn test_reverse_order_tree() {
    let (_store, mut tree) =
        memory_tree::<u64, u64>(2, 2, Arc::new(PlainCodec), Arc::new(ReverseOrder));
    for key in 0..50u64 {
        tree.put(key, key).unwrap();
    }
    tree.verify().unwrap();
    let keys: Vec<u64> = collect(&tree).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, (0..50).rev().collect::<Vec<_>>());

    let mut cursor = tree.prefix_search(40).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap(), (40, 40));
    assert_eq!(cursor.next_probe(12).unwrap(), Some((12, 12)));
}

// =============================================================================
// Scans, codecs and configuration
// =============================================================================

#[test]
fn test_range_scan_bounds() {
    let (_store, mut tree) = u64_tree(2, 2);
    tree.bulk_load((0..100u64).map(|k| (k * 2, k)), 100).unwrap();

    let keys: Vec<u64> = tree
        .range(Some(11), Some(21))
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, vec![12, 14, 16, 18, 20]);

    let keys: Vec<u64> = tree
        .range(None, Some(4))
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, vec![0, 2, 4]);

    let scan = tree.range(Some(190), None).unwrap();
    assert_eq!(scan.count(), 5);
}

#[test]
fn test_delta_codec_tree() {
    let (store, mut tree) =
        memory_tree::<u64, String>(2, 8, Arc::new(DeltaCodec), Arc::new(NaturalOrder));
    for key in (0..500u64).map(|k| k * 7) {
        tree.put(key, format!("v{key}")).unwrap();
    }
    for key in (0..500u64).filter(|k| k % 3 == 0).map(|k| k * 7) {
        tree.remove(&key).unwrap();
    }
    assert_eq!(tree.get(&7).unwrap(), Some("v7".to_string()));
    assert_eq!(tree.get(&0).unwrap(), None);
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_delta_codec_rejects_reverse_order() {
    let store = Arc::new(MemoryPageStore::new(0));
    let err = BPlusTree::<u64, u64>::create(
        store,
        TreeConfig::default(),
        Arc::new(DeltaCodec),
        Arc::new(ReverseOrder),
    )
    .unwrap_err();
    assert!(matches!(err, ArborError::ConfigError(_)));
}

#[test]
fn test_zero_order_rejected() {
    let store = Arc::new(MemoryPageStore::new(0));
    let err = BPlusTree::<u64, u64>::create(
        store,
        TreeConfig::with_orders(0, 2),
        Arc::new(PlainCodec),
        Arc::new(NaturalOrder),
    )
    .unwrap_err();
    assert!(matches!(err, ArborError::ConfigError(_)));
}

#[test]
fn test_large_values_use_overflow_pages() {
    let (store, mut tree) =
        memory_tree::<u64, Vec<u8>>(2, 4, Arc::new(PlainCodec), Arc::new(NaturalOrder));
    for key in 0..40u64 {
        tree.put(key, vec![key as u8; 1_500]).unwrap();
    }
    let summary = tree.verify().unwrap();
    assert!(summary.pages > summary.leaf_nodes + summary.inner_nodes);
    assert_eq!(tree.get(&17).unwrap(), Some(vec![17u8; 1_500]));

    for key in 0..40u64 {
        tree.remove(&key).unwrap();
    }
    assert_no_leaks(&store, &tree);
    assert_eq!(store.live_pages(), 1);
}

#[test]
fn test_read_only_view_rejects_mutations() {
    let (_store, mut tree) = u64_tree(2, 2);
    tree.put(1, 1).unwrap();
    let mut view = tree.read_only();
    assert!(view.is_read_only());
    assert_eq!(view.get(&1).unwrap(), Some(1));
    assert!(matches!(view.put(2, 2), Err(ArborError::Unsupported(_))));
    assert!(matches!(view.remove(&1), Err(ArborError::Unsupported(_))));
    assert!(matches!(view.clear(), Err(ArborError::Unsupported(_))));
}

#[test]
fn test_unsupported_navigable_operations() {
    let (_store, tree) = u64_tree(2, 2);
    assert!(matches!(tree.head_map(&1), Err(ArborError::Unsupported("head_map"))));
    assert!(matches!(tree.tail_map(&1), Err(ArborError::Unsupported("tail_map"))));
    assert!(matches!(tree.last_key(), Err(ArborError::Unsupported("last_key"))));
}

#[test]
fn test_clear_releases_pages() {
    let (store, mut tree) = u64_tree(2, 2);
    for key in 0..500u64 {
        tree.put(key, key).unwrap();
    }
    tree.clear().unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    assert_eq!(store.live_pages(), 1);
    tree.put(3, 3).unwrap();
    assert_eq!(collect(&tree), vec![(3, 3)]);
}

#[test]
fn test_descriptor_reopens_tree() {
    let (store, mut tree) = u64_tree(3, 3);
    for key in 0..300u64 {
        tree.put(key, key * key).unwrap();
    }
    let descriptor = tree.descriptor();
    let descriptor_page = store.allocate().unwrap();
    descriptor.write_to(&*store, descriptor_page).unwrap();

    let loaded = TreeDescriptor::read_from(&*store, descriptor_page).unwrap();
    let reopened = BPlusTree::<u64, u64>::open(
        store.clone(),
        &loaded,
        TreeConfig::default(),
        Arc::new(PlainCodec),
        Arc::new(NaturalOrder),
    )
    .unwrap();
    assert_eq!(reopened.height(), tree.height());
    assert_eq!(reopened.config().inner_order, 3);
    assert_eq!(collect(&reopened), collect(&tree));

    let err = BPlusTree::<u64, String>::open(
        store,
        &loaded,
        TreeConfig::default(),
        Arc::new(PlainCodec),
        Arc::new(NaturalOrder),
    )
    .unwrap_err();
    assert!(matches!(err, ArborError::DescriptorMismatch { .. }));
}

#[test]
fn test_corrupted_leaf_surfaces_error() {
    let (store, mut tree) = u64_tree(2, 2);
    for key in 0..20u64 {
        tree.put(key, key).unwrap();
    }
    let leaf = tree.first_leaf();
    store.with_page_mut(leaf, |page| page[40] ^= 0xFF).unwrap();

    let err = tree.get(&0).unwrap_err();
    assert!(matches!(err, ArborError::PageCorrupted { .. }));
    let err = tree.verify().unwrap_err();
    assert!(matches!(err, ArborError::PageCorrupted { .. }));
}

#[test]
fn test_truncated_leaf_is_corrupt_encoding() {
    let (store, mut tree) = u64_tree(2, 2);
    for key in 0..3u64 {
        tree.put(key, key).unwrap();
    }
    let root = tree.root();
    let mut writer = NodeWriter::new(root, arbor_common::PageType::BTreeLeaf);
    NodeCodec::<u64, u64>::encode_leaf_entry(&PlainCodec, &0, &0, None, &mut writer).unwrap();
    writer.finish(&*store).unwrap();

    let err = tree.get(&2).unwrap_err();
    assert!(matches!(err, ArborError::CorruptEncoding(_)));
}

#[test]
fn test_shared_tree_concurrent_readers() {
    let (_store, mut tree) = u64_tree(4, 4);
    tree.bulk_load((0..2_000u64).map(|k| (k, k)), 2_000).unwrap();
    let shared = SharedTree::new(tree);

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for key in (t..2_000).step_by(4) {
                    assert_eq!(shared.get(&key).unwrap(), Some(key));
                }
                let guard = shared.read();
                let mut cursor = guard.prefix_search(t * 100).unwrap();
                assert_eq!(cursor.next().unwrap().unwrap().0, t * 100);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    shared.put(5_000, 1).unwrap();
    assert_eq!(shared.len(), 2_001);
    assert_eq!(shared.remove(&5_000).unwrap(), Some(1));
    shared.read().verify().unwrap();
}

#[test]
fn test_matches_btreemap_model() {
    let (store, mut tree) = u64_tree(2, 3);
    let mut model = BTreeMap::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    for step in 0..5_000u64 {
        let key = rand::Rng::gen_range(&mut rng, 0..400u64);
        if rand::Rng::gen_bool(&mut rng, 0.6) {
            assert_eq!(tree.put(key, step).unwrap(), model.insert(key, step));
        } else {
            assert_eq!(tree.remove(&key).unwrap(), model.remove(&key));
        }
    }
    assert_eq!(tree.len(), model.len() as u64);
    assert_eq!(collect(&tree), model.into_iter().collect::<Vec<_>>());
    assert_no_leaks(&store, &tree);
}

#[test]
fn test_outcome_types_are_comparable() {
    assert_eq!(InsertOutcome::<u64>::Unchanged, InsertOutcome::Unchanged);
    assert_ne!(
        RemoveOutcome::Underflow(Some(3u64)),
        RemoveOutcome::Underflow(None)
    );
}
