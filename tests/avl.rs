use std::thread;

use purgatory_list::avl::Map;

#[test]
fn insert_get_remove_round_trip() {
    let map = Map::<i32, &'static str>::new();
    assert!(map.insert(1, "one").is_none());
    assert!(map.insert(2, "two").is_none());
    assert!(map.insert(3, "three").is_none());
    assert_eq!(map.len(), 3);

    assert_eq!(map.get(&2), Some("two"));
    assert_eq!(map.insert(2, "TWO"), Some("two"));
    assert_eq!(map.get(&2), Some("TWO"));
    assert_eq!(map.len(), 3);

    assert_eq!(map.remove(&2), Some("TWO"));
    assert_eq!(map.get(&2), None);
    assert_eq!(map.len(), 2);
}

#[test]
fn iter_is_in_order_despite_insertion_order() {
    let map = Map::<i32, i32>::new();
    for k in [5, 3, 8, 1, 4, 7, 9, 2, 6] {
        map.insert(k, k * 10);
    }
    let collected: Vec<i32> = map.iter().into_iter().map(|(k, _)| k).collect();
    assert_eq!(collected, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn cursor_walks_forward_and_backward() {
    let map = Map::<i32, i32>::new();
    for k in 0..10 {
        map.insert(k, k);
    }
    let mut it = map.begin();
    let mut forward = Vec::new();
    while let Some(k) = it.key().copied() {
        forward.push(k);
        it.advance();
    }
    assert_eq!(forward, (0..10).collect::<Vec<_>>());

    let mut it = map.begin();
    for _ in 0..5 {
        it.advance();
    }
    assert_eq!(it.key(), Some(&5));
    it.retreat();
    assert_eq!(it.key(), Some(&4));
}

/// An iterator built from a key that gets concurrently removed must not
/// panic or observe a torn tree -- it just finds no successor/predecessor
/// through that key anymore.
#[test]
fn cursor_survives_removal_of_its_own_key() {
    let map = Map::<i32, i32>::new();
    for k in 0..20 {
        map.insert(k, k);
    }
    let mut it = map.begin();
    for _ in 0..10 {
        it.advance();
    }
    assert_eq!(it.key(), Some(&10));
    map.remove(&10);
    // The key it was sitting on is gone, but its neighbors are still
    // findable through the (now stale) key value.
    it.advance();
    assert_eq!(it.key(), Some(&11));
}

#[test]
fn concurrent_inserts_all_land() {
    let map: Map<usize, usize> = Map::new();
    thread::scope(|s| {
        for t in 0..8 {
            let map = &map;
            s.spawn(move || {
                for i in 0..250 {
                    map.insert(t * 250 + i, i);
                }
            });
        }
    });
    assert_eq!(map.len(), 2000);
    let collected = map.iter();
    assert_eq!(collected.len(), 2000);
    for w in collected.windows(2) {
        assert!(w[0].0 < w[1].0);
    }
}

#[test]
fn concurrent_insert_and_remove_keeps_len_consistent() {
    let map: Map<usize, usize> = Map::new();
    for k in 0..1000 {
        map.insert(k, k);
    }
    thread::scope(|s| {
        for t in 0..4 {
            let map = &map;
            s.spawn(move || {
                for i in 0..200 {
                    map.remove(&(t * 200 + i));
                }
            });
        }
    });
    assert_eq!(map.len(), 200);
}
