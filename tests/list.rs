use std::thread;
use std::time::Instant;

use purgatory_list::error::Error;
use purgatory_list::list::List;

#[test]
fn walks_in_insertion_order() {
    let list = List::<i32>::from_values([1, 2, 3, 4]);
    assert_eq!(list.size(), 4);
    let mut it = list.begin();
    let mut seen = Vec::new();
    while it != list.end() {
        seen.push(*it.get());
        it.advance();
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
}

#[test]
fn push_front_prepends_and_push_back_appends() {
    let list = List::<i32>::new();
    list.push_back(2);
    list.push_front(1);
    list.push_back(3);
    let mut it = list.begin();
    assert_eq!(*it.get(), 1);
    it.advance();
    assert_eq!(*it.get(), 2);
    it.advance();
    assert_eq!(*it.get(), 3);
}

#[test]
fn erase_advances_to_successor_and_shrinks_size() {
    let list = List::<i32>::from_values([1, 2, 3]);
    let mut it = list.begin();
    it.advance();
    let after = list.erase(&mut it).unwrap();
    assert_eq!(*after.get(), 3);
    assert_eq!(*it.get(), 3);
    assert_eq!(list.size(), 2);
}

#[test]
fn erase_past_tail_is_out_of_range() {
    let list = List::<i32>::new();
    let mut it = list.end();
    assert!(matches!(list.erase(&mut it), Err(Error::OutOfRange)));
}

#[test]
fn pop_front_and_back_drain_to_empty() {
    let list = List::<i32>::from_values([1, 2, 3]);
    list.pop_front().unwrap();
    list.pop_back().unwrap();
    assert_eq!(list.size(), 1);
    assert_eq!(*list.begin().get(), 2);
    list.pop_front().unwrap();
    assert!(list.is_empty());
    assert!(matches!(list.pop_front(), Err(Error::OutOfRange)));
    assert!(matches!(list.pop_back(), Err(Error::OutOfRange)));
}

#[test]
fn erasing_the_same_node_twice_converges() {
    let list = List::<i32>::from_values([1, 2, 3]);
    let mut a = list.begin();
    a.advance();
    let mut b = a.clone();
    let ra = list.erase(&mut a).unwrap();
    let rb = list.erase(&mut b).unwrap();
    assert_eq!(*ra.get(), 3);
    assert_eq!(*rb.get(), 3);
    assert_eq!(list.size(), 2);
}

const NUM_THREADS: usize = 16;
const NUM_INSERTS: usize = 2000;

#[test]
fn concurrent_push_back_reaches_expected_size() {
    let list: List<usize> = List::new();
    let start = Instant::now();
    thread::scope(|s| {
        for t in 0..NUM_THREADS {
            // Refer to the list by reference, same as the iterator's own
            // borrow -- no Arc needed since every method takes `&self`.
            let list = &list;
            s.spawn(move || {
                for i in 0..NUM_INSERTS {
                    list.push_back(t * NUM_INSERTS + i);
                }
            });
        }
    });
    assert_eq!(list.size(), NUM_THREADS * NUM_INSERTS);
    let mut count = 0;
    let mut it = list.begin();
    while it != list.end() {
        count += 1;
        it.advance();
    }
    assert_eq!(count, NUM_THREADS * NUM_INSERTS);
    println!("time elapsed (usec) {}", start.elapsed().as_micros());
}

#[test]
fn concurrent_pop_front_never_double_counts() {
    let list: List<usize> = List::from_values(0..(NUM_THREADS * NUM_INSERTS));
    let popped = std::sync::atomic::AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..NUM_THREADS {
            let list = &list;
            let popped = &popped;
            s.spawn(move || {
                for _ in 0..NUM_INSERTS {
                    if list.pop_front().is_ok() {
                        popped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            });
        }
    });
    assert_eq!(
        popped.load(std::sync::atomic::Ordering::Relaxed),
        NUM_THREADS * NUM_INSERTS
    );
    assert!(list.is_empty());
    assert!(matches!(list.pop_front(), Err(Error::OutOfRange)));
}

#[test]
fn concurrent_iteration_survives_concurrent_erasure() {
    let list: List<usize> = List::from_values(0..5000);
    thread::scope(|s| {
        for _ in 0..4 {
            let list = &list;
            s.spawn(move || {
                for _ in 0..500 {
                    let _ = list.pop_front();
                }
            });
        }
        let list = &list;
        s.spawn(move || {
            let mut it = list.begin();
            let mut count = 0;
            while it != list.end() {
                let _ = it.get();
                it.advance();
                count += 1;
            }
            assert!(count <= 5000);
        });
    });
    assert!(list.size() <= 5000);
}

/// No live node should ever leak: once every handle into the list is
/// dropped, `Drop for List` must drain every node it owned.
#[test]
fn drop_frees_all_nodes() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counted(Arc<AtomicUsize>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    let live = Arc::new(AtomicUsize::new(0));
    {
        let list = List::<Counted>::new();
        for _ in 0..100 {
            live.fetch_add(1, Ordering::SeqCst);
            list.push_back(Counted(live.clone()));
        }
        assert_eq!(live.load(Ordering::SeqCst), 100);
    }
    // Dropping the list joins the cleaner thread only once purgatory has
    // fully drained, so every value's destructor has already run here.
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn async_tasks_can_share_a_list_by_reference() -> Result<(), Box<dyn std::error::Error>> {
    let list: &'static List<usize> = Box::leak(Box::new(List::new()));
    let mut handles = Vec::new();
    for t in 0..8 {
        handles.push(tokio::spawn(async move {
            for i in 0..500 {
                list.push_back(t * 500 + i);
            }
        }));
    }
    for h in handles {
        h.await?;
    }
    assert_eq!(list.size(), 4000);
    Ok(())
}
