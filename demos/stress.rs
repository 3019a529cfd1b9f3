// Concurrent workload demo for `purgatory_list::List`.
//
// Spawns a mix of pushers, poppers, and a walking iterator against one
// shared list and reports how long each phase took, the same worker-thread
// shape the crate's own test suite uses but run as a standalone binary for
// manual poking at larger thread/iteration counts.

use std::thread;
use std::time::Instant;

use purgatory_list::list::List;
use tracing::info;

const NUM_PUSHERS: usize = 8;
const NUM_POPPERS: usize = 4;
const INSERTS_PER_PUSHER: usize = 50_000;

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting purgatory-list stress demo");

    let list: List<u64> = List::new();
    let start = Instant::now();

    thread::scope(|s| {
        for t in 0..NUM_PUSHERS {
            let list = &list;
            s.spawn(move || {
                for i in 0..INSERTS_PER_PUSHER {
                    list.push_back((t * INSERTS_PER_PUSHER + i) as u64);
                }
            });
        }

        for _ in 0..NUM_POPPERS {
            let list = &list;
            s.spawn(move || {
                let mut popped = 0usize;
                while popped < INSERTS_PER_PUSHER {
                    if list.pop_front().is_ok() {
                        popped += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            });
        }

        let list = &list;
        s.spawn(move || {
            for _ in 0..200 {
                let mut it = list.begin();
                let mut count = 0usize;
                while it != list.end() {
                    let _ = it.get();
                    it.advance();
                    count += 1;
                }
                info!(count, "walked list");
                thread::sleep(std::time::Duration::from_millis(5));
            }
        });
    });

    info!(
        remaining = list.size(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "stress demo finished"
    );
}
