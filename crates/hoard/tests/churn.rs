// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![expect(missing_docs, reason = "Test code")]

//! Sustained concurrent churn against the process-wide shared pool.
//!
//! This test lives in its own binary so nothing else in the test suite touches the
//! same shared singleton while it runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use hoard::SharedPool;

static LIVE_ELEMENTS: AtomicUsize = AtomicUsize::new(0);

struct Churned {
    in_use: AtomicBool,
}

impl Default for Churned {
    fn default() -> Self {
        LIVE_ELEMENTS.fetch_add(1, Ordering::Relaxed);
        Self {
            in_use: AtomicBool::new(false),
        }
    }
}

impl Drop for Churned {
    fn drop(&mut self) {
        LIVE_ELEMENTS.fetch_sub(1, Ordering::Relaxed);
    }
}

#[test]
fn churn_many_threads_without_losing_or_duplicating_elements() {
    const THREADS: u64 = 32;
    const MAX_HELD: usize = 4;

    let base_cycles: usize = if cfg!(debug_assertions) { 10_000 } else { 100_000 };

    let pool = SharedPool::<Box<Churned>>::shared();

    thread::scope(|scope| {
        for worker in 0..THREADS {
            scope.spawn(move || {
                // Seeded per worker so a failing interleaving replays deterministically.
                let mut rng = fastrand::Rng::with_seed(0x9E37_79B9_7F4A_7C15 ^ worker);
                let cycles = base_cycles + rng.usize(..base_cycles / 10);
                let mut held: Vec<Box<Churned>> = Vec::with_capacity(MAX_HELD);

                for _ in 0..cycles {
                    // Randomize the traffic shape: workers drift between strict
                    // rent/return pairs and holding a small working set, so returns
                    // land on cells, shards and the reserve in shifting patterns.
                    if held.is_empty() || (held.len() < MAX_HELD && rng.bool()) {
                        let element = pool.rent();

                        // Exclusivity: no other thread may hold this element right now.
                        assert!(
                            !element.in_use.swap(true, Ordering::AcqRel),
                            "element observed by two threads"
                        );
                        held.push(element);
                    } else {
                        let element = held.swap_remove(rng.usize(..held.len()));
                        element.in_use.store(false, Ordering::Release);
                        pool.give_back(element);
                    }
                }

                for element in held {
                    element.in_use.store(false, Ordering::Release);
                    pool.give_back(element);
                }
            });
        }
    });

    // Workers are done; everything still cached is in the pool's own tiers (worker
    // thread cells died with their threads). A forced trim must drain it all.
    pool.trim(true);
    assert_eq!(pool.approx_count(), 0);

    // Every constructed element was either freed by the trim or died with a worker
    // thread's cell; none leaked into limbo. The main thread holds none.
    assert_eq!(LIVE_ELEMENTS.load(Ordering::Relaxed), 0);
}
