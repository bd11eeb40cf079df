// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::pressure::MemoryPressure;
use crate::shard::SHARD_CAPACITY;

/// Per-layer pruning parameters, derived once per trim pass from the pressure class.
///
/// The table trades retention against reclamation: under low pressure each pass nibbles
/// one element off a cold shard and a tenth of a cold reserve; under high pressure the
/// age windows collapse and whole layers drain at once. A forced trim ignores age
/// entirely and empties everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrimParams {
    /// How long a shard must sit unobserved before it is pruned.
    pub shard_max_age_ms: u64,

    /// How many elements one pass removes from an eligible shard.
    pub shard_max_drop: usize,

    /// Age threshold for thread-local cells; zero clears them unconditionally.
    pub local_age_ms: u64,

    /// How long the reserve must sit unobserved before it is pruned.
    pub reserve_max_age_ms: u64,

    /// Percentage of the reserve one pass removes once eligible.
    pub reserve_drop_percent: usize,
}

impl TrimParams {
    /// Looks up the parameter row for a pressure class; `None` means a forced trim.
    pub(crate) fn for_pressure(pressure: Option<MemoryPressure>) -> Self {
        match pressure {
            Some(MemoryPressure::Low) => Self {
                shard_max_age_ms: 60_000,
                shard_max_drop: 1,
                local_age_ms: 30_000,
                reserve_max_age_ms: 90_000,
                reserve_drop_percent: 10,
            },
            Some(MemoryPressure::Medium) => Self {
                shard_max_age_ms: 60_000,
                shard_max_drop: 2,
                local_age_ms: 15_000,
                reserve_max_age_ms: 45_000,
                reserve_drop_percent: 30,
            },
            Some(MemoryPressure::High) => Self {
                shard_max_age_ms: 10_000,
                shard_max_drop: SHARD_CAPACITY,
                local_age_ms: 0,
                reserve_max_age_ms: 0,
                reserve_drop_percent: 100,
            },
            None => Self {
                shard_max_age_ms: 0,
                shard_max_drop: SHARD_CAPACITY,
                local_age_ms: 0,
                reserve_max_age_ms: 0,
                reserve_drop_percent: 100,
            },
        }
    }
}

/// A pool the [`Maintainer`] can prune on a schedule.
///
/// Implemented by every pool type in this crate and by the array adapters layered on
/// top of it.
pub trait Trimmable: Send + Sync {
    /// Releases retained elements: adaptively when `force` is false, or all of them
    /// when `force` is true.
    fn trim(&self, force: bool);
}

type WatchList = Arc<Mutex<Vec<Weak<dyn Trimmable>>>>;

/// A background thread that periodically trims pools.
///
/// Hosts with a garbage collector get periodic trimming for free by piggybacking on
/// collection cycles; here the embedder opts in by spawning a maintainer (or by calling
/// [`trim`][Trimmable::trim] / [`trim_shared_pools`][crate::trim_shared_pools] on its
/// own schedule).
///
/// Every pass trims the process-wide shared pools and any pools attached via
/// [`watch`][Self::watch]. Watched pools are held through `Weak` references, so the
/// maintainer never keeps a pool alive; entries whose pool has been dropped are
/// compacted out. Dropping the maintainer stops the thread.
#[derive(Debug)]
pub struct Maintainer {
    stop: Arc<AtomicBool>,
    watched: WatchList,
    thread: Option<JoinHandle<()>>,
}

impl Maintainer {
    /// Spawns the maintenance thread, trimming once per `interval`.
    ///
    /// # Panics
    ///
    /// Panics if the host refuses to spawn a thread.
    #[must_use]
    pub fn spawn(interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let watched: WatchList = Arc::new(Mutex::new(Vec::new()));

        let thread = thread::Builder::new()
            .name("hoard-maintainer".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                let watched = Arc::clone(&watched);
                move || run_maintenance(&stop, &watched, interval)
            })
            .expect("failed to spawn the pool maintenance thread");

        Self {
            stop,
            watched,
            thread: Some(thread),
        }
    }

    /// Adds a pool to the maintenance schedule without keeping it alive.
    pub fn watch<P>(&self, pool: &Arc<P>)
    where
        P: Trimmable + 'static,
    {
        let dyn_pool: Arc<dyn Trimmable> = Arc::clone(pool) as Arc<dyn Trimmable>;
        let weak: Weak<dyn Trimmable> = Arc::downgrade(&dyn_pool);
        self.watched.lock().push(weak);
    }
}

fn run_maintenance(stop: &AtomicBool, watched: &Mutex<Vec<Weak<dyn Trimmable>>>, interval: Duration) {
    loop {
        thread::park_timeout(interval);
        if stop.load(Ordering::Acquire) {
            return;
        }

        crate::shared::trim_shared_pools(false);

        // Upgrade outside the lock so user free policies never run under it.
        let live: Vec<Arc<dyn Trimmable>> = {
            let mut watched = watched.lock();
            let mut live = Vec::with_capacity(watched.len());
            watched.retain(|weak| match weak.upgrade() {
                Some(pool) => {
                    live.push(pool);
                    true
                }
                None => false,
            });
            live
        };

        for pool in live {
            pool.trim(false);
        }
    }
}

impl Drop for Maintainer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);

        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            _ = thread.join();
        }
    }
}
