// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::policy::FreePolicy;
use crate::slot::{ElementSlot, LockedSlot};

/// The per-(thread, pool) cache cell: one slot plus an age stamp for the trimmer.
///
/// The owning thread holds the only strong reference (through its thread-local map),
/// so when the thread dies the cell dies with it; the pool's [`CellRegistry`] keeps a
/// weak handle for trim sweeps and never extends the cell's lifetime.
#[derive(Debug)]
pub(crate) struct LocalCell<T> {
    slot: LockedSlot<T>,

    /// Milliseconds at which the trimmer first observed this cell occupied; zero means
    /// unobserved. Any use by the owning thread resets the observation.
    last_touch: AtomicU64,
}

impl<T: Send> LocalCell<T> {
    fn new() -> Self {
        Self {
            slot: LockedSlot::default(),
            last_touch: AtomicU64::new(0),
        }
    }

    /// Takes the cached element, if any.
    pub(crate) fn take(&self) -> Option<T> {
        let value = self.slot.try_claim();
        if value.is_some() {
            self.last_touch.store(0, Ordering::Relaxed);
        }

        value
    }

    /// Caches `value`, returning the displaced prior occupant (or the value itself if
    /// the slot is momentarily held by the trimmer).
    pub(crate) fn exchange(&self, value: T) -> Option<T> {
        self.last_touch.store(0, Ordering::Relaxed);
        self.slot.exchange(value)
    }

    pub(crate) fn is_occupied(&self) -> bool {
        self.slot.is_occupied()
    }

    /// Two-pass age rule: the first trim that sees an occupied cell stamps it, a later
    /// trim past the threshold clears it. A zero threshold clears unconditionally.
    ///
    /// Returns whether an element was released.
    pub(crate) fn trim(&self, now_ms: u64, threshold_ms: u64, policy: &FreePolicy<T>) -> bool {
        if !self.slot.is_occupied() {
            return false;
        }

        if threshold_ms > 0 {
            let touched = self.last_touch.load(Ordering::Relaxed);
            if touched == 0 {
                self.last_touch.store(now_ms, Ordering::Relaxed);
                return false;
            }

            if now_ms.saturating_sub(touched) < threshold_ms {
                return false;
            }
        }

        match self.slot.try_claim() {
            Some(value) => {
                self.last_touch.store(0, Ordering::Relaxed);
                policy.apply(value);
                true
            }
            // The owner raced us and took the element; nothing to release.
            None => false,
        }
    }
}

/// Weak handles to every live [`LocalCell`] a pool has handed out, so the trimmer can
/// reach caches owned by other threads.
#[derive(Debug)]
pub(crate) struct CellRegistry<T> {
    cells: Mutex<Vec<Weak<LocalCell<T>>>>,
}

impl<T: Send> CellRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            cells: Mutex::new(Vec::new()),
        }
    }

    fn register(&self, cell: &Arc<LocalCell<T>>) {
        self.cells.lock().push(Arc::downgrade(cell));
    }

    /// Walks every entry: compacts out cells whose owning thread is gone, then applies
    /// the age rule to the live ones. The registry lock is not held while trimming, so
    /// a sweep cannot stall the owning threads' fast paths behind user callbacks.
    ///
    /// Returns the number of elements released.
    pub(crate) fn sweep(&self, now_ms: u64, threshold_ms: u64, policy: &FreePolicy<T>) -> usize {
        let live: Vec<Arc<LocalCell<T>>> = {
            let mut cells = self.cells.lock();
            let mut live = Vec::with_capacity(cells.len());
            cells.retain(|weak| match weak.upgrade() {
                Some(cell) => {
                    live.push(cell);
                    true
                }
                None => false,
            });
            live
        };

        live.into_iter().filter(|cell| cell.trim(now_ms, threshold_ms, policy)).count()
    }

    /// Best-effort count of elements currently cached in live cells.
    pub(crate) fn approx_occupied(&self) -> usize {
        self.cells
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|cell| cell.is_occupied())
            .count()
    }
}

thread_local! {
    /// This thread's cache cells, keyed by pool identity. The map holds the only
    /// strong references, so cells are reclaimed when the thread exits.
    static THREAD_CELLS: RefCell<HashMap<u64, Arc<dyn Any + Send + Sync>>> =
        RefCell::new(HashMap::new());

    /// Dense index used to spread threads across shards.
    static THREAD_SLOT: usize = NEXT_THREAD_SLOT.fetch_add(1, Ordering::Relaxed);
}

static NEXT_THREAD_SLOT: AtomicUsize = AtomicUsize::new(0);

/// A small dense per-thread index; `index % shard_count` picks the home shard.
pub(crate) fn thread_slot() -> usize {
    THREAD_SLOT.with(|slot| *slot)
}

/// Returns this thread's cell for the identified pool, creating and registering it on
/// first use.
pub(crate) fn cell_for_thread<T: Send + 'static>(pool_id: u64, registry: &CellRegistry<T>) -> Arc<LocalCell<T>> {
    THREAD_CELLS.with(|cells| {
        let mut cells = cells.borrow_mut();

        if let Some(existing) = cells.get(&pool_id) {
            return Arc::clone(existing)
                .downcast::<LocalCell<T>>()
                .expect("thread cells are keyed by pool identity");
        }

        let cell = Arc::new(LocalCell::new());
        registry.register(&cell);
        cells.insert(pool_id, Arc::clone(&cell) as Arc<dyn Any + Send + Sync>);

        cell
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    fn counting_policy(counter: &Arc<AtomicUsize>) -> FreePolicy<u32> {
        FreePolicy::custom({
            let counter = Arc::clone(counter);
            move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        })
    }

    #[test]
    fn exchange_displaces_the_prior_occupant() {
        let cell = LocalCell::new();

        assert_eq!(cell.exchange(1_u32), None);
        assert_eq!(cell.exchange(2), Some(1));
        assert_eq!(cell.take(), Some(2));
        assert_eq!(cell.take(), None);
    }

    #[test]
    fn trim_uses_two_passes() {
        let cell = LocalCell::new();
        let freed = Arc::new(AtomicUsize::new(0));
        let policy = counting_policy(&freed);

        assert_eq!(cell.exchange(7), None);

        assert!(!cell.trim(1_000, 30_000, &policy)); // stamps
        assert!(!cell.trim(30_999, 30_000, &policy)); // not yet aged
        assert!(cell.trim(31_000, 30_000, &policy));
        assert_eq!(freed.load(Ordering::Relaxed), 1);
        assert!(!cell.is_occupied());
    }

    #[test]
    fn use_between_passes_restarts_the_age_rule() {
        let cell = LocalCell::new();
        let policy = FreePolicy::Drop;

        assert_eq!(cell.exchange(7_u32), None);
        assert!(!cell.trim(1_000, 30_000, &policy)); // stamps

        // The owner touched the cell: the old observation no longer applies.
        assert_eq!(cell.take(), Some(7));
        assert_eq!(cell.exchange(8), None);

        assert!(!cell.trim(31_000, 30_000, &policy)); // stamps again
        assert!(cell.is_occupied());
    }

    #[test]
    fn zero_threshold_clears_unconditionally() {
        let cell = LocalCell::new();
        let freed = Arc::new(AtomicUsize::new(0));
        let policy = counting_policy(&freed);

        assert_eq!(cell.exchange(7), None);
        assert!(cell.trim(1_000, 0, &policy));
        assert_eq!(freed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn sweep_compacts_dead_threads() {
        let registry = CellRegistry::<u32>::new();
        let freed = Arc::new(AtomicUsize::new(0));
        let policy = counting_policy(&freed);

        // A cell whose owning thread exits before the sweep runs.
        thread::scope(|scope| {
            scope
                .spawn(|| {
                    let cell = Arc::new(LocalCell::new());
                    registry.register(&cell);
                    assert_eq!(cell.exchange(1), None);
                })
                .join()
                .expect("cell owner thread panicked");
        });

        assert_eq!(registry.sweep(1_000, 30_000, &policy), 0);
        assert_eq!(registry.approx_occupied(), 0);
        assert_eq!(registry.cells.lock().len(), 0);
        assert_eq!(freed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn sweep_ages_out_live_cells() {
        let registry = CellRegistry::<u32>::new();
        let freed = Arc::new(AtomicUsize::new(0));
        let policy = counting_policy(&freed);

        let cell = Arc::new(LocalCell::new());
        registry.register(&cell);
        assert_eq!(cell.exchange(5), None);

        assert_eq!(registry.sweep(1_000, 30_000, &policy), 0); // stamps
        assert_eq!(registry.sweep(31_000, 30_000, &policy), 1);
        assert_eq!(freed.load(Ordering::Relaxed), 1);
        assert_eq!(registry.cells.lock().len(), 1); // still live, just empty
    }

    #[test]
    fn distinct_pools_get_distinct_cells() {
        let registry_a = CellRegistry::<u32>::new();
        let registry_b = CellRegistry::<u32>::new();

        let cell_a = cell_for_thread(9_000_001, &registry_a);
        let cell_b = cell_for_thread(9_000_002, &registry_b);

        assert_eq!(cell_a.exchange(1), None);
        assert_eq!(cell_b.exchange(2), None);
        assert_eq!(cell_a.take(), Some(1));
        assert_eq!(cell_b.take(), Some(2));
    }

    #[test]
    fn same_pool_reuses_the_cell() {
        let registry = CellRegistry::<u32>::new();

        let first = cell_for_thread(9_000_003, &registry);
        let second = cell_for_thread(9_000_003, &registry);

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn thread_safe_types() {
        assert_impl_all!(LocalCell<Vec<u8>>: Send, Sync);
        assert_impl_all!(CellRegistry<Vec<u8>>: Send, Sync);
    }
}
