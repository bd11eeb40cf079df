// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::{Any, TypeId};
use std::fmt;
use std::num::NonZero;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::trace;

use crate::clock::TrimClock;
use crate::lease::Lease;
use crate::local::{self, CellRegistry, LocalCell};
use crate::policy::{Factory, FreePolicy};
use crate::pool::ObjectPool;
use crate::pressure::PressureSource;
use crate::reserve::Reserve;
use crate::shard::{SHARD_CAPACITY, ShardStack};
use crate::trim::{TrimParams, Trimmable};

/// Never shard wider than this, regardless of how many cores the host reports.
const MAX_SHARDS: usize = 64;

/// The process-wide pool: a thread-local cell per calling thread, a per-core array of
/// small bounded stacks, and a shared overflow reserve.
///
/// There is one shared pool per element type, created lazily by
/// [`shared()`][Self::shared] and alive for the rest of the process. Its tiers are
/// ordered by contention cost:
///
/// 1. The calling thread's own cell - no synchronization beyond one atomic word.
/// 2. The per-core stacks, starting at this thread's home shard and scanning the rest;
///    a contended or empty shard is skipped, never waited on.
/// 3. The reserve, which also refills the home shard on a hit.
/// 4. The factory.
///
/// Returns run the same chain downward: the returned element displaces the cell's
/// occupant, and the displaced element is what trickles into the shards and reserve.
/// Within one shard, elements come back in LIFO order.
///
/// Elements cached in a thread's cell when that thread exits are dropped with the
/// cell; they do not pass through a custom free policy.
///
/// # Examples
///
/// ```
/// use hoard::SharedPool;
///
/// let pool = SharedPool::<Vec<u8>>::shared();
///
/// let mut buf = pool.rent();
/// buf.extend_from_slice(b"reusable");
/// buf.clear();
/// pool.give_back(buf);
/// ```
pub struct SharedPool<T> {
    /// Distinguishes pools in the per-thread cell maps.
    pool_id: u64,

    shards: Box<[ShardStack<T>]>,
    reserve: Reserve<T>,
    registry: CellRegistry<T>,
    factory: Factory<T>,
    free_policy: FreePolicy<T>,
    pressure: PressureSource,
    clock: TrimClock,
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

struct SharedEntry {
    pool: &'static (dyn Any + Send + Sync),
    trim: &'static dyn Trimmable,
}

static SHARED_POOLS: Lazy<DashMap<TypeId, SharedEntry>> = Lazy::new(DashMap::new);

impl<T: Send + 'static> SharedPool<T> {
    /// Returns the process-wide pool for `T`, creating it on first use.
    ///
    /// The shared pool constructs elements with `T::default()` and releases evictions
    /// by dropping them. Workloads that need a custom factory or free policy should
    /// build an [`InstancePool`][crate::InstancePool] instead.
    ///
    /// # Panics
    ///
    /// Panics if the process-wide pool registry holds an entry of the wrong type for
    /// `T`, which cannot happen through this API.
    #[must_use]
    pub fn shared() -> &'static Self
    where
        T: Default,
    {
        let entry = SHARED_POOLS.entry(TypeId::of::<T>()).or_insert_with(|| {
            let pool: &'static Self = Box::leak(Box::new(Self::with_parts(
                Arc::new(T::default),
                FreePolicy::Drop,
                PressureSource::os(),
                TrimClock::monotonic(),
            )));

            SharedEntry { pool, trim: pool }
        });

        let pool = entry.pool;
        drop(entry);

        pool.downcast_ref::<Self>().expect("shared pools are keyed by element type")
    }

    pub(crate) fn with_parts(
        factory: Factory<T>,
        free_policy: FreePolicy<T>,
        pressure: PressureSource,
        clock: TrimClock,
    ) -> Self {
        let shard_count = thread::available_parallelism().map_or(1, NonZero::get).min(MAX_SHARDS);

        Self {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            shards: (0..shard_count).map(|_| ShardStack::new()).collect(),
            reserve: Reserve::dynamic(SHARD_CAPACITY, SHARD_CAPACITY),
            registry: CellRegistry::new(),
            factory,
            free_policy,
            pressure,
            clock,
        }
    }

    /// Acquires an element, constructing a new one only if every tier is empty.
    #[must_use]
    pub fn rent(&self) -> T {
        let cell = self.local_cell();
        if let Some(value) = cell.take() {
            return value;
        }

        let home = self.home_shard();
        let count = self.shards.len();
        for offset in 0..count {
            if let Some(value) = self.shards[(home + offset) % count].try_pop() {
                return value;
            }
        }

        if let Some(value) = self.shards[home].fill_from(&self.reserve) {
            return value;
        }

        (self.factory)()
    }

    /// Hands an element back to the pool.
    ///
    /// The element lands in this thread's cell; the displaced prior occupant walks the
    /// shard array and, failing that, flushes the home shard into the reserve. The
    /// return itself never fails - at worst the displaced element is released through
    /// the free policy.
    pub fn give_back(&self, value: T) {
        let cell = self.local_cell();
        let Some(mut displaced) = cell.exchange(value) else {
            return;
        };

        let home = self.home_shard();
        let count = self.shards.len();
        for offset in 0..count {
            match self.shards[(home + offset) % count].try_push(displaced) {
                Ok(()) => return,
                Err(value) => displaced = value,
            }
        }

        self.shards[home].drain_into(&self.reserve, displaced, &self.free_policy);
    }

    /// A racy estimate of how many elements the pool currently retains across all
    /// tiers, including other threads' cells.
    #[must_use]
    pub fn approx_count(&self) -> usize {
        let shards: usize = self.shards.iter().map(ShardStack::approx_len).sum();
        shards + self.reserve.len() + self.registry.approx_occupied()
    }

    /// Releases retained elements: adaptively under the current memory pressure when
    /// `force` is false, or all of them when `force` is true.
    ///
    /// Safe to call concurrently with any mix of rent and return traffic; each tier is
    /// locked briefly and independently, so a trim can race an in-flight operation and
    /// both remain correct.
    pub fn trim(&self, force: bool) {
        let now = self.clock.now_millis();
        let pressure = if force { None } else { Some(self.pressure.current()) };
        let params = TrimParams::for_pressure(pressure);

        let cells_cleared = self.registry.sweep(now, params.local_age_ms, &self.free_policy);

        let mut shard_dropped = 0;
        for shard in &self.shards {
            shard_dropped += shard.trim(now, params.shard_max_age_ms, params.shard_max_drop, &self.free_policy);
        }

        let reserve_dropped =
            self.reserve
                .trim(now, params.reserve_max_age_ms, params.reserve_drop_percent, &self.free_policy);

        trace!(
            force,
            ?pressure,
            cells_cleared,
            shard_dropped,
            reserve_dropped,
            "trimmed shared pool"
        );
    }

    fn local_cell(&self) -> Arc<LocalCell<T>> {
        local::cell_for_thread(self.pool_id, &self.registry)
    }

    fn home_shard(&self) -> usize {
        local::thread_slot() % self.shards.len()
    }

    /// Rents an element wrapped in a guard that gives it back on drop.
    #[must_use]
    pub fn lease(&self) -> Lease<'_, T, Self> {
        Lease::new(self, Self::rent(self))
    }
}

impl<T: Send + 'static> ObjectPool<T> for SharedPool<T> {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn rent(&self) -> T {
        Self::rent(self)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn give_back(&self, value: T) {
        Self::give_back(self, value);
    }

    fn approx_count(&self) -> Option<usize> {
        Some(Self::approx_count(self))
    }

    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn trim(&self, force: bool) {
        Self::trim(self, force);
    }
}

impl<T: Send + 'static> Trimmable for SharedPool<T> {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn trim(&self, force: bool) {
        Self::trim(self, force);
    }
}

impl<T> Drop for SharedPool<T> {
    fn drop(&mut self) {
        // Process-wide pools leak and never reach this; standalone pools built for
        // tests still route their custody through the free policy exactly once.
        for shard in &self.shards {
            shard.drain_for_teardown(&self.free_policy);
        }

        self.reserve.drain_for_teardown(&self.free_policy);
    }
}

impl<T> fmt::Debug for SharedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPool")
            .field("pool_id", &self.pool_id)
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}

/// Runs one trim pass over every process-wide shared pool created so far.
///
/// Embedders without a [`Maintainer`][crate::Maintainer] thread should call this
/// periodically (a low-priority timer is typical); nothing else prunes the shared
/// pools.
pub fn trim_shared_pools(force: bool) {
    // Copy the handles out first: trimming runs element destructors, which must not
    // execute under the registry's shard locks.
    let pools: Vec<&'static dyn Trimmable> = SHARED_POOLS.iter().map(|entry| entry.trim).collect();

    for pool in pools {
        pool.trim(force);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::pressure::MemoryLoad;

    fn standalone<T: Send + 'static>(factory: impl Fn() -> T + Send + Sync + 'static) -> SharedPool<T> {
        SharedPool::with_parts(
            Arc::new(factory),
            FreePolicy::Drop,
            low_pressure(),
            TrimClock::monotonic(),
        )
    }

    fn low_pressure() -> PressureSource {
        PressureSource::custom(|| {
            Some(MemoryLoad {
                load_bytes: 0,
                high_threshold_bytes: 1_000_000,
            })
        })
    }

    #[test]
    fn single_thread_returns_come_back_lifo() {
        let pool = standalone(|| 0_u32);

        for value in [1, 2, 3, 4, 5] {
            pool.give_back(value);
        }

        let rented: Vec<u32> = (0..5).map(|_| pool.rent()).collect();
        assert_eq!(rented, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn rent_from_empty_pool_uses_the_factory() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let pool = standalone({
            let constructed = Arc::clone(&constructed);
            move || constructed.fetch_add(1, Ordering::Relaxed)
        });

        _ = pool.rent();
        assert_eq!(constructed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn returns_drain_before_the_factory_runs() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let pool = standalone({
            let constructed = Arc::clone(&constructed);
            move || {
                constructed.fetch_add(1, Ordering::Relaxed);
                0_u32
            }
        });

        for value in 1..=50 {
            pool.give_back(value);
        }

        let mut recovered: Vec<u32> = (0..50).map(|_| pool.rent()).collect();
        recovered.sort_unstable();
        assert_eq!(recovered, (1..=50).collect::<Vec<_>>());
        assert_eq!(constructed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn forced_trim_drains_every_tier() {
        let freed = Arc::new(AtomicUsize::new(0));
        let pool = SharedPool::with_parts(
            Arc::new(|| 0_u32),
            FreePolicy::custom({
                let freed = Arc::clone(&freed);
                move |_| {
                    freed.fetch_add(1, Ordering::Relaxed);
                }
            }),
            low_pressure(),
            TrimClock::monotonic(),
        );

        for value in 0..300 {
            pool.give_back(value);
        }
        assert_eq!(pool.approx_count(), 300);

        pool.trim(true);
        assert_eq!(pool.approx_count(), 0);
        assert_eq!(freed.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn adaptive_trim_with_a_manual_clock_ages_the_tiers_out() {
        let (clock, handle) = TrimClock::manual();
        let freed = Arc::new(AtomicUsize::new(0));
        let pool = SharedPool::with_parts(
            Arc::new(|| 0_u32),
            FreePolicy::custom({
                let freed = Arc::clone(&freed);
                move |_| {
                    freed.fetch_add(1, Ordering::Relaxed);
                }
            }),
            low_pressure(),
            clock,
        );

        for value in 0..10 {
            pool.give_back(value);
        }
        let retained = pool.approx_count();
        assert_eq!(retained, 10);

        pool.trim(false); // stamps every layer

        // Under low pressure the cell threshold is 30s and the shard window 60s.
        handle.advance(std::time::Duration::from_secs(61));
        pool.trim(false);

        assert!(freed.load(Ordering::Relaxed) >= 1, "an aged layer should have released");
        assert!(pool.approx_count() < retained);
    }

    #[test]
    fn shared_instances_are_per_type_singletons() {
        let first = SharedPool::<Vec<u8>>::shared();
        let second = SharedPool::<Vec<u8>>::shared();
        assert!(std::ptr::eq(first, second));

        let other = SharedPool::<String>::shared();
        assert_ne!(first.pool_id, other.pool_id);
    }

    #[test]
    fn trim_shared_pools_reaches_the_singletons() {
        let pool = SharedPool::<Box<u16>>::shared();
        pool.give_back(Box::new(5));

        trim_shared_pools(true);
        assert_eq!(pool.approx_count(), 0);
    }

    #[test]
    fn drop_routes_custody_through_the_policy() {
        let freed = Arc::new(AtomicUsize::new(0));
        let pool = SharedPool::with_parts(
            Arc::new(|| 0_u32),
            FreePolicy::custom({
                let freed = Arc::clone(&freed);
                move |_| {
                    freed.fetch_add(1, Ordering::Relaxed);
                }
            }),
            low_pressure(),
            TrimClock::monotonic(),
        );

        for value in 0..10 {
            pool.give_back(value);
        }

        // One element stays in this thread's cell and is dropped with it, not freed
        // through the policy; everything in the shards and reserve is.
        drop(pool);
        assert_eq!(freed.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(SharedPool<Vec<u8>>: Send, Sync);
    }
}
