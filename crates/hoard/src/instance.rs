// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::clock::TrimClock;
use crate::error::PoolConfigError;
use crate::lease::Lease;
use crate::policy::{Factory, FreePolicy};
use crate::pool::ObjectPool;
use crate::pressure::PressureSource;
use crate::reserve::Reserve;
use crate::slot::{ElementSlot, HandleSlot, LockedSlot, PackedSlot};
use crate::trim::{TrimParams, Trimmable};

/// A user-constructed pool: a hot first slot, a small scan array, and an overflow
/// reserve.
///
/// Where the process-wide [`SharedPool`][crate::SharedPool] spreads contention across
/// per-core stacks, an instance pool is usually owned by one subsystem and contended
/// by far fewer threads, so it trades the sharding for a simpler layout:
///
/// * `first` is a thread-local-style cell: a return displaces its occupant, keeping the
///   most recently returned element hottest, and a rent claims it first.
/// * The scan array holds `capacity - 1` more slots, probed linearly.
/// * The reserve absorbs overflow; a dynamic reserve resizes with demand, a fixed one
///   frees surplus elements immediately.
///
/// All operations are non-blocking; see [`ObjectPool`] for the exact contract.
///
/// # Examples
///
/// ```
/// use hoard::{InstancePool, ObjectPool};
///
/// let pool: InstancePool<Vec<u8>> = InstancePool::builder()
///     .capacity(8)
///     .reserve(32)
///     .factory(|| Vec::with_capacity(4096))
///     .build()?;
///
/// let mut buf = pool.rent();
/// buf.extend_from_slice(b"scratch space");
/// buf.clear();
/// pool.give_back(buf);
/// # Ok::<(), hoard::PoolConfigError>(())
/// ```
pub struct InstancePool<T, S: ElementSlot<T> = LockedSlot<T>> {
    first: S,
    scan: Box<[S]>,

    /// Age stamp for the slot array as a whole; zero means unobserved by the trimmer.
    /// Any slot activity resets it.
    scan_stamp: AtomicU64,

    reserve: Reserve<T>,
    factory: Factory<T>,
    free_policy: FreePolicy<T>,
    pressure: PressureSource,
    clock: TrimClock,
}

/// An instance pool of boxed elements, using the single-word atomic-pointer slot.
pub type BoxPool<T> = InstancePool<Box<T>, HandleSlot<T>>;

/// An instance pool of small `Copy` scalars, using the packed tag-and-payload slot.
pub type ScalarPool<T> = InstancePool<T, PackedSlot<T>>;

impl<T: Send + 'static, S: ElementSlot<T>> InstancePool<T, S> {
    /// Starts configuring a pool.
    #[must_use]
    pub fn builder() -> PoolBuilder<T, S> {
        PoolBuilder::new()
    }

    /// Creates a pool of default-constructed elements with the given capacity and no
    /// initial reserve.
    ///
    /// # Errors
    ///
    /// Fails with [`PoolConfigError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, PoolConfigError>
    where
        T: Default,
    {
        Self::builder().capacity(capacity).factory(T::default).build()
    }

    /// Acquires an element, constructing a new one only if every tier is empty.
    #[must_use]
    pub fn rent(&self) -> T {
        if let Some(value) = self.first.try_claim() {
            self.mark_slots_active();
            return value;
        }

        for slot in &self.scan {
            if slot.is_occupied()
                && let Some(value) = slot.try_claim()
            {
                self.mark_slots_active();
                return value;
            }
        }

        if let Some(value) = self.reserve.pop() {
            return value;
        }

        (self.factory)()
    }

    /// Hands an element back to the pool.
    ///
    /// The element lands in the first slot, displacing its previous occupant down into
    /// the scan array; when every slot is full the displaced element spills into the
    /// reserve, and when that cannot hold it either it is released through the free
    /// policy.
    pub fn give_back(&self, value: T) {
        self.mark_slots_active();

        let Some(mut displaced) = self.first.exchange(value) else {
            return;
        };

        for slot in &self.scan {
            if !slot.is_occupied() {
                match slot.try_place(displaced) {
                    Ok(()) => return,
                    Err(value) => displaced = value,
                }
            }
        }

        self.reserve.store_or_free(displaced, &self.free_policy);
    }

    /// A racy estimate of how many elements the pool currently retains.
    #[must_use]
    pub fn approx_count(&self) -> usize {
        let slots = usize::from(self.first.is_occupied())
            + self.scan.iter().filter(|slot| slot.is_occupied()).count();

        slots + self.reserve.len()
    }

    /// Releases retained elements: adaptively under the current memory pressure when
    /// `force` is false, or all of them when `force` is true.
    pub fn trim(&self, force: bool) {
        let now = self.clock.now_millis();
        let pressure = if force { None } else { Some(self.pressure.current()) };
        let params = TrimParams::for_pressure(pressure);

        let slots_cleared = self.trim_slots(now, params.local_age_ms);
        let reserve_dropped =
            self.reserve
                .trim(now, params.reserve_max_age_ms, params.reserve_drop_percent, &self.free_policy);

        trace!(force, ?pressure, slots_cleared, reserve_dropped, "trimmed instance pool");
    }

    fn mark_slots_active(&self) {
        self.scan_stamp.store(0, Ordering::Relaxed);
    }

    /// Two-pass age rule over the whole slot array, mirroring the thread-local cells
    /// of the shared pool: first eligible pass stamps, second clears everything.
    fn trim_slots(&self, now_ms: u64, threshold_ms: u64) -> usize {
        let occupied = self.first.is_occupied() || self.scan.iter().any(|slot| slot.is_occupied());
        if !occupied {
            return 0;
        }

        if threshold_ms > 0 {
            let stamp = self.scan_stamp.load(Ordering::Relaxed);
            if stamp == 0 {
                self.scan_stamp.store(now_ms, Ordering::Relaxed);
                return 0;
            }

            if now_ms.saturating_sub(stamp) < threshold_ms {
                return 0;
            }
        }

        let mut cleared = 0;
        for slot in std::iter::once(&self.first).chain(&self.scan) {
            if let Some(value) = slot.try_claim() {
                self.free_policy.apply(value);
                cleared += 1;
            }
        }

        self.scan_stamp.store(0, Ordering::Relaxed);
        cleared
    }
}

impl<T: Send + 'static, S: ElementSlot<T>> ObjectPool<T> for InstancePool<T, S> {
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

impl<T: Send + 'static, S: ElementSlot<T>> Trimmable for InstancePool<T, S> {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn trim(&self, force: bool) {
        Self::trim(self, force);
    }
}

impl<T, S: ElementSlot<T>> Drop for InstancePool<T, S> {
    fn drop(&mut self) {
        // Everything still in custody leaves through the free policy, exactly once.
        for slot in std::iter::once(&self.first).chain(&self.scan) {
            if let Some(value) = slot.try_claim() {
                self.free_policy.apply(value);
            }
        }

        self.reserve.drain_for_teardown(&self.free_policy);
    }
}

impl<T, S: ElementSlot<T>> fmt::Debug for InstancePool<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstancePool")
            .field("capacity", &(self.scan.len() + 1))
            .field("reserve_len", &self.reserve.len())
            .finish_non_exhaustive()
    }
}

/// Configures and assembles an [`InstancePool`].
///
/// Obtained from [`InstancePool::builder`]. The one mandatory knob is the factory;
/// everything else has conservative defaults.
pub struct PoolBuilder<T, S: ElementSlot<T> = LockedSlot<T>> {
    capacity: usize,
    reserve: usize,
    is_reserve_dynamic: bool,
    factory: Option<Factory<T>>,
    free_policy: FreePolicy<T>,
    pressure: PressureSource,
    clock: TrimClock,
    _slot: PhantomData<S>,
}

impl<T: Send + 'static, S: ElementSlot<T>> PoolBuilder<T, S> {
    fn new() -> Self {
        Self {
            capacity: 16,
            reserve: 0,
            is_reserve_dynamic: true,
            factory: None,
            free_policy: FreePolicy::Drop,
            pressure: PressureSource::os(),
            clock: TrimClock::monotonic(),
            _slot: PhantomData,
        }
    }

    /// Total slot count: one first slot plus `capacity - 1` scan slots. Must be at
    /// least 1. Defaults to 16.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Initial capacity of the overflow reserve. Defaults to 0.
    #[must_use]
    pub fn reserve(mut self, reserve: usize) -> Self {
        self.reserve = reserve;
        self
    }

    /// Whether the reserve may resize. A fixed reserve (`false`) never grows or
    /// shrinks; surplus elements on a full return are freed immediately. Defaults to
    /// `true`.
    #[must_use]
    pub fn reserve_dynamic(mut self, is_dynamic: bool) -> Self {
        self.is_reserve_dynamic = is_dynamic;
        self
    }

    /// The closure invoked when a rent request finds every tier empty.
    #[must_use]
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// How evicted elements are released. Defaults to [`FreePolicy::Drop`].
    #[must_use]
    pub fn free_policy(mut self, policy: FreePolicy<T>) -> Self {
        self.free_policy = policy;
        self
    }

    /// Where the trim controller reads memory pressure from. Defaults to the
    /// operating system probe.
    #[must_use]
    pub fn pressure_source(mut self, source: PressureSource) -> Self {
        self.pressure = source;
        self
    }

    /// The clock backing the trim age rules.
    #[cfg(any(test, feature = "test-util"))]
    #[must_use]
    pub fn clock(mut self, clock: TrimClock) -> Self {
        self.clock = clock;
        self
    }

    /// Assembles the pool.
    ///
    /// # Errors
    ///
    /// Fails with [`PoolConfigError::InvalidCapacity`] if the capacity is zero, or
    /// [`PoolConfigError::MissingFactory`] if no factory was configured.
    pub fn build(self) -> Result<InstancePool<T, S>, PoolConfigError> {
        if self.capacity == 0 {
            return Err(PoolConfigError::InvalidCapacity(0));
        }

        let factory = self.factory.ok_or(PoolConfigError::MissingFactory)?;

        let reserve = if self.is_reserve_dynamic {
            Reserve::dynamic(self.reserve, self.reserve)
        } else {
            Reserve::fixed(self.reserve)
        };

        Ok(InstancePool {
            first: S::default(),
            scan: (1..self.capacity).map(|_| S::default()).collect(),
            scan_stamp: AtomicU64::new(0),
            reserve,
            factory,
            free_policy: self.free_policy,
            pressure: self.pressure,
            clock: self.clock,
        })
    }
}

impl<T, S: ElementSlot<T>> fmt::Debug for PoolBuilder<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("capacity", &self.capacity)
            .field("reserve", &self.reserve)
            .field("is_reserve_dynamic", &self.is_reserve_dynamic)
            .field("has_factory", &self.factory.is_some())
            .finish_non_exhaustive()
    }
}

// The lease method on the trait covers the common case; this inherent forward exists
// so callers do not need the trait in scope.
impl<T: Send + 'static, S: ElementSlot<T>> InstancePool<T, S> {
    /// Rents an element wrapped in a guard that gives it back on drop.
    #[must_use]
    pub fn lease(&self) -> Lease<'_, T, Self> {
        Lease::new(self, Self::rent(self))
    }
}
