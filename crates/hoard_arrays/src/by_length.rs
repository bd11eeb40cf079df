// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::iter;
use std::sync::Arc;

use dashmap::DashMap;
use hoard::{InstancePool, Lease, ObjectPool, PoolConfigError, Trimmable};

use crate::error::WrongLengthError;

/// How many arrays of each length the slot tier retains by default.
const DEFAULT_ARRAYS_PER_LENGTH: usize = 8;

/// A pool of boxed slices keyed by length.
///
/// Exact-length arrays are awkward to pool directly - a pool of `Box<[T]>` would mix
/// lengths and hand a caller the wrong size. This adapter maintains one
/// [`InstancePool`] per requested length, created lazily on first use, so every rent
/// gets exactly the length it asked for.
///
/// # Clearing
///
/// `clear_on_return` controls whether array contents are reset to `T::default()`
/// before storage. Pools of index or handle types should clear so a later renter
/// cannot observe another request's data; pools of plain byte scratch usually skip it.
/// [`with_clear_on_return`][Self::with_clear_on_return] derives a sibling adapter with
/// the opposite setting that shares this adapter's storage, so capacity is pooled
/// across both.
///
/// # Examples
///
/// ```
/// use hoard_arrays::ArrayPool;
///
/// let pool = ArrayPool::<u8>::new();
///
/// let buf = pool.rent(4096);
/// assert_eq!(buf.len(), 4096);
/// pool.give_back(buf);
/// ```
pub struct ArrayPool<T: Send> {
    backing: Arc<Backing<T>>,
    clear_on_return: bool,
}

struct Backing<T: Send> {
    pools: DashMap<usize, Arc<InstancePool<Box<[T]>>>>,
    arrays_per_length: usize,
    reserve: usize,
    is_reserve_dynamic: bool,
}

impl<T: Default + Send + 'static> ArrayPool<T> {
    /// Creates an adapter with default sizing and no clearing on return.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backing: Arc::new(Backing {
                pools: DashMap::new(),
                arrays_per_length: DEFAULT_ARRAYS_PER_LENGTH,
                reserve: 0,
                is_reserve_dynamic: true,
            }),
            clear_on_return: false,
        }
    }

    /// Creates an adapter whose per-length pools retain up to `arrays_per_length`
    /// arrays in their slot tier, with an unbounded overflow reserve.
    ///
    /// # Errors
    ///
    /// Fails with [`PoolConfigError::InvalidCapacity`] if `arrays_per_length` is zero.
    pub fn with_capacity(arrays_per_length: usize) -> Result<Self, PoolConfigError> {
        if arrays_per_length == 0 {
            return Err(PoolConfigError::InvalidCapacity(0));
        }

        Ok(Self {
            backing: Arc::new(Backing {
                pools: DashMap::new(),
                arrays_per_length,
                reserve: 0,
                is_reserve_dynamic: true,
            }),
            clear_on_return: false,
        })
    }

    /// Derives an adapter with the given clearing behavior that shares this adapter's
    /// storage.
    #[must_use]
    pub fn with_clear_on_return(&self, clear_on_return: bool) -> Self {
        Self {
            backing: Arc::clone(&self.backing),
            clear_on_return,
        }
    }

    /// Acquires an array of exactly `length` elements.
    ///
    /// A length of zero yields the empty array without touching pooled storage.
    #[must_use]
    pub fn rent(&self, length: usize) -> Box<[T]> {
        if length == 0 {
            return Box::default();
        }

        self.pool_for(length).rent()
    }

    /// Hands an array back, clearing it first when this adapter clears on return.
    pub fn give_back(&self, array: Box<[T]>) {
        self.give_back_with(array, self.clear_on_return);
    }

    /// Hands an array back with an explicit clearing decision for this call.
    pub fn give_back_with(&self, mut array: Box<[T]>, clear: bool) {
        if array.is_empty() {
            return;
        }

        if clear {
            array.fill_with(T::default);
        }

        self.pool_for(array.len()).give_back(array);
    }

    /// A fixed-length view over this adapter's storage.
    #[must_use]
    pub fn of_length(&self, length: usize, clear_on_return: bool) -> LengthPool<T> {
        LengthPool {
            pool: self.pool_for(length),
            length,
            clear_on_return,
        }
    }

    /// A racy estimate of how many arrays are retained across every length.
    #[must_use]
    pub fn approx_count(&self) -> usize {
        self.backing.pools.iter().map(|entry| entry.value().approx_count()).sum()
    }

    /// Trims every per-length pool; see [`ObjectPool::trim`].
    pub fn trim(&self, force: bool) {
        for entry in self.backing.pools.iter() {
            entry.value().trim(force);
        }
    }

    fn pool_for(&self, length: usize) -> Arc<InstancePool<Box<[T]>>> {
        if let Some(pool) = self.backing.pools.get(&length) {
            return Arc::clone(pool.value());
        }

        let backing = &self.backing;
        let entry = backing.pools.entry(length).or_insert_with(|| {
            let pool = InstancePool::builder()
                .capacity(backing.arrays_per_length)
                .reserve(backing.reserve)
                .reserve_dynamic(backing.is_reserve_dynamic)
                .factory(move || iter::repeat_with(T::default).take(length).collect())
                .build()
                .expect("adapter capacity was validated at construction");

            Arc::new(pool)
        });

        Arc::clone(entry.value())
    }
}

impl<T: Default + Send + 'static> Default for ArrayPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default + Send + 'static> Trimmable for ArrayPool<T> {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn trim(&self, force: bool) {
        Self::trim(self, force);
    }
}

impl<T: Send> Clone for ArrayPool<T> {
    fn clone(&self) -> Self {
        Self {
            backing: Arc::clone(&self.backing),
            clear_on_return: self.clear_on_return,
        }
    }
}

impl<T: Send> fmt::Debug for ArrayPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayPool")
            .field("lengths", &self.backing.pools.len())
            .field("clear_on_return", &self.clear_on_return)
            .finish_non_exhaustive()
    }
}

/// A fixed-length slice of an [`ArrayPool`]: every rent and return is for one
/// configured length, and mismatched returns are rejected.
///
/// Obtained from [`ArrayPool::of_length`]. Sibling views of the same length share the
/// backing storage regardless of their clearing behavior.
pub struct LengthPool<T: Send> {
    pool: Arc<InstancePool<Box<[T]>>>,
    length: usize,
    clear_on_return: bool,
}

impl<T: Default + Send + 'static> LengthPool<T> {
    /// The array length this pool serves.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Acquires an array of exactly [`length`][Self::length] elements.
    #[must_use]
    pub fn rent(&self) -> Box<[T]> {
        if self.length == 0 {
            return Box::default();
        }

        self.pool.rent()
    }

    /// Hands an array back, rejecting one whose length differs from this pool's.
    ///
    /// # Errors
    ///
    /// Fails with [`WrongLengthError`], carrying the array back to the caller, if
    /// `array.len() != self.length()`.
    pub fn try_give_back(&self, array: Box<[T]>) -> Result<(), WrongLengthError<T>> {
        if array.len() != self.length {
            return Err(WrongLengthError {
                expected: self.length,
                actual: array.len(),
                array,
            });
        }

        self.store(array);
        Ok(())
    }

    /// Derives a view with the given clearing behavior over the same storage.
    #[must_use]
    pub fn with_clear_on_return(&self, clear_on_return: bool) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            length: self.length,
            clear_on_return,
        }
    }

    fn store(&self, mut array: Box<[T]>) {
        if array.is_empty() {
            return;
        }

        if self.clear_on_return {
            array.fill_with(T::default);
        }

        self.pool.give_back(array);
    }
}

impl<T: Default + Send + 'static> ObjectPool<Box<[T]>> for LengthPool<T> {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn rent(&self) -> Box<[T]> {
        Self::rent(self)
    }

    /// Hands an array back.
    ///
    /// # Panics
    ///
    /// Panics if the array's length differs from this pool's configured length. Use
    /// [`try_give_back`][Self::try_give_back] to keep the array on rejection.
    fn give_back(&self, value: Box<[T]>) {
        let actual = value.len();
        assert_eq!(
            actual, self.length,
            "returned array has length {actual}, pool expects {}",
            self.length
        );

        self.store(value);
    }

    fn approx_count(&self) -> Option<usize> {
        if self.length == 0 {
            return Some(0);
        }

        Some(self.pool.approx_count())
    }

    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn trim(&self, force: bool) {
        self.pool.trim(force);
    }
}

impl<T: Default + Send + 'static> LengthPool<T> {
    /// Rents an array wrapped in a guard that gives it back on drop.
    #[must_use]
    pub fn lease(&self) -> Lease<'_, Box<[T]>, Self> {
        ObjectPool::lease(self)
    }
}

impl<T: Default + Send + 'static> Trimmable for LengthPool<T> {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn trim(&self, force: bool) {
        self.pool.trim(force);
    }
}

impl<T: Send> Clone for LengthPool<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            length: self.length,
            clear_on_return: self.clear_on_return,
        }
    }
}

impl<T: Send> fmt::Debug for LengthPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LengthPool")
            .field("length", &self.length)
            .field("clear_on_return", &self.clear_on_return)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn rents_are_exact_length_and_defaulted() {
        let pool = ArrayPool::<u32>::new();

        let array = pool.rent(5);
        assert_eq!(array.len(), 5);
        assert!(array.iter().all(|&value| value == 0));
    }

    #[test]
    fn zero_length_rents_skip_storage() {
        let pool = ArrayPool::<u8>::new();

        let empty = pool.rent(0);
        assert!(empty.is_empty());

        pool.give_back(empty);
        assert_eq!(pool.approx_count(), 0);
    }

    #[test]
    fn returned_arrays_are_recycled_per_length() {
        let pool = ArrayPool::<u8>::new();

        let mut small = pool.rent(4);
        small[0] = 7;
        pool.give_back(small);

        let large = pool.rent(64);
        pool.give_back(large);

        // The next length-4 rent reuses the stored array, contents intact.
        let small_again = pool.rent(4);
        assert_eq!(small_again.len(), 4);
        assert_eq!(small_again[0], 7);
    }

    #[test]
    fn clearing_adapter_wipes_contents_before_storage() {
        let pool = ArrayPool::<u8>::new().with_clear_on_return(true);

        let mut array = pool.rent(4);
        array.fill(0xAB);
        pool.give_back(array);

        let again = pool.rent(4);
        assert!(again.iter().all(|&value| value == 0));
    }

    #[test]
    fn sibling_adapters_share_storage() {
        let dirty = ArrayPool::<u8>::new();
        let clean = dirty.with_clear_on_return(true);

        dirty.give_back(dirty.rent(16));
        assert_eq!(clean.approx_count(), 1);

        // The sibling's rent draws from the same per-length pool.
        let array = clean.rent(16);
        assert_eq!(array.len(), 16);
        assert_eq!(dirty.approx_count(), 0);
    }

    #[test]
    fn wrong_length_return_is_rejected_and_counts_are_unchanged() {
        let pool = ArrayPool::<u8>::new();
        let sixteens = pool.of_length(16, false);

        sixteens.try_give_back(sixteens.rent()).expect("matching length");
        let before = ObjectPool::approx_count(&sixteens);

        let err = sixteens
            .try_give_back(vec![0_u8; 8].into_boxed_slice())
            .expect_err("length 8 into a length-16 pool");

        assert_eq!(err.expected, 16);
        assert_eq!(err.actual, 8);
        assert_eq!(err.array.len(), 8);
        assert_eq!(ObjectPool::approx_count(&sixteens), before);
    }

    #[test]
    #[should_panic(expected = "returned array has length 8, pool expects 16")]
    fn infallible_give_back_panics_on_mismatch() {
        let pool = ArrayPool::<u8>::new();
        let sixteens = pool.of_length(16, false);

        ObjectPool::give_back(&sixteens, vec![0_u8; 8].into_boxed_slice());
    }

    #[test]
    fn length_pool_lease_round_trips() {
        let pool = ArrayPool::<u64>::new();
        let fours = pool.of_length(4, false);

        {
            let mut lease = fours.lease();
            lease[0] = 9;
        }

        assert_eq!(ObjectPool::approx_count(&fours), Some(1));
        assert_eq!(fours.rent()[0], 9);
    }

    #[test]
    fn forced_trim_empties_every_length() {
        let pool = ArrayPool::<u8>::new();

        for length in [4, 8, 16] {
            for _ in 0..10 {
                pool.give_back(pool.rent(length));
            }
        }
        assert!(pool.approx_count() > 0);

        pool.trim(true);
        assert_eq!(pool.approx_count(), 0);
    }

    #[test]
    fn thread_safe_types() {
        assert_impl_all!(ArrayPool<u8>: Send, Sync, Clone);
        assert_impl_all!(LengthPool<u8>: Send, Sync, Clone);
    }
}
