// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use parking_lot::Mutex;

use crate::policy::FreePolicy;

/// The shared overflow buffer behind the faster tiers.
///
/// The reserve is the only tier whose footprint tracks demand: a dynamic reserve grows
/// by doubling when a drain would overflow and shrinks by halving during trim once it
/// is mostly empty, never below its floor. A fixed reserve does neither - when it is
/// full, surplus elements go straight to the free policy.
///
/// All access funnels through one mutex, held only for short, bounded sections.
/// Compound transfers (a shard draining into or filling from the reserve) take the
/// shard lock first, so the lock order is acyclic.
#[derive(Debug)]
pub(crate) struct Reserve<T> {
    state: Mutex<ReserveState<T>>,

    /// Capacity never shrinks below this.
    floor: usize,

    /// `Some(n)` caps the element count at `n` and disables resizing.
    limit: Option<usize>,
}

#[derive(Debug)]
struct ReserveState<T> {
    items: Vec<T>,

    /// Milliseconds at which the trimmer first observed the reserve non-empty;
    /// zero means unobserved. Reset on empty/non-empty transitions.
    stamp: u64,
}

impl<T> Reserve<T> {
    /// Creates a growable reserve with the given starting capacity and shrink floor.
    pub(crate) fn dynamic(initial_capacity: usize, floor: usize) -> Self {
        Self {
            state: Mutex::new(ReserveState {
                items: Vec::with_capacity(initial_capacity),
                stamp: 0,
            }),
            floor,
            limit: None,
        }
    }

    /// Creates a reserve that never holds more than `capacity` elements and never
    /// resizes.
    pub(crate) fn fixed(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ReserveState {
                items: Vec::with_capacity(capacity),
                stamp: 0,
            }),
            floor: capacity,
            limit: Some(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Stores one element, or routes it to the free policy if the reserve cannot
    /// accept it (fixed and full, or the allocator refused to grow it).
    pub(crate) fn store_or_free(&self, value: T, policy: &FreePolicy<T>) {
        let mut state = self.state.lock();

        let at_limit = self.limit.is_some_and(|limit| state.items.len() >= limit);
        if at_limit || state.items.try_reserve(1).is_err() {
            drop(state);
            policy.apply(value);
            return;
        }

        let was_empty = state.items.is_empty();
        state.items.push(value);
        if was_empty {
            state.stamp = 0;
        }
    }

    /// Stores a batch, returning the elements that did not fit.
    ///
    /// On allocation failure the buffer is left exactly as it was and the whole
    /// remainder comes back to the caller.
    pub(crate) fn deposit_batch(&self, batch: Vec<T>) -> Vec<T> {
        let mut state = self.state.lock();

        let accept = match self.limit {
            Some(limit) => limit.saturating_sub(state.items.len()).min(batch.len()),
            None => batch.len(),
        };

        let accept = if state.items.try_reserve(accept).is_ok() { accept } else { 0 };

        let was_empty = state.items.is_empty();
        let mut batch = batch;
        let overflow = batch.split_off(accept);
        state.items.append(&mut batch);

        if was_empty && !state.items.is_empty() {
            state.stamp = 0;
        }

        overflow
    }

    /// Removes and returns one element from the top.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();

        let value = state.items.pop()?;
        if state.items.is_empty() {
            state.stamp = 0;
        }

        Some(value)
    }

    /// Removes up to `max` elements from the top; the last element of the returned
    /// buffer was the topmost.
    pub(crate) fn take_batch(&self, max: usize) -> Vec<T> {
        let mut state = self.state.lock();

        let keep = state.items.len().saturating_sub(max);
        let batch = state.items.split_off(keep);
        if state.items.is_empty() {
            state.stamp = 0;
        }

        batch
    }

    /// Ages the reserve and drops `drop_percent` of its contents once it has sat
    /// untouched for `max_age_ms`, then shrinks the buffer toward the floor while it
    /// is at most a quarter full.
    ///
    /// A zero stamp means unobserved: the first pass only records `now`, unless
    /// `max_age_ms` is zero (high pressure or forced trim), which makes the reserve
    /// immediately eligible. Returns the number of elements dropped.
    pub(crate) fn trim(&self, now_ms: u64, max_age_ms: u64, drop_percent: usize, policy: &FreePolicy<T>) -> usize {
        let mut state = self.state.lock();

        let dropped = if state.items.is_empty() {
            Vec::new()
        } else {
            if max_age_ms > 0 {
                if state.stamp == 0 {
                    state.stamp = now_ms;
                    shrink(&mut state.items, self.limit, self.floor);
                    return 0;
                }

                if now_ms.saturating_sub(state.stamp) < max_age_ms {
                    return 0;
                }
            }

            let drop_count = (state.items.len() * drop_percent).div_ceil(100).min(state.items.len());
            let keep = state.items.len() - drop_count;
            let dropped: Vec<T> = state.items.drain(keep..).collect();

            state.stamp = if state.items.is_empty() { 0 } else { now_ms };
            dropped
        };

        shrink(&mut state.items, self.limit, self.floor);
        drop(state);

        let count = dropped.len();
        policy.apply_all(dropped);

        count
    }

    /// Empties the reserve through the free policy. Teardown only.
    pub(crate) fn drain_for_teardown(&self, policy: &FreePolicy<T>) {
        let mut state = self.state.lock();
        let drained = std::mem::take(&mut state.items);
        state.stamp = 0;
        drop(state);

        policy.apply_all(drained);
    }
}

/// Halves the buffer's capacity once it is at most a quarter full, bounded below by
/// the floor. Fixed reserves never resize; repeated trim passes walk an oversized
/// buffer down toward the floor one halving at a time.
fn shrink<T>(items: &mut Vec<T>, limit: Option<usize>, floor: usize) {
    if limit.is_some() {
        return;
    }

    let capacity = items.capacity();
    if capacity <= floor {
        return;
    }

    let len = items.len();
    if len != 0 && len.saturating_mul(4) > capacity {
        return;
    }

    items.shrink_to((capacity / 2).max(floor));
}
