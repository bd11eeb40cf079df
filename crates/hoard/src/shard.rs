// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use parking_lot::Mutex;

use crate::policy::FreePolicy;
use crate::reserve::Reserve;

/// Elements a single shard retains. Shards are deliberately small: they exist to
/// absorb bursts without cross-core contention, not to hold the working set.
pub(crate) const SHARD_CAPACITY: usize = 128;

/// One of the per-core bounded LIFOs that sit between the thread-local tier and the
/// global reserve.
///
/// The stack is guarded by a mutex, but the rent/return fast paths only ever
/// `try_lock`: a contended shard is skipped the same way a full one is, and the caller
/// moves on to the next shard. Only the trimmer and the compound reserve transfers
/// take the lock unconditionally, and those hold it briefly.
#[derive(Debug)]
pub(crate) struct ShardStack<T> {
    state: Mutex<ShardState<T>>,
}

#[derive(Debug)]
struct ShardState<T> {
    items: Vec<T>,

    /// Milliseconds at which the trimmer first observed this shard non-empty;
    /// zero means unobserved. Reset on empty/non-empty transitions.
    stamp: u64,
}

impl<T> ShardStack<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ShardState {
                items: Vec::with_capacity(SHARD_CAPACITY),
                stamp: 0,
            }),
        }
    }

    /// Pushes onto the shard. Fails when the shard is full or another thread holds it.
    pub(crate) fn try_push(&self, value: T) -> Result<(), T> {
        let Some(mut state) = self.state.try_lock() else {
            return Err(value);
        };

        if state.items.len() == SHARD_CAPACITY {
            return Err(value);
        }

        let was_empty = state.items.is_empty();
        state.items.push(value);
        if was_empty {
            state.stamp = 0;
        }

        Ok(())
    }

    /// Pops the most recently pushed element. `None` when empty or contended.
    pub(crate) fn try_pop(&self) -> Option<T> {
        let mut state = self.state.try_lock()?;

        let value = state.items.pop()?;
        if state.items.is_empty() {
            state.stamp = 0;
        }

        Some(value)
    }

    /// Moves the shard's entire contents plus `surplus` into the reserve.
    ///
    /// Called when a return found every shard full: rather than dropping the surplus
    /// element, the caller's home shard is flushed wholesale so the next burst of
    /// returns lands locally again. Lock order is shard first, then reserve.
    pub(crate) fn drain_into(&self, reserve: &Reserve<T>, surplus: T, policy: &FreePolicy<T>) {
        let mut state = self.state.lock();

        let mut batch: Vec<T> = state.items.drain(..).collect();
        batch.push(surplus);
        state.stamp = 0;

        let overflow = reserve.deposit_batch(batch);
        drop(state);

        policy.apply_all(overflow);
    }

    /// Takes one element from the reserve for the caller and opportunistically
    /// refills this shard with as many more as it has room for.
    ///
    /// Returns `None` when the reserve is empty. Lock order is shard first, then
    /// reserve.
    pub(crate) fn fill_from(&self, reserve: &Reserve<T>) -> Option<T> {
        let mut state = self.state.lock();

        let room = SHARD_CAPACITY.saturating_sub(state.items.len());
        let mut batch = reserve.take_batch(room.saturating_add(1));

        let claimed = batch.pop()?;

        let was_empty = state.items.is_empty();
        state.items.extend(batch);
        if was_empty && !state.items.is_empty() {
            state.stamp = 0;
        }

        Some(claimed)
    }

    /// Best-effort element count; a contended shard reports its last-known size as zero.
    pub(crate) fn approx_len(&self) -> usize {
        self.state.try_lock().map_or(0, |state| state.items.len())
    }

    /// Ages the shard and drops up to `max_drop` elements once it has sat untouched
    /// for `max_age_ms`.
    ///
    /// A zero stamp means the trimmer has not observed this shard yet; the first pass
    /// only records `now` and drops nothing (unless `max_age_ms` is zero, which makes
    /// the shard immediately eligible). After a drop the stamp advances by a quarter
    /// of the age window so a busy trim cadence drains a cold shard gradually.
    ///
    /// Returns the number of elements dropped.
    pub(crate) fn trim(&self, now_ms: u64, max_age_ms: u64, max_drop: usize, policy: &FreePolicy<T>) -> usize {
        let mut state = self.state.lock();

        if state.items.is_empty() {
            return 0;
        }

        if max_age_ms > 0 {
            if state.stamp == 0 {
                state.stamp = now_ms;
                return 0;
            }

            if now_ms.saturating_sub(state.stamp) < max_age_ms {
                return 0;
            }
        }

        let keep = state.items.len().saturating_sub(max_drop);
        let dropped: Vec<T> = state.items.drain(keep..).collect();

        if state.items.is_empty() {
            state.stamp = 0;
        } else {
            state.stamp = state.stamp.saturating_add(max_age_ms / 4);
        }

        drop(state);
        let count = dropped.len();
        policy.apply_all(dropped);

        count
    }

    /// Empties the shard through the free policy. Teardown only.
    pub(crate) fn drain_for_teardown(&self, policy: &FreePolicy<T>) {
        let mut state = self.state.lock();
        let drained: Vec<T> = state.items.drain(..).collect();
        state.stamp = 0;
        drop(state);

        policy.apply_all(drained);
    }
}
