// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::UnsafeCell;
use std::hint;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicI8, Ordering};

use super::{ElementSlot, SLOT_SPIN_LIMIT};

const EMPTY: i8 = 0;
const LOCKED: i8 = -1;
const FULL: i8 = 2;

/// A slot for arbitrary element types, guarded by a three-state word.
///
/// The word moves through `EMPTY -> LOCKED -> FULL -> LOCKED -> EMPTY`; whoever swaps
/// it to `LOCKED` has exclusive access to the value cell and publishes the new state
/// with a release store when done. Acquisition is a short bounded spin - the slot
/// never parks a thread. When the spin budget runs out the operation fails benignly:
/// a claim reports empty, a place or exchange hands the value back to the caller.
///
/// This is the fallback layout that works for every `T: Send`; the other slot flavors
/// are single-word specializations of the same contract.
pub struct LockedSlot<T> {
    state: AtomicI8,
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: the element is moved across threads whole, never shared, so `T: Send` is
// the only requirement.
unsafe impl<T: Send> Send for LockedSlot<T> {}

// SAFETY: the state word serializes all access to the value cell; holders of `LOCKED`
// have exclusive access and no `&T` is ever produced from a shared `&LockedSlot<T>`.
unsafe impl<T: Send> Sync for LockedSlot<T> {}

impl<T> Default for LockedSlot<T> {
    fn default() -> Self {
        Self {
            state: AtomicI8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

impl<T> LockedSlot<T> {
    /// Spins until the state moves from `expected` to `LOCKED`, within the spin budget.
    fn lock_from(&self, expected: i8) -> bool {
        for _ in 0..SLOT_SPIN_LIMIT {
            match self
                .state
                .compare_exchange_weak(expected, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                // The slot left the state we need; no amount of spinning brings it back.
                Err(observed) if observed != expected && observed != LOCKED => return false,
                Err(_) => hint::spin_loop(),
            }
        }

        false
    }
}

impl<T: Send> ElementSlot<T> for LockedSlot<T> {
    fn try_claim(&self) -> Option<T> {
        if self.state.load(Ordering::Relaxed) != FULL {
            return None;
        }

        if !self.lock_from(FULL) {
            return None;
        }

        // SAFETY: we hold LOCKED, and the transition out of FULL guarantees the cell
        // was fully written by the releasing store that published FULL.
        let value = unsafe { (*self.value.get()).assume_init_read() };
        self.state.store(EMPTY, Ordering::Release);

        Some(value)
    }

    fn try_place(&self, value: T) -> Result<(), T> {
        if self.state.load(Ordering::Relaxed) != EMPTY {
            return Err(value);
        }

        if !self.lock_from(EMPTY) {
            return Err(value);
        }

        // SAFETY: we hold LOCKED and the cell is empty, so writing does not leak a
        // previous element.
        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(FULL, Ordering::Release);

        Ok(())
    }

    fn exchange(&self, value: T) -> Option<T> {
        for _ in 0..SLOT_SPIN_LIMIT {
            let observed = self.state.load(Ordering::Relaxed);
            if observed == LOCKED {
                hint::spin_loop();
                continue;
            }

            if self
                .state
                .compare_exchange_weak(observed, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                hint::spin_loop();
                continue;
            }

            // SAFETY: we hold LOCKED; the cell is initialized exactly when the prior
            // state was FULL, and reading it out transfers ownership to us.
            let prior = (observed == FULL).then(|| unsafe { (*self.value.get()).assume_init_read() });

            // SAFETY: we hold LOCKED and the cell's prior occupant (if any) was just
            // moved out, so the write cannot leak.
            unsafe {
                (*self.value.get()).write(value);
            }
            self.state.store(FULL, Ordering::Release);

            return prior;
        }

        // Could not acquire the slot; the new value itself is the displaced element.
        Some(value)
    }

    fn is_occupied(&self) -> bool {
        self.state.load(Ordering::Relaxed) == FULL
    }
}

impl<T> Drop for LockedSlot<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == FULL {
            // SAFETY: drop has exclusive access and FULL guarantees the cell is
            // initialized.
            unsafe {
                self.value.get_mut().assume_init_drop();
            }
        }
    }
}

impl<T> std::fmt::Debug for LockedSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedSlot")
            .field("occupied", &(self.state.load(Ordering::Relaxed) == FULL))
            .finish()
    }
}
