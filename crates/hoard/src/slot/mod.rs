// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Single-element cells with atomic claim and release.
//!
//! Every caching tier of a pool is ultimately built from slots: a slot holds at most
//! one element, hands it out to exactly one claimant, and never exposes a partially
//! written value. Three layouts cover the element shapes that matter:
//!
//! * [`HandleSlot`] - boxed elements, state is a single atomic pointer.
//! * [`PackedSlot`] - small `Copy` scalars, tag and payload packed into one atomic word.
//! * [`LockedSlot`] - everything else, a three-state spin word guarding an in-place value.
//!
//! All three present the same observable fast path: lock-free when uncontended, and
//! under contention they fail benignly (a claim reports empty, a place hands the value
//! back) rather than blocking.

mod handle;
mod locked;
mod packed;

pub use handle::HandleSlot;
pub use locked::LockedSlot;
pub use packed::{PackedScalar, PackedSlot};

/// How many times a slot operation retries its atomic transition before failing benignly.
///
/// Slot contention windows are a handful of instructions, so a short bounded spin is
/// enough; anything longer and the caller is better served by the next tier.
pub(crate) const SLOT_SPIN_LIMIT: u32 = 64;

/// A single-element cell with atomic claim and release.
///
/// Implementations guarantee:
///
/// * at most one element is held at a time;
/// * a claimed element is observed fully written (no torn reads);
/// * concurrent claims of the same element succeed for exactly one caller;
/// * operations never block - under contention they fail and let the caller move on.
pub trait ElementSlot<T>: Default + Send + Sync {
    /// Takes the element out of the slot, leaving it empty.
    ///
    /// Returns `None` if the slot is empty or another thread holds it mid-transition.
    fn try_claim(&self) -> Option<T>;

    /// Puts `value` into the slot if it is empty.
    ///
    /// On failure (occupied or contended) ownership of `value` is handed back.
    fn try_place(&self, value: T) -> Result<(), T>;

    /// Puts `value` into the slot unconditionally, returning the displaced occupant.
    ///
    /// If the slot cannot be acquired mid-race, the input value itself comes back as
    /// the displaced element so the caller can route it to the next tier.
    fn exchange(&self, value: T) -> Option<T>;

    /// Unsynchronized occupancy hint; may be stale by the time the caller acts on it.
    fn is_occupied(&self) -> bool;
}
