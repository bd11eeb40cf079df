// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lease::Lease;

/// The common surface of every pool: rent an element, give it back, and let the
/// trimmer reclaim what sits idle.
///
/// # Guarantees and non-guarantees
///
/// Pools here are caches, not queues. The contract is deliberately loose so the fast
/// paths can stay lock-free:
///
/// * [`rent`][Self::rent] never blocks and never fails - when every tier is empty it
///   constructs a fresh element.
/// * [`give_back`][Self::give_back] never blocks and never rejects - under contention
///   or when every tier is full, the element is released through the pool's free
///   policy instead of being stored.
/// * [`approx_count`][Self::approx_count] is a racy estimate, suitable for
///   diagnostics only.
///
/// Returning the same element twice is impossible by construction: `give_back` takes
/// the element by value.
pub trait ObjectPool<T> {
    /// Acquires an element, constructing a new one only if no cached element is
    /// available.
    fn rent(&self) -> T;

    /// Hands an element back; it is either cached for a future [`rent`][Self::rent]
    /// or released through the free policy.
    fn give_back(&self, value: T);

    /// A racy estimate of how many elements the pool currently retains, or `None`
    /// if the pool cannot count them.
    fn approx_count(&self) -> Option<usize> {
        None
    }

    /// Releases retained elements: adaptively when `force` is false, or all of them
    /// when `force` is true.
    fn trim(&self, force: bool);

    /// Rents an element wrapped in a guard that gives it back on drop.
    fn lease(&self) -> Lease<'_, T, Self>
    where
        Self: Sized,
    {
        Lease::new(self, self.rent())
    }
}
