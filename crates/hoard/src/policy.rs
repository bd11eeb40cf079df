// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

/// The factory a pool invokes when a rent request finds every tier empty.
pub(crate) type Factory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// How a pool relinquishes an element it has evicted.
///
/// Eviction happens when a return finds every tier full, when the trim controller
/// prunes a layer, and when the pool itself is dropped. Each evicted element passes
/// through the policy exactly once; elements still in pooled custody are never freed.
///
/// Rust's ownership model collapses the "drop the bytes" and "invoke disposal"
/// policies found in pools for garbage-collected runtimes into one: dropping an
/// element runs its `Drop` implementation. [`Custom`][FreePolicy::Custom] remains for
/// callers that want to observe evictions (accounting, returning elements to a
/// different cache, tests).
pub enum FreePolicy<T> {
    /// Drop the element, running its `Drop` implementation if it has one.
    Drop,

    /// Hand the element to the given function, which takes over ownership.
    Custom(Arc<dyn Fn(T) + Send + Sync>),
}

impl<T> FreePolicy<T> {
    /// Creates a custom policy from a free function.
    pub fn custom<F>(free: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(free))
    }

    /// Relinquishes one evicted element.
    pub(crate) fn apply(&self, value: T) {
        match self {
            Self::Drop => drop(value),
            Self::Custom(free) => free(value),
        }
    }

    /// Relinquishes a batch of evicted elements.
    pub(crate) fn apply_all<I>(&self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        for value in values {
            self.apply(value);
        }
    }
}

impl<T> Clone for FreePolicy<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Drop => Self::Drop,
            Self::Custom(free) => Self::Custom(Arc::clone(free)),
        }
    }
}

impl<T> Default for FreePolicy<T> {
    fn default() -> Self {
        Self::Drop
    }
}

impl<T> fmt::Debug for FreePolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => f.write_str("FreePolicy::Drop"),
            Self::Custom(_) => f.write_str("FreePolicy::Custom"),
        }
    }
}
