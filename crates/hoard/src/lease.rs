// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::pool::ObjectPool;

/// An RAII guard over a rented element; dropping the lease gives the element back to
/// the pool it came from.
///
/// Created by [`ObjectPool::lease`]. For elements that should deliberately not return
/// to the pool (e.g. a buffer being handed off to another owner), use
/// [`detach`][Self::detach].
pub struct Lease<'a, T, P: ObjectPool<T> + ?Sized> {
    value: Option<T>,
    pool: &'a P,
}

impl<'a, T, P: ObjectPool<T> + ?Sized> Lease<'a, T, P> {
    pub(crate) fn new(pool: &'a P, value: T) -> Self {
        Self {
            value: Some(value),
            pool,
        }
    }

    /// Takes the element out of the lease; it will not be returned to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the lease no longer holds its element, which cannot happen through
    /// this API: `detach` consumes the lease.
    #[must_use]
    pub fn detach(mut self) -> T {
        self.value.take().expect("lease value present until drop or detach")
    }
}

impl<T, P: ObjectPool<T> + ?Sized> Deref for Lease<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("lease value present until drop or detach")
    }
}

impl<T, P: ObjectPool<T> + ?Sized> DerefMut for Lease<'_, T, P> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("lease value present until drop or detach")
    }
}

impl<T, P: ObjectPool<T> + ?Sized> Drop for Lease<'_, T, P> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.give_back(value);
        }
    }
}

impl<T: fmt::Debug, P: ObjectPool<T> + ?Sized> fmt::Debug for Lease<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("value", &self.value).finish()
    }
}
