// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use super::ElementSlot;

/// A slot for boxed elements whose entire state is one atomic pointer.
///
/// Null means empty, so occupancy and identity are read in a single load and every
/// transition is one compare-and-swap. The optimistic first read avoids a CAS when
/// the slot is obviously empty or full.
///
/// This is the cheapest slot layout; pools of heap-allocated elements
/// ([`BoxPool`][crate::BoxPool]) select it at construction.
pub struct HandleSlot<T> {
    ptr: AtomicPtr<T>,

    // The slot owns the boxed element it holds.
    _owner: PhantomData<*mut T>,
}

// SAFETY: the slot owns at most one `Box<T>` and hands it across threads whole;
// transfer is mediated by atomic compare-and-swap, so `T: Send` suffices.
unsafe impl<T: Send> Send for HandleSlot<T> {}

// SAFETY: shared access only ever moves the boxed element in or out atomically;
// no `&T` is ever produced from a shared `&HandleSlot<T>`.
unsafe impl<T: Send> Sync for HandleSlot<T> {}

impl<T> Default for HandleSlot<T> {
    fn default() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            _owner: PhantomData,
        }
    }
}

impl<T: Send> ElementSlot<Box<T>> for HandleSlot<T> {
    fn try_claim(&self) -> Option<Box<T>> {
        let observed = self.ptr.load(Ordering::Acquire);
        if observed.is_null() {
            return None;
        }

        match self
            .ptr
            .compare_exchange(observed, ptr::null_mut(), Ordering::AcqRel, Ordering::Relaxed)
        {
            // SAFETY: the CAS transferred ownership of `observed` to us, and the
            // pointer originated from `Box::into_raw` in `try_place`/`exchange`.
            Ok(_) => Some(unsafe { Box::from_raw(observed) }),
            // Lost the race; the caller proceeds as if the slot were empty.
            Err(_) => None,
        }
    }

    fn try_place(&self, value: Box<T>) -> Result<(), Box<T>> {
        let raw = Box::into_raw(value);

        match self
            .ptr
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            // SAFETY: ownership of `raw` was not transferred; reconstitute the box.
            Err(_) => Err(unsafe { Box::from_raw(raw) }),
        }
    }

    fn exchange(&self, value: Box<T>) -> Option<Box<T>> {
        let raw = Box::into_raw(value);
        let prior = self.ptr.swap(raw, Ordering::AcqRel);

        // SAFETY: the swap transferred ownership of the prior occupant (if any) to us.
        (!prior.is_null()).then(|| unsafe { Box::from_raw(prior) })
    }

    fn is_occupied(&self) -> bool {
        !self.ptr.load(Ordering::Relaxed).is_null()
    }
}

impl<T> Drop for HandleSlot<T> {
    fn drop(&mut self) {
        let raw = *self.ptr.get_mut();
        if !raw.is_null() {
            // SAFETY: drop has exclusive access and the pointer came from `Box::into_raw`.
            drop(unsafe { Box::from_raw(raw) });
        }
    }
}

impl<T> std::fmt::Debug for HandleSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleSlot")
            .field("occupied", &!self.ptr.load(Ordering::Relaxed).is_null())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn claim_from_empty_is_none() {
        let slot = HandleSlot::<u32>::default();
        assert!(slot.try_claim().is_none());
        assert!(!slot.is_occupied());
    }

    #[test]
    fn place_then_claim_round_trips() {
        let slot = HandleSlot::default();
        assert!(slot.try_place(Box::new(7_u32)).is_ok());
        assert!(slot.is_occupied());

        assert_eq!(slot.try_claim().as_deref(), Some(&7));
        assert!(!slot.is_occupied());
    }

    #[test]
    fn place_into_occupied_hands_the_value_back() {
        let slot = HandleSlot::default();
        assert!(slot.try_place(Box::new(1_u32)).is_ok());

        let rejected = slot.try_place(Box::new(2_u32));
        assert_eq!(rejected.err().as_deref(), Some(&2));
        assert_eq!(slot.try_claim().as_deref(), Some(&1));
    }

    #[test]
    fn exchange_reports_the_displaced_occupant() {
        let slot = HandleSlot::default();

        assert!(slot.exchange(Box::new(1_u32)).is_none());
        assert_eq!(slot.exchange(Box::new(2_u32)).as_deref(), Some(&1));
        assert_eq!(slot.try_claim().as_deref(), Some(&2));
    }

    #[test]
    fn dropping_a_full_slot_drops_its_element() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Canary(Arc<AtomicUsize>);

        impl Drop for Canary {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let slot = HandleSlot::default();
            assert!(slot.try_place(Box::new(Canary(Arc::clone(&drops)))).is_ok());
        }
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn concurrent_claims_are_exclusive() {
        struct BoxedAdapter(HandleSlot<u32>);

        impl Default for BoxedAdapter {
            fn default() -> Self {
                Self(HandleSlot::default())
            }
        }

        impl crate::slot::ElementSlot<u32> for BoxedAdapter {
            fn try_claim(&self) -> Option<u32> {
                self.0.try_claim().map(|boxed| *boxed)
            }

            fn try_place(&self, value: u32) -> Result<(), u32> {
                self.0.try_place(Box::new(value)).map_err(|boxed| *boxed)
            }

            fn exchange(&self, value: u32) -> Option<u32> {
                self.0.exchange(Box::new(value)).map(|boxed| *boxed)
            }

            fn is_occupied(&self) -> bool {
                self.0.is_occupied()
            }
        }

        let slot = BoxedAdapter::default();
        crate::slot::test_support::claim_is_exclusive(&slot, 8);
    }

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(HandleSlot<Vec<u8>>: Send, Sync);
    }
}
