// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![expect(missing_docs, reason = "Test code")]

//! Behavior of the process-wide shared pools.
//!
//! Each test uses its own element type: shared pools are per-type singletons, so
//! distinct types keep concurrently running tests from interfering.

use std::sync::atomic::{AtomicUsize, Ordering};

use hoard::SharedPool;

#[test]
fn single_thread_returns_come_back_lifo() {
    #[derive(Debug, Default, PartialEq, Eq)]
    struct Tag(u32);

    let pool = SharedPool::<Tag>::shared();

    for value in [1, 2, 3, 4, 5] {
        pool.give_back(Tag(value));
    }

    let rented: Vec<u32> = (0..5).map(|_| pool.rent().0).collect();
    assert_eq!(rented, vec![5, 4, 3, 2, 1]);
}

#[test]
fn forced_trim_drains_and_disposes_everything() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Disposable;

    impl Drop for Disposable {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::Relaxed);
        }
    }

    let pool = SharedPool::<Disposable>::shared();

    for _ in 0..100 {
        pool.give_back(Disposable::default());
    }
    assert_eq!(pool.approx_count(), 100);

    pool.trim(true);

    assert_eq!(pool.approx_count(), 0);
    assert_eq!(DROPS.load(Ordering::Relaxed), 100);
}

#[test]
fn rent_constructs_only_when_empty() {
    #[derive(Debug, Default)]
    struct Counted;

    let pool = SharedPool::<Counted>::shared();

    // Fresh pool: rents construct.
    let a = pool.rent();
    let b = pool.rent();

    // After returns, rents recycle instead of constructing; observable through the
    // retained count dropping back to zero.
    pool.give_back(a);
    pool.give_back(b);
    let before = pool.approx_count();
    assert_eq!(before, 2);

    _ = pool.rent();
    _ = pool.rent();
    assert_eq!(pool.approx_count(), 0);
}

#[test]
fn shared_handle_is_stable_across_calls() {
    #[derive(Debug, Default)]
    struct Stable;

    let first = SharedPool::<Stable>::shared();
    let second = SharedPool::<Stable>::shared();
    assert!(std::ptr::eq(first, second));
}

#[test]
fn lease_gives_back_on_drop() {
    #[derive(Debug, Default)]
    struct Leased;

    let pool = SharedPool::<Leased>::shared();

    {
        let _lease = pool.lease();
        assert_eq!(pool.approx_count(), 0);
    }

    assert_eq!(pool.approx_count(), 1);
}
