// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[cfg(any(test, feature = "test-util"))]
use std::sync::Arc;
#[cfg(any(test, feature = "test-util"))]
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A millisecond source for age stamps on pooled elements.
///
/// Trim decisions compare "now" against per-layer stamps, so the clock only needs to be
/// monotonic and cheap. In production it is a thin wrapper over [`Instant`]. Tests need
/// to jump forward in time without sleeping, so a manually advanced variant is available
/// under the `test-util` feature (and within this crate's own tests).
///
/// The reading is never zero: zero is reserved as the "layer not yet observed by the
/// trimmer" sentinel in the stamps this clock feeds.
#[derive(Debug, Clone)]
pub struct TrimClock(ClockRepr);

#[derive(Debug, Clone)]
enum ClockRepr {
    Monotonic(Instant),
    #[cfg(any(test, feature = "test-util"))]
    Manual(Arc<AtomicU64>),
}

impl TrimClock {
    /// Creates a clock that reads elapsed wall time since its own construction.
    #[must_use]
    pub fn monotonic() -> Self {
        Self(ClockRepr::Monotonic(Instant::now()))
    }

    /// Creates a clock that only moves when its [`ClockHandle`] is advanced.
    #[cfg(any(test, feature = "test-util"))]
    #[must_use]
    pub fn manual() -> (Self, ClockHandle) {
        let millis = Arc::new(AtomicU64::new(1));
        (Self(ClockRepr::Manual(Arc::clone(&millis))), ClockHandle(millis))
    }

    /// Returns the current reading in milliseconds. Always at least 1.
    #[must_use]
    pub fn now_millis(&self) -> u64 {
        match &self.0 {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "a process does not stay up for u64::MAX milliseconds"
            )]
            ClockRepr::Monotonic(origin) => (origin.elapsed().as_millis() as u64).saturating_add(1),

            #[cfg(any(test, feature = "test-util"))]
            ClockRepr::Manual(millis) => millis.load(Ordering::Relaxed),
        }
    }
}

impl Default for TrimClock {
    fn default() -> Self {
        Self::monotonic()
    }
}

/// Drives a manual [`TrimClock`] forward.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone)]
pub struct ClockHandle(Arc<AtomicU64>);

#[cfg(any(test, feature = "test-util"))]
impl ClockHandle {
    /// Moves every linked clock forward by `duration`.
    pub fn advance(&self, duration: std::time::Duration) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "test clocks are not advanced by u64::MAX milliseconds"
        )]
        self.0.fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }
}
