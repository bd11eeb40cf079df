// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Length-keyed array pooling on top of [`hoard`].
//!
//! Arrays are the classic pooling candidate - large, frequently scratch-lived, and
//! expensive for the allocator - but they only recycle usefully between callers that
//! want the same length. [`ArrayPool`] keys a family of [`hoard::InstancePool`]s by
//! array length, creating each sub-pool lazily:
//!
//! ```
//! use hoard_arrays::ArrayPool;
//!
//! let pool = ArrayPool::<u8>::new();
//!
//! let mut frame = pool.rent(1500);
//! frame[0] = 0x45;
//! pool.give_back(frame);
//!
//! // The next 1500-byte rent reuses the same allocation.
//! let again = pool.rent(1500);
//! # drop(again);
//! ```
//!
//! When callers know their length up front, [`ArrayPool::of_length`] returns a
//! [`LengthPool`] - a fixed-length view that implements
//! [`ObjectPool`][hoard::ObjectPool] and rejects returns of any other length.
//!
//! Pools of types that carry references or handles should enable `clear_on_return`
//! so one request's data can never leak into another's freshly rented array.

mod by_length;
mod error;

pub use by_length::{ArrayPool, LengthPool};
pub use error::WrongLengthError;
