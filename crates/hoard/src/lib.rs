// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Multi-tier thread-safe object pooling for latency-sensitive workloads.
//!
//! Pooling pays off when elements are expensive to construct or initialize - request
//! scratch buffers, serialization state, large arrays - and allocation pressure
//! dominates the workload. This crate recycles such elements through a layered cache
//! that trades retention against contention:
//!
//! * a per-thread slot, touched with a single atomic word;
//! * an array of small per-core stacks, so threads rarely collide on a lock;
//! * a shared dynamically-sized reserve behind them;
//! * a pressure- and age-driven trim controller that gives memory back.
//!
//! # Which pool?
//!
//! [`SharedPool::shared()`] is the process-wide pool, one per element type, for
//! elements that are fungible across the whole process:
//!
//! ```
//! use hoard::SharedPool;
//!
//! let pool = SharedPool::<Vec<u8>>::shared();
//!
//! let mut buf = pool.rent();
//! buf.extend_from_slice(b"hello");
//! buf.clear();
//! pool.give_back(buf);
//! ```
//!
//! [`InstancePool`] is the configurable variant a subsystem constructs and owns,
//! with its own factory, capacity, overflow reserve, and free policy:
//!
//! ```
//! use hoard::{InstancePool, ObjectPool};
//!
//! let connections: InstancePool<String> = InstancePool::builder()
//!     .capacity(4)
//!     .factory(|| String::with_capacity(256))
//!     .build()?;
//!
//! let lease = connections.lease(); // returned to the pool on drop
//! # drop(lease);
//! # Ok::<(), hoard::PoolConfigError>(())
//! ```
//!
//! # What pooling here does not promise
//!
//! The pool is a cache, not a queue. Counts are approximate, an element may
//! occasionally fail to be recycled under contention (it is freed instead), and no
//! operation ever blocks the caller. See [`ObjectPool`] for the precise contract.
//!
//! # Giving memory back
//!
//! Cached elements do not live forever. Every pool exposes
//! [`trim`][ObjectPool::trim]; how much a trim pass releases depends on host memory
//! pressure and on how long each layer has sat idle. Hosts with a garbage collector
//! piggyback periodic trimming on collection cycles - here, either call
//! [`trim_shared_pools`] from your own timer or spawn a [`Maintainer`] thread to do
//! it for you.

mod clock;
mod error;
mod instance;
mod lease;
mod local;
mod policy;
mod pool;
mod pressure;
mod reserve;
mod shard;
mod shared;
mod slot;
mod trim;

#[cfg(any(test, feature = "test-util"))]
pub use clock::ClockHandle;
pub use clock::TrimClock;
pub use error::PoolConfigError;
pub use instance::{BoxPool, InstancePool, PoolBuilder, ScalarPool};
pub use lease::Lease;
pub use policy::FreePolicy;
pub use pool::ObjectPool;
pub use pressure::{MemoryLoad, MemoryPressure, PressureSource};
pub use shared::{SharedPool, trim_shared_pools};
pub use slot::{ElementSlot, HandleSlot, LockedSlot, PackedScalar, PackedSlot};
pub use trim::{Maintainer, Trimmable};
