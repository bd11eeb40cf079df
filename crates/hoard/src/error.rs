// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Errors surfaced while assembling a pool from a [`PoolBuilder`][crate::PoolBuilder].
///
/// These cover the configuration mistakes a caller can actually make. Several error
/// kinds familiar from pool libraries in other languages have no runtime
/// representation here:
///
/// * Returning a null element is unrepresentable - [`give_back`][crate::ObjectPool::give_back]
///   takes ownership of a live value.
/// * Renting from a pool with no way to construct elements is a compile-time failure -
///   the builder requires a factory closure and the `Default`-based constructors require
///   `T: Default`.
/// * A negative reserve size is unrepresentable (`usize`); every reserve size is a
///   valid configuration, with zero disabling the overflow tier on a fixed reserve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PoolConfigError {
    /// The requested capacity was below the minimum of one slot.
    #[error("pool capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),

    /// The builder was finalized without a factory and the element type provides no default.
    #[error("no factory configured and the element type has no default constructor")]
    MissingFactory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_capacity() {
        let err = PoolConfigError::InvalidCapacity(0);
        assert_eq!(err.to_string(), "pool capacity must be at least 1, got 0");
    }

    #[test]
    fn error_type_is_thread_safe() {
        static_assertions::assert_impl_all!(PoolConfigError: Send, Sync, std::error::Error);
    }
}
