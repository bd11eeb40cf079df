// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

/// A fixed-length pool rejected an array of a different length.
///
/// Accepting the mismatched array would corrupt the pool's contract - every element of
/// a length pool has exactly the configured length - so the return fails loudly and
/// hands the array back through [`array`][Self::array].
#[derive(thiserror::Error)]
#[error("returned array has length {actual}, pool expects {expected}")]
pub struct WrongLengthError<T> {
    /// The length the pool was configured with.
    pub expected: usize,

    /// The length of the rejected array.
    pub actual: usize,

    /// The rejected array, returned to the caller untouched.
    pub array: Box<[T]>,
}

impl<T> fmt::Debug for WrongLengthError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrongLengthError")
            .field("expected", &self.expected)
            .field("actual", &self.actual)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_both_lengths() {
        let err = WrongLengthError::<u8> {
            expected: 16,
            actual: 8,
            array: vec![0; 8].into_boxed_slice(),
        };

        assert_eq!(err.to_string(), "returned array has length 8, pool expects 16");
    }

    #[test]
    fn the_rejected_array_comes_back_intact() {
        let err = WrongLengthError::<u8> {
            expected: 4,
            actual: 2,
            array: vec![7, 9].into_boxed_slice(),
        };

        assert_eq!(&*err.array, &[7, 9]);
    }
}
