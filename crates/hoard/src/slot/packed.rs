// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use super::ElementSlot;

/// A scalar that fits in 32 bits and can round-trip through a raw bit pattern.
///
/// Implemented for the primitive types a [`PackedSlot`] can carry. The conversion must
/// be lossless: `from_bits(to_bits(x)) == x` for every value the type can hold (for
/// floats, up to NaN payload identity).
pub trait PackedScalar: Copy + Send + Sync + 'static + sealed::Sealed {
    /// The raw bit pattern of `self`.
    fn to_bits(self) -> u32;

    /// Reconstructs a value from `to_bits` output.
    fn from_bits(bits: u32) -> Self;
}

mod sealed {
    pub trait Sealed {}
}

macro_rules! packed_unsigned {
    ($($ty:ty),*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl PackedScalar for $ty {
                fn to_bits(self) -> u32 {
                    u32::from(self)
                }

                fn from_bits(bits: u32) -> Self {
                    #[expect(
                        clippy::cast_possible_truncation,
                        reason = "bits were produced by to_bits, which widened losslessly"
                    )]
                    let value = bits as Self;
                    value
                }
            }
        )*
    };
}

macro_rules! packed_signed {
    ($($ty:ty => $unsigned:ty),*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl PackedScalar for $ty {
                fn to_bits(self) -> u32 {
                    u32::from(self.cast_unsigned())
                }

                fn from_bits(bits: u32) -> Self {
                    #[expect(
                        clippy::cast_possible_truncation,
                        reason = "bits were produced by to_bits, which widened losslessly"
                    )]
                    let narrowed = bits as $unsigned;
                    narrowed.cast_signed()
                }
            }
        )*
    };
}

packed_unsigned!(u8, u16);
packed_signed!(i8 => u8, i16 => u16);

impl sealed::Sealed for u32 {}

impl PackedScalar for u32 {
    fn to_bits(self) -> u32 {
        self
    }

    fn from_bits(bits: u32) -> Self {
        bits
    }
}

impl sealed::Sealed for i32 {}

impl PackedScalar for i32 {
    fn to_bits(self) -> u32 {
        self.cast_unsigned()
    }

    fn from_bits(bits: u32) -> Self {
        bits.cast_signed()
    }
}

impl sealed::Sealed for bool {}

impl PackedScalar for bool {
    fn to_bits(self) -> u32 {
        u32::from(self)
    }

    fn from_bits(bits: u32) -> Self {
        bits != 0
    }
}

impl sealed::Sealed for char {}

impl PackedScalar for char {
    fn to_bits(self) -> u32 {
        u32::from(self)
    }

    fn from_bits(bits: u32) -> Self {
        // Only reachable with bits produced by to_bits, which are a valid scalar value.
        char::from_u32(bits).unwrap_or(char::REPLACEMENT_CHARACTER)
    }
}

impl sealed::Sealed for f32 {}

impl PackedScalar for f32 {
    fn to_bits(self) -> u32 {
        self.to_bits()
    }

    fn from_bits(bits: u32) -> Self {
        Self::from_bits(bits)
    }
}

/// In the packed word, the presence tag lives above the 32 payload bits.
const OCCUPIED_TAG: u64 = 1 << 32;

const EMPTY_WORD: u64 = 0;

/// A slot for small `Copy` scalars, packing the presence tag and the payload into one
/// 64-bit word so both transition in a single atomic swap.
///
/// Because presence is an explicit tag rather than a reserved payload value, a
/// default-valued element (all-zero bits) is stored and returned like any other; it is
/// never mistaken for an empty slot.
pub struct PackedSlot<T> {
    word: AtomicU64,
    _marker: PhantomData<T>,
}

impl<T> Default for PackedSlot<T> {
    fn default() -> Self {
        Self {
            word: AtomicU64::new(EMPTY_WORD),
            _marker: PhantomData,
        }
    }
}

impl<T: PackedScalar> ElementSlot<T> for PackedSlot<T> {
    fn try_claim(&self) -> Option<T> {
        let observed = self.word.load(Ordering::Acquire);
        if observed & OCCUPIED_TAG == 0 {
            return None;
        }

        match self
            .word
            .compare_exchange(observed, EMPTY_WORD, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => Some(unpack(observed)),
            Err(_) => None,
        }
    }

    fn try_place(&self, value: T) -> Result<(), T> {
        match self
            .word
            .compare_exchange(EMPTY_WORD, pack(value), Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(value),
        }
    }

    fn exchange(&self, value: T) -> Option<T> {
        let prior = self.word.swap(pack(value), Ordering::AcqRel);
        (prior & OCCUPIED_TAG != 0).then(|| unpack(prior))
    }

    fn is_occupied(&self) -> bool {
        self.word.load(Ordering::Relaxed) & OCCUPIED_TAG != 0
    }
}

fn pack<T: PackedScalar>(value: T) -> u64 {
    OCCUPIED_TAG | u64::from(value.to_bits())
}

fn unpack<T: PackedScalar>(word: u64) -> T {
    #[expect(clippy::cast_possible_truncation, reason = "payload occupies the low 32 bits")]
    T::from_bits(word as u32)
}

impl<T> std::fmt::Debug for PackedSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedSlot")
            .field("occupied", &(self.word.load(Ordering::Relaxed) & OCCUPIED_TAG != 0))
            .finish()
    }
}
