//! # Virtual and Physical Memory Addresses

use core::fmt;
use core::ops::{Add, Sub};
use kernel_info::memory::{align_down, align_up};

/// A **physical** memory address (machine bus address).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

/// A **virtual** memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

macro_rules! address_common {
    ($ty:ident, $tag:literal) => {
        impl $ty {
            #[inline]
            #[must_use]
            pub const fn new(addr: u64) -> Self {
                Self(addr)
            }

            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            #[inline]
            #[must_use]
            pub const fn align_down(self, a: u64) -> Self {
                Self(align_down(self.0, a))
            }

            #[inline]
            #[must_use]
            pub const fn align_up(self, a: u64) -> Self {
                Self(align_up(self.0, a))
            }

            #[inline]
            #[must_use]
            pub const fn is_aligned(self, a: u64) -> bool {
                self.0 & (a - 1) == 0
            }
        }

        impl Add<u64> for $ty {
            type Output = Self;

            #[inline]
            fn add(self, rhs: u64) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$ty> for $ty {
            type Output = u64;

            #[inline]
            fn sub(self, rhs: Self) -> u64 {
                self.0 - rhs.0
            }
        }

        impl From<u64> for $ty {
            #[inline]
            fn from(addr: u64) -> Self {
                Self(addr)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "({:#018x})"), self.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

address_common!(PhysicalAddress, "PA");
address_common!(VirtualAddress, "VA");

impl VirtualAddress {
    /// Table index for `level` (4 = PML4 … 1 = PT).
    #[inline]
    #[must_use]
    pub const fn table_index(self, level: u8) -> usize {
        ((self.0 >> (12 + 9 * (level as u64 - 1))) & 0x1ff) as usize
    }

    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & 0xfff
    }

    /// Bits 63..48 replicate bit 47.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        let upper = self.0 >> 47;
        upper == 0 || upper == 0x1_ffff
    }
}
