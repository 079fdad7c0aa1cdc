//! # Virtual Memory Support
//!
//! x86-64 four-level paging for the boot identity map and for demand paging.
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │        │        └───► PTE   → maps 4 KiB page
//!   │        │        └────────────► PDE   → PS=1 → 2 MiB page
//!   │        └─────────────────────► PDPTE → PS=1 → 1 GiB page
//!   └──────────────────────────────► PML4E
//! ```
//!
//! Table frames come from a [`Heap`](kernel_heaps::Heap) of physical pages
//! and are reached through a [`PhysMapper`]. The boot stage uses the
//! [`IdentityMapper`]; hosted tests use the in-memory
//! [`FrameArena`](arena::FrameArena) (feature `arena`).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod address_space;
mod addresses;
#[cfg(any(test, feature = "arena"))]
pub mod arena;
mod flags;
mod page_entry;
mod shared;

pub use crate::address_space::{AddressSpace, PageSize, Walk};
pub use crate::addresses::{PhysicalAddress, VirtualAddress};
pub use crate::flags::MapFlags;
pub use crate::page_entry::{PageEntryBits, PageTable};
pub use crate::shared::{PageMapping, SharedAddressSpace};

/// Converts physical addresses to usable references in the current address
/// space (identity map, direct map, or a test arena).
pub trait PhysMapper: Send + Sync {
    /// # Safety
    /// - `pa` must be mapped writable for `'a` in the current page tables.
    /// - The bytes at `pa` must be a valid `T`, and nothing else may alias
    ///   them for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        // SAFETY: forwarded.
        unsafe { (**self).phys_to_mut(pa) }
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for alloc::sync::Arc<M> {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        // SAFETY: forwarded.
        unsafe { (**self).phys_to_mut(pa) }
    }
}

/// [`PhysMapper`] for code running with physical memory mapped 1:1.
#[derive(Debug, Default, Copy, Clone)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        // SAFETY: identity mapping; the caller upholds the trait contract.
        unsafe { &mut *(pa.as_u64() as *mut T) }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmemError {
    #[error("out of physical memory for page tables")]
    OutOfMemory,
    #[error("address {0:#x} is not aligned to the mapping size")]
    Unaligned(u64),
    #[error("address {0:#x} is not mapped")]
    NotMapped(u64),
    #[error("address {0:#x} lies inside a large page")]
    LargePage(u64),
}

/// Flush the TLB entry for `va` on the executing CPU.
#[inline]
pub fn invalidate_tlb_page(va: VirtualAddress) {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    // SAFETY: `invlpg` only drops a cached translation.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    let _ = va;
}
