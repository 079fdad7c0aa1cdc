//! # Kernel Heaps
//!
//! Address-space and identifier allocators shared by the boot stage and the
//! kernel proper. Every allocator hands out integers, not memory: physical
//! ranges, virtual ranges, pids, fd numbers and timer ids all come from the
//! same primitives.
//!
//! ```text
//!   BumpHeap ──(boot only, retired)──┐
//!   RegionHeap ─── carves boot regions ──► physical / identity pages
//!   IdHeap ─── bitmap over [base, base+length) ──► pids, fds, virtual ranges
//!   BackedIdHeap ─── page-granular, grows from a parent heap
//!   TaggedHeap ─── parent | tag
//! ```
//!
//! ## Failure Reporting
//! Allocation returns `Option<u64>`; `None` is the invalid sentinel. Zero is
//! a valid address for several heaps and never signals failure.
//!
//! ## Locking
//! Each heap instance serializes its own bookkeeping behind one
//! [`SpinLock`](kernel_sync::SpinLock). No heap calls into another heap while
//! holding its own lock.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod backed;
mod bitmap;
mod bump;
mod id_heap;
mod region;
mod rng;
mod tagged;

pub use backed::BackedIdHeap;
pub use bump::BumpHeap;
pub use id_heap::IdHeap;
pub use region::RegionHeap;
pub use rng::seed_aslr;
pub use tagged::{TaggedAddress, TaggedHeap};

use alloc::sync::Arc;

/// Capability set shared by every allocator variant.
pub trait Heap: Send + Sync {
    /// Allocate `size` bytes (rounded up to [`granularity`](Self::granularity)).
    fn alloc(&self, size: u64) -> Option<u64>;

    /// Return a range previously obtained from [`alloc`](Self::alloc).
    fn dealloc(&self, addr: u64, size: u64);

    /// Alignment of every address this heap returns.
    fn granularity(&self) -> u64;

    /// Toggle randomized placement. Heaps without a placement policy ignore it.
    fn set_randomize(&self, _randomize: bool) {}
}

impl<H: Heap + ?Sized> Heap for Arc<H> {
    fn alloc(&self, size: u64) -> Option<u64> {
        (**self).alloc(size)
    }

    fn dealloc(&self, addr: u64, size: u64) {
        (**self).dealloc(addr, size);
    }

    fn granularity(&self) -> u64 {
        (**self).granularity()
    }

    fn set_randomize(&self, randomize: bool) {
        (**self).set_randomize(randomize);
    }
}

impl<H: Heap + ?Sized> Heap for &H {
    fn alloc(&self, size: u64) -> Option<u64> {
        (**self).alloc(size)
    }

    fn dealloc(&self, addr: u64, size: u64) {
        (**self).dealloc(addr, size);
    }

    fn granularity(&self) -> u64 {
        (**self).granularity()
    }

    fn set_randomize(&self, randomize: bool) {
        (**self).set_randomize(randomize);
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("unit {0:#x} is not a non-zero power of two")]
    InvalidUnit(u64),
    #[error("base {base:#x} is not aligned to unit {unit:#x}")]
    Misaligned { base: u64, unit: u64 },
    #[error("range [{base:#x}, +{length:#x}) is empty or overflows")]
    InvalidRange { base: u64, length: u64 },
    #[error("tag {tag:#x} does not fit below parent granularity {granularity:#x}")]
    TagOverlapsAlignment { tag: u64, granularity: u64 },
}
