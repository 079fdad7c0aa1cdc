//! In-memory "physical RAM" for hosted tests and simulators.
//!
//! Physical addresses are offsets into a run of 4 KiB-aligned frames starting
//! at a chosen base. Pair it with an [`IdHeap`](kernel_heaps::IdHeap) over the
//! same range to hand frames out.

use crate::{PhysMapper, PhysicalAddress};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_info::memory::PAGE_SIZE;

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; PAGE_SIZE as usize]>);

pub struct FrameArena {
    base: u64,
    frames: Box<[Frame]>,
}

// SAFETY: access goes through `PhysMapper`, whose contract forbids aliasing.
unsafe impl Sync for FrameArena {}

impl FrameArena {
    /// `count` zeroed frames at physical `base` (page aligned).
    #[must_use]
    pub fn new(base: u64, count: usize) -> Self {
        let frames = (0..count)
            .map(|_| Frame(UnsafeCell::new([0; PAGE_SIZE as usize])))
            .collect();
        Self { base, frames }
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Exclusive end of the arena.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.base + self.frames.len() as u64 * PAGE_SIZE
    }

    #[must_use]
    pub fn contains(&self, pa: u64) -> bool {
        pa >= self.base && pa < self.end()
    }

    fn byte_ptr(&self, pa: u64) -> *mut u8 {
        assert!(self.contains(pa), "physical address {pa:#x} outside the arena");
        let offset = pa - self.base;
        let frame = &self.frames[(offset / PAGE_SIZE) as usize];
        // SAFETY: in-bounds offset within one frame.
        unsafe { frame.0.get().cast::<u8>().add((offset % PAGE_SIZE) as usize) }
    }

    /// Copy `len` bytes starting at `pa` (must stay within one frame).
    #[must_use]
    pub fn read(&self, pa: u64, len: usize) -> Vec<u8> {
        assert!((pa % PAGE_SIZE) as usize + len <= PAGE_SIZE as usize);
        let ptr = self.byte_ptr(pa);
        // SAFETY: bounds checked above; no live `&mut` is held by the reader.
        unsafe { core::slice::from_raw_parts(ptr, len) }.to_vec()
    }

    /// Overwrite bytes at `pa` (must stay within one frame).
    pub fn write(&self, pa: u64, bytes: &[u8]) {
        assert!((pa % PAGE_SIZE) as usize + bytes.len() <= PAGE_SIZE as usize);
        let ptr = self.byte_ptr(pa);
        // SAFETY: as in `read`.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
    }
}

impl PhysMapper for FrameArena {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.byte_ptr(pa.as_u64());
        debug_assert!(ptr.cast::<T>().is_aligned());
        // SAFETY: the caller upholds the `PhysMapper` contract.
        unsafe { &mut *ptr.cast::<T>() }
    }
}
