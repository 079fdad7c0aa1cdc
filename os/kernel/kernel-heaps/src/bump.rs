use crate::Heap;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_info::memory::align_up;
use log::debug;

/// Request sizes are padded to this so low address bits stay free for tags.
const BUMP_ALIGN: u64 = 4;

/// Linear allocator for the boot stage, before any region heap exists.
///
/// Hands out `[base, limit)` front to back and never reclaims.
#[derive(Debug)]
pub struct BumpHeap {
    cursor: AtomicU64,
    limit: u64,
}

impl BumpHeap {
    #[must_use]
    pub const fn new(base: u64, limit: u64) -> Self {
        Self {
            cursor: AtomicU64::new(align_up(base, BUMP_ALIGN)),
            limit,
        }
    }

    /// Next address to be handed out.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }
}

impl Heap for BumpHeap {
    fn alloc(&self, size: u64) -> Option<u64> {
        let padded = align_up(size, BUMP_ALIGN);
        self.cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                cur.checked_add(padded).filter(|end| *end <= self.limit)
            })
            .ok()
    }

    fn dealloc(&self, addr: u64, size: u64) {
        debug!("bump heap: ignoring dealloc of {addr:#x}+{size:#x}");
    }

    fn granularity(&self) -> u64 {
        BUMP_ALIGN
    }
}
