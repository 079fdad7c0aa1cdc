use crate::{Heap, HeapError, IdHeap};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::memory::align_up;
use kernel_sync::RwLock;
use log::{trace, warn};

/// Page-granular id heap that grows by pulling chunks from a parent heap.
///
/// Each chunk becomes its own [`IdHeap`]. Chunks are never given back to the
/// parent. The parent is only called with no lock held here.
pub struct BackedIdHeap<P> {
    parent: P,
    unit: u64,
    ranges: RwLock<Vec<IdHeap>>,
    randomize: AtomicBool,
}

impl<P: Heap> BackedIdHeap<P> {
    /// # Errors
    /// `unit` is not a power of two dividing the parent's granularity.
    pub fn new(parent: P, unit: u64) -> Result<Self, HeapError> {
        if !unit.is_power_of_two() || !parent.granularity().is_multiple_of(unit) {
            return Err(HeapError::InvalidUnit(unit));
        }
        Ok(Self {
            parent,
            unit,
            ranges: RwLock::new(Vec::new()),
            randomize: AtomicBool::new(false),
        })
    }

    pub fn alloc(&self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        if let Some(addr) = self.ranges.read().iter().find_map(|r| r.alloc(size)) {
            return Some(addr);
        }

        let chunk = align_up(size, self.parent.granularity());
        let base = self.parent.alloc(chunk)?;
        let range = match IdHeap::new(base, chunk, self.unit) {
            Ok(range) => range,
            Err(e) => {
                warn!("backed heap: parent chunk {base:#x}+{chunk:#x} unusable: {e}");
                self.parent.dealloc(base, chunk);
                return None;
            }
        };
        trace!("backed heap: grew by {base:#x}+{chunk:#x}");
        range.set_randomize(self.randomize.load(Ordering::Relaxed));
        let addr = range.alloc(size);
        self.ranges.write().push(range);
        addr
    }

    pub fn dealloc(&self, addr: u64, size: u64) {
        let ranges = self.ranges.read();
        match ranges.iter().find(|r| r.contains(addr)) {
            Some(range) => range.dealloc(addr, size),
            None => warn!("backed heap: dealloc of unknown address {addr:#x}"),
        }
    }

    pub fn set_randomize(&self, randomize: bool) {
        self.randomize.store(randomize, Ordering::Relaxed);
        for range in self.ranges.read().iter() {
            range.set_randomize(randomize);
        }
    }

    /// Bytes handed out across all chunks.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.ranges.read().iter().map(IdHeap::allocated).sum()
    }

    /// Bytes pulled from the parent so far.
    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.ranges.read().iter().map(IdHeap::total).sum()
    }
}

impl<P: Heap> Heap for BackedIdHeap<P> {
    fn alloc(&self, size: u64) -> Option<u64> {
        Self::alloc(self, size)
    }

    fn dealloc(&self, addr: u64, size: u64) {
        Self::dealloc(self, addr, size);
    }

    fn granularity(&self) -> u64 {
        self.unit
    }

    fn set_randomize(&self, randomize: bool) {
        Self::set_randomize(self, randomize);
    }
}

impl<P> core::fmt::Debug for BackedIdHeap<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackedIdHeap")
            .field("unit", &self.unit)
            .field("ranges", &self.ranges.read().len())
            .finish_non_exhaustive()
    }
}
