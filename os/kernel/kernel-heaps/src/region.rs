use crate::Heap;
use kernel_info::boot::{RegionTable, RegionType};
use kernel_info::memory::{align_down, align_up};
use kernel_sync::SpinLock;
use log::{debug, warn};

/// Carves unit-aligned runs off the top of boot regions of one type.
///
/// The region shrinks by what was taken, so the table always describes what
/// is still available.
#[derive(Debug)]
pub struct RegionHeap<'t> {
    table: &'t SpinLock<RegionTable>,
    kind: RegionType,
    unit: u64,
}

impl<'t> RegionHeap<'t> {
    #[must_use]
    pub const fn new(table: &'t SpinLock<RegionTable>, kind: RegionType, unit: u64) -> Self {
        Self { table, kind, unit }
    }

    #[must_use]
    pub const fn kind(&self) -> RegionType {
        self.kind
    }
}

impl Heap for RegionHeap<'_> {
    fn alloc(&self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let length = align_up(size, self.unit);
        let mut table = self.table.lock();
        for region in table.iter_mut().filter(|r| r.kind == self.kind) {
            let top = align_down(region.end(), self.unit);
            let Some(start) = top.checked_sub(length) else {
                continue;
            };
            if start < region.base {
                continue;
            }
            region.length = start - region.base;
            debug!("region heap {:?}: {start:#x}+{length:#x}", self.kind);
            return Some(start);
        }
        warn!("region heap {:?}: no region fits {size:#x} bytes", self.kind);
        None
    }

    fn dealloc(&self, addr: u64, size: u64) {
        debug!(
            "region heap {:?}: leaking {addr:#x}+{size:#x}",
            self.kind
        );
    }

    fn granularity(&self) -> u64 {
        self.unit
    }
}
