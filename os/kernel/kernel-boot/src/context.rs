use crate::BootError;
use kernel_heaps::{BumpHeap, Heap, RegionHeap};
use kernel_info::boot::{RawRegion, RegionTable, RegionType};
use kernel_info::memory::{
    BOOT_SECTOR_BASE, BOOT_STACK_SIZE, BOOT_WORKING_BASE, PAGE_SIZE, align_up,
};
use kernel_sync::SpinLock;
use log::{debug, info};

/// The 8 KiB stack carved for the rest of the boot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootStack {
    pub base: u64,
    pub size: u64,
}

impl BootStack {
    /// Initial stack pointer, 16-byte aligned.
    #[must_use]
    pub const fn top(&self) -> u64 {
        (self.base + self.size) & !0xf
    }
}

/// State owned by stage 2: the firmware region table and the working heap
/// that lives below the boot sector.
///
/// The working heap only serves allocations made before the region heaps
/// exist. [`retire_working`](Self::retire_working) takes it away for good.
#[derive(Debug)]
pub struct BootContext {
    working: SpinLock<Option<BumpHeap>>,
    regions: SpinLock<RegionTable>,
}

impl BootContext {
    #[must_use]
    pub const fn new(regions: RegionTable) -> Self {
        Self {
            working: SpinLock::new(Some(BumpHeap::new(BOOT_WORKING_BASE, BOOT_SECTOR_BASE))),
            regions: SpinLock::new(regions),
        }
    }

    /// # Errors
    /// More firmware regions than the table holds.
    pub fn from_raw(raw: &[RawRegion]) -> Result<Self, BootError> {
        Ok(Self::new(RegionTable::from_raw(raw)?))
    }

    #[must_use]
    pub const fn regions(&self) -> &SpinLock<RegionTable> {
        &self.regions
    }

    /// Allocate from the working heap. `None` once retired or exhausted.
    pub fn alloc_working(&self, size: u64) -> Option<u64> {
        self.working.lock().as_ref()?.alloc(size)
    }

    pub fn retire_working(&self) {
        if let Some(heap) = self.working.lock().take() {
            info!("working heap retired at {:#x}", heap.cursor());
        }
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.working.lock().is_none()
    }

    /// Base of the filesystem image on the boot disk. The last FILESYSTEM
    /// region wins; none, or a zero base, is fatal.
    ///
    /// # Errors
    /// [`BootError::InvalidFilesystemOffset`].
    pub fn filesystem_base(&self) -> Result<u64, BootError> {
        self.regions
            .lock()
            .of_type(RegionType::Filesystem)
            .last()
            .map(|r| r.base)
            .filter(|&base| base != 0)
            .ok_or(BootError::InvalidFilesystemOffset)
    }

    /// Keep the allocator away from the BIOS area and the loaded boot image:
    /// physical regions starting at zero are raised past `0x7c00 + fsb`.
    pub fn reclaim_boot_area(&self, fsb: u64) {
        let floor = align_up(BOOT_SECTOR_BASE + fsb, PAGE_SIZE);
        for region in self.regions.lock().iter_mut() {
            if region.kind == RegionType::Physical && region.base == 0 {
                region.length = region.end().saturating_sub(floor);
                region.base = floor;
                debug!("physical region raised to {region}");
            }
        }
    }

    /// Page allocator over the PHYSICAL regions.
    #[must_use]
    pub const fn physical_heap(&self) -> RegionHeap<'_> {
        RegionHeap::new(&self.regions, RegionType::Physical, PAGE_SIZE)
    }

    /// Page allocator over the IDENTITY regions.
    #[must_use]
    pub const fn identity_heap(&self) -> RegionHeap<'_> {
        RegionHeap::new(&self.regions, RegionType::Identity, PAGE_SIZE)
    }

    /// # Errors
    /// [`BootError::NoPhysicalMemory`].
    pub fn allocate_stack(&self, physical: &dyn Heap) -> Result<BootStack, BootError> {
        let base = physical
            .alloc(BOOT_STACK_SIZE)
            .ok_or(BootError::NoPhysicalMemory("boot stack"))?;
        Ok(BootStack {
            base,
            size: BOOT_STACK_SIZE,
        })
    }
}
