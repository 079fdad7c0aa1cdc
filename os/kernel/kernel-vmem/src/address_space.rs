//! # Address Space (x86-64, PML4-rooted)
//!
//! Builds and edits one page-table tree. Intermediate tables are allocated
//! on demand from the frame heap and zeroed through the [`PhysMapper`].
//! Mutating an active tree flushes the affected TLB entries on the executing
//! CPU only.

use crate::addresses::{PhysicalAddress, VirtualAddress};
use crate::flags::MapFlags;
use crate::page_entry::{PageEntryBits, PageTable};
use crate::{PhysMapper, VmemError, invalidate_tlb_page};
use core::fmt;
use kernel_heaps::Heap;
use kernel_info::memory::PAGE_SIZE;
use log::{error, trace};

/// Supported x86-64 leaf sizes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageSize {
    /// PT leaf.
    Size4K,
    /// PD leaf with `PS=1`.
    Size2M,
    /// PDPT leaf with `PS=1`.
    Size1G,
}

impl PageSize {
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Size4K => 0x1000,
            Self::Size2M => 0x20_0000,
            Self::Size1G => 0x4000_0000,
        }
    }

    /// Table level holding the leaf (1 = PT).
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Size4K => 1,
            Self::Size2M => 2,
            Self::Size1G => 3,
        }
    }

    const fn at_level(level: u8) -> Self {
        match level {
            3 => Self::Size1G,
            2 => Self::Size2M,
            _ => Self::Size4K,
        }
    }
}

/// Entries met while translating one address, PML4 first.
#[derive(Clone, Copy, Default)]
pub struct Walk {
    entries: [Option<PageEntryBits>; 4],
}

impl Walk {
    /// Entry at `level` (4 = PML4 … 1 = PT), if the walk got that far.
    #[must_use]
    pub const fn at(&self, level: u8) -> Option<PageEntryBits> {
        self.entries[4 - level as usize]
    }

    /// The entry the walk ended on: a leaf or the first non-present entry.
    #[must_use]
    pub fn last(&self) -> Option<(u8, PageEntryBits)> {
        (1..=4u8).find_map(|level| self.at(level).map(|e| (level, e)))
    }
}

impl fmt::Debug for Walk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for level in (1..=4u8).rev() {
            if let Some(e) = self.at(level) {
                list.entry(&format_args!("L{level}: {:#018x}", e.into_bits()));
            }
        }
        list.finish()
    }
}

pub struct AddressSpace<M, H> {
    mapper: M,
    frames: H,
    root: PhysicalAddress,
}

impl<M: PhysMapper, H: Heap> AddressSpace<M, H> {
    /// Create an empty tree with a fresh, zeroed PML4.
    ///
    /// # Errors
    /// The frame heap cannot supply the root table.
    pub fn new(mapper: M, frames: H) -> Result<Self, VmemError> {
        let root = alloc_table(&mapper, &frames)?;
        Ok(Self {
            mapper,
            frames,
            root,
        })
    }

    /// Adopt an existing tree.
    ///
    /// # Safety
    /// `root` must be a valid PML4 reachable through `mapper`, whose tables
    /// were allocated from `frames`.
    pub const unsafe fn from_root(mapper: M, frames: H, root: PhysicalAddress) -> Self {
        Self {
            mapper,
            frames,
            root,
        }
    }

    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Load CR3 with this tree.
    ///
    /// # Safety
    /// The tree must map the code, stack and data the CPU touches next.
    pub unsafe fn activate(&self) {
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        // SAFETY: upheld by the caller.
        unsafe {
            core::arch::asm!(
                "mov cr3, {}",
                in(reg) self.root.as_u64(),
                options(nostack, preserves_flags)
            );
        }
        trace!("activated page tables at {}", self.root);
    }

    /// # Safety
    /// `pa` must be a page-table frame of this tree.
    #[allow(clippy::mut_from_ref)]
    unsafe fn table<'a>(&self, pa: PhysicalAddress) -> &'a mut PageTable {
        // SAFETY: forwarded to the caller.
        unsafe { self.mapper.phys_to_mut::<PageTable>(pa) }
    }

    /// Map one leaf of `size`, creating intermediate tables as needed.
    /// An existing leaf at `va` is replaced.
    ///
    /// # Errors
    /// Misaligned endpoints, a large page in the way, or no frame for a
    /// missing table.
    pub fn map_one(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: PageSize,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        if !va.is_aligned(size.bytes()) {
            return Err(VmemError::Unaligned(va.as_u64()));
        }
        if !pa.is_aligned(size.bytes()) {
            return Err(VmemError::Unaligned(pa.as_u64()));
        }

        let leaf_level = size.level();
        let mut table_pa = self.root;
        for level in ((leaf_level + 1)..=4).rev() {
            // SAFETY: every table reached from the root belongs to this tree.
            let table = unsafe { self.table(table_pa) };
            let index = va.table_index(level);
            let entry = table.entry(index);
            table_pa = if !entry.present() {
                let next = alloc_table(&self.mapper, &self.frames)?;
                table.set_entry(index, PageEntryBits::next_table(next));
                next
            } else if entry.large_page() {
                return Err(VmemError::LargePage(va.as_u64()));
            } else {
                entry.physical_address()
            };
        }

        // SAFETY: as above.
        let table = unsafe { self.table(table_pa) };
        let index = va.table_index(leaf_level);
        if table.entry(index).present() {
            trace!("remapping {va}");
            table.set_entry(index, flags.leaf(pa, size));
            invalidate_tlb_page(va);
        } else {
            table.set_entry(index, flags.leaf(pa, size));
        }
        Ok(())
    }

    /// Map `[va, va + len)` to `[pa, pa + len)` with 4 KiB leaves.
    ///
    /// # Errors
    /// See [`map_one`](Self::map_one). Pages mapped before the failure stay
    /// mapped.
    pub fn map(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        len: u64,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        let mut offset = 0;
        while offset < len {
            self.map_one(va + offset, pa + offset, PageSize::Size4K, flags)?;
            offset += PAGE_SIZE;
        }
        Ok(())
    }

    /// Clear the 4 KiB leaves covering `[va, va + len)`. Holes are skipped.
    ///
    /// # Errors
    /// `va` is misaligned, or a large page covers part of the range.
    pub fn unmap(&mut self, va: VirtualAddress, len: u64) -> Result<(), VmemError> {
        if !va.is_aligned(PAGE_SIZE) {
            return Err(VmemError::Unaligned(va.as_u64()));
        }
        let mut offset = 0;
        while offset < len {
            let page = va + offset;
            offset += PAGE_SIZE;
            let Some((table_pa, level)) = self.leaf_table(page) else {
                continue;
            };
            if level != 1 {
                return Err(VmemError::LargePage(page.as_u64()));
            }
            // SAFETY: `leaf_table` only yields tables of this tree.
            let table = unsafe { self.table(table_pa) };
            let index = page.table_index(1);
            if table.entry(index).present() {
                table.set_entry(index, PageEntryBits::new());
                invalidate_tlb_page(page);
            }
        }
        Ok(())
    }

    /// Table holding the leaf slot for `va`, and that table's level.
    fn leaf_table(&self, va: VirtualAddress) -> Option<(PhysicalAddress, u8)> {
        let mut table_pa = self.root;
        for level in (2..=4).rev() {
            // SAFETY: every table reached from the root belongs to this tree.
            let entry = unsafe { self.table(table_pa) }.entry(va.table_index(level));
            if !entry.present() {
                return None;
            }
            if entry.large_page() {
                return Some((table_pa, level));
            }
            table_pa = entry.physical_address();
        }
        Some((table_pa, 1))
    }

    /// Record every entry visited while translating `va`.
    #[must_use]
    pub fn walk(&self, va: VirtualAddress) -> Walk {
        let mut walk = Walk::default();
        let mut table_pa = self.root;
        for level in (1..=4u8).rev() {
            // SAFETY: every table reached from the root belongs to this tree.
            let entry = unsafe { self.table(table_pa) }.entry(va.table_index(level));
            walk.entries[4 - level as usize] = Some(entry);
            if !entry.present() || entry.large_page() {
                break;
            }
            table_pa = entry.physical_address();
        }
        walk
    }

    /// Leaf entry for `va` (present or not), if the walk reaches a leaf slot.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        match self.walk(va).last()? {
            (1, e) => Some(e),
            (_, e) if e.present() && e.large_page() => Some(e),
            _ => None,
        }
    }

    /// Translate `va` (large pages included).
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (level, entry) = self.walk(va).last()?;
        if !entry.present() {
            return None;
        }
        let size = PageSize::at_level(level).bytes();
        Some(entry.physical_address() + (va.as_u64() & (size - 1)))
    }

    /// Log the walk for `va`; used on the fatal fault path.
    pub fn dump_walk(&self, va: VirtualAddress) {
        error!("page walk for {va} (root {}): {:?}", self.root, self.walk(va));
    }
}

fn alloc_table<M: PhysMapper, H: Heap>(mapper: &M, frames: &H) -> Result<PhysicalAddress, VmemError> {
    let pa = frames.alloc(PAGE_SIZE).ok_or(VmemError::OutOfMemory)?;
    let pa = PhysicalAddress::new(pa);
    if !pa.is_aligned(PAGE_SIZE) {
        frames.dealloc(pa.as_u64(), PAGE_SIZE);
        return Err(VmemError::Unaligned(pa.as_u64()));
    }
    // SAFETY: the frame was just handed out and is exclusively ours.
    unsafe { mapper.phys_to_mut::<PageTable>(pa) }.zero();
    Ok(pa)
}

impl<M, H> fmt::Debug for AddressSpace<M, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::FrameArena;
    use kernel_heaps::IdHeap;

    const ARENA_BASE: u64 = 0x10_0000;

    fn setup(frames: usize) -> (FrameArena, IdHeap) {
        let arena = FrameArena::new(ARENA_BASE, frames);
        let heap = IdHeap::new(ARENA_BASE, frames as u64 * PAGE_SIZE, PAGE_SIZE).unwrap();
        (arena, heap)
    }

    #[test]
    fn map_one_4k_creates_tables_and_leaf() {
        let (arena, heap) = setup(16);
        let mut aspace = AddressSpace::new(&arena, &heap).unwrap();

        let va = VirtualAddress::new(0xffff_8000_0000_0000);
        let pa = PhysicalAddress::new(0x30_0000);
        aspace
            .map_one(va, pa, PageSize::Size4K, MapFlags::WRITABLE | MapFlags::GLOBAL)
            .unwrap();

        // Root + PDPT + PD + PT.
        assert_eq!(heap.allocated(), 4 * PAGE_SIZE);

        let walk = aspace.walk(va);
        for level in (2..=4).rev() {
            let e = walk.at(level).unwrap();
            assert!(e.present());
            assert!(!e.large_page());
        }
        let leaf = walk.at(1).unwrap();
        assert!(leaf.present());
        assert_eq!(leaf.physical_address(), pa);
        assert!(leaf.writable());
        assert!(leaf.global_translation());
        assert!(leaf.no_execute());
        assert!(!leaf.user_access());
        assert_eq!(aspace.query(va + 0x123), Some(pa + 0x123));
    }

    #[test]
    fn map_one_2m_sets_ps_bit() {
        let (arena, heap) = setup(8);
        let mut aspace = AddressSpace::new(&arena, &heap).unwrap();
        let va = VirtualAddress::new(0xffff_8000_2000_0000);
        let pa = PhysicalAddress::new(0x0400_0000);
        aspace
            .map_one(va, pa, PageSize::Size2M, MapFlags::WRITABLE)
            .unwrap();

        let pde = aspace.walk(va).at(2).unwrap();
        assert!(pde.present() && pde.large_page() && pde.writable());
        assert_eq!(pde.physical_address(), pa);
        assert_eq!(aspace.query(va + 0x1_2345), Some(pa + 0x1_2345));
        assert_eq!(aspace.entry(va), Some(pde));

        assert_eq!(
            aspace.map_one(va + 0x1000, pa, PageSize::Size4K, MapFlags::empty()),
            Err(VmemError::LargePage(va.as_u64() + 0x1000))
        );
        assert_eq!(
            aspace.unmap(va, PAGE_SIZE),
            Err(VmemError::LargePage(va.as_u64()))
        );
    }

    #[test]
    fn map_one_rejects_misalignment() {
        let (arena, heap) = setup(8);
        let mut aspace = AddressSpace::new(&arena, &heap).unwrap();
        assert_eq!(
            aspace.map_one(
                VirtualAddress::new(0x1000),
                PhysicalAddress::new(0x20_0000),
                PageSize::Size2M,
                MapFlags::empty()
            ),
            Err(VmemError::Unaligned(0x1000))
        );
    }

    #[test]
    fn region_map_unmap_query() {
        let (arena, heap) = setup(16);
        let mut aspace = AddressSpace::new(&arena, &heap).unwrap();
        let va = VirtualAddress::new(0x7000);
        aspace
            .map(va, PhysicalAddress::new(0x7000), 0x5000, MapFlags::KERNEL_RWX)
            .unwrap();
        for off in (0..0x5000).step_by(0x1000) {
            assert_eq!(aspace.query(va + off), Some(PhysicalAddress::new(0x7000 + off)));
        }
        assert_eq!(aspace.query(va + 0x5000), None);

        aspace.unmap(va + 0x1000, 0x2000).unwrap();
        assert!(aspace.query(va).is_some());
        assert_eq!(aspace.query(va + 0x1000), None);
        assert_eq!(aspace.query(va + 0x2000), None);
        assert!(aspace.query(va + 0x3000).is_some());

        let hole = aspace.entry(va + 0x1000).unwrap();
        assert!(!hole.present());
        // Unmapping holes and never-touched ranges is fine.
        aspace.unmap(VirtualAddress::new(0x40_0000_0000), 0x3000).unwrap();
    }

    #[test]
    fn entry_is_none_without_leaf_table() {
        let (arena, heap) = setup(4);
        let aspace = AddressSpace::new(&arena, &heap).unwrap();
        let va = VirtualAddress::new(0x1234_5000);
        assert_eq!(aspace.entry(va), None);
        assert_eq!(aspace.walk(va).last().map(|(l, _)| l), Some(4));
    }

    #[test]
    fn table_exhaustion_is_reported() {
        let (arena, heap) = setup(2);
        let mut aspace = AddressSpace::new(&arena, &heap).unwrap();
        assert_eq!(
            aspace.map_one(
                VirtualAddress::new(0x1000),
                PhysicalAddress::new(0x1000),
                PageSize::Size4K,
                MapFlags::empty()
            ),
            Err(VmemError::OutOfMemory)
        );
    }
}
