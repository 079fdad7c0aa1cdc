use crate::address_space::AddressSpace;
use crate::addresses::{PhysicalAddress, VirtualAddress};
use crate::flags::MapFlags;
use crate::page_entry::PageEntryBits;
use crate::{PageSize, PhysMapper, VmemError};
use kernel_heaps::Heap;
use kernel_info::memory::PAGE_SIZE;
use kernel_sync::SpinLock;

/// Page-table service as the fault path and process setup consume it.
pub trait PageMapping: Send + Sync {
    /// # Errors
    /// See [`AddressSpace::map`].
    fn map(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        len: u64,
        flags: MapFlags,
    ) -> Result<(), VmemError>;

    /// Map one 4 KiB page unless `va` is already present.
    /// Returns whether the mapping was installed.
    ///
    /// # Errors
    /// See [`AddressSpace::map_one`].
    fn map_page_if_absent(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<bool, VmemError>;

    /// # Errors
    /// See [`AddressSpace::unmap`].
    fn unmap(&self, va: VirtualAddress, len: u64) -> Result<(), VmemError>;

    fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress>;

    fn entry(&self, va: VirtualAddress) -> Option<PageEntryBits>;

    fn dump_walk(&self, va: VirtualAddress);

    /// Run `fill` over the contents of the physical page at `pa`.
    fn with_page(&self, pa: PhysicalAddress, fill: &mut dyn FnMut(&mut [u8]));
}

/// [`AddressSpace`] behind a lock, shareable across CPUs.
pub struct SharedAddressSpace<M, H> {
    inner: SpinLock<AddressSpace<M, H>>,
}

impl<M: PhysMapper, H: Heap> SharedAddressSpace<M, H> {
    #[must_use]
    pub const fn new(aspace: AddressSpace<M, H>) -> Self {
        Self {
            inner: SpinLock::new(aspace),
        }
    }

    #[must_use]
    pub fn root(&self) -> PhysicalAddress {
        self.inner.lock().root()
    }

    /// Run `f` with exclusive access to the tree.
    pub fn with<R>(&self, f: impl FnOnce(&mut AddressSpace<M, H>) -> R) -> R {
        self.inner.with_lock(f)
    }
}

impl<M: PhysMapper, H: Heap> PageMapping for SharedAddressSpace<M, H> {
    fn map(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        len: u64,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        self.inner.lock().map(va, pa, len, flags)
    }

    fn map_page_if_absent(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<bool, VmemError> {
        let mut aspace = self.inner.lock();
        if aspace.query(va).is_some() {
            return Ok(false);
        }
        aspace.map_one(va, pa, PageSize::Size4K, flags)?;
        Ok(true)
    }

    fn unmap(&self, va: VirtualAddress, len: u64) -> Result<(), VmemError> {
        self.inner.lock().unmap(va, len)
    }

    fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.inner.lock().query(va)
    }

    fn entry(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        self.inner.lock().entry(va)
    }

    fn dump_walk(&self, va: VirtualAddress) {
        self.inner.lock().dump_walk(va);
    }

    fn with_page(&self, pa: PhysicalAddress, fill: &mut dyn FnMut(&mut [u8])) {
        let aspace = self.inner.lock();
        let pa = pa.align_down(PAGE_SIZE);
        // SAFETY: callers pass frames they own; the lock serializes access.
        let page = unsafe { aspace.mapper().phys_to_mut::<[u8; PAGE_SIZE as usize]>(pa) };
        fill(page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::FrameArena;
    use alloc::sync::Arc;
    use kernel_heaps::IdHeap;

    #[test]
    fn map_if_absent_installs_once() {
        let arena = Arc::new(FrameArena::new(0x10_0000, 16));
        let heap = Arc::new(IdHeap::new(0x10_0000, 16 * PAGE_SIZE, PAGE_SIZE).unwrap());
        let aspace = AddressSpace::new(Arc::clone(&arena), Arc::clone(&heap)).unwrap();
        let shared: Arc<dyn PageMapping> = Arc::new(SharedAddressSpace::new(aspace));

        let va = VirtualAddress::new(0x4000_0000);
        let first = PhysicalAddress::new(0x10_f000);
        let second = PhysicalAddress::new(0x10_e000);
        assert_eq!(shared.map_page_if_absent(va, first, MapFlags::USER), Ok(true));
        assert_eq!(shared.map_page_if_absent(va, second, MapFlags::USER), Ok(false));
        assert_eq!(shared.query(va), Some(first));

        shared.with_page(first, &mut |page| page[..3].copy_from_slice(b"abc"));
        assert_eq!(arena.read(0x10_f000, 3), b"abc");
    }
}
